use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_ref, get_required_i64, get_required_str, insert_notification, now_ts, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn task_title(conn: &Connection, student_email: &str, sequence: i64) -> String {
    let title: Option<String> = conn
        .query_row(
            "SELECT title FROM tasks WHERE student_email = ? AND sequence_order = ?",
            (student_email, sequence),
            |r| r.get(0),
        )
        .optional()
        .unwrap_or(None);
    title.unwrap_or_else(|| format!("Seção {}", sequence))
}

/// Records the advisor's decision on one submission and notifies the
/// student. The notification is best-effort: its failure is logged, never
/// rolled into the review write.
fn record(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let student_email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let submitted_at = get_required_str(params, "submittedAt")?;
    let reviewer_email = get_required_str(params, "reviewerEmail")?;
    let status = get_required_str(params, "status")?;
    let comment = params
        .get("comment")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    if status != "approved" && status != "revision_requested" {
        return Err(HandlerErr::bad_params(
            "status must be approved or revision_requested",
        ));
    }

    let rows = conn
        .execute(
            "INSERT INTO task_reviews(student_email, sequence_order, submitted_at, reviewer_email, status, review_comment, reviewed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_email, sequence_order, submitted_at) DO UPDATE SET
               reviewer_email = excluded.reviewer_email,
               status = excluded.status,
               review_comment = excluded.review_comment,
               reviewed_at = excluded.reviewed_at",
            (
                &student_email,
                sequence,
                &submitted_at,
                &reviewer_email,
                &status,
                &comment,
                &now_ts(),
            ),
        )
        .map_err(|e| {
            eprintln!("reviews.record failed - {} #{}: {}", student_email, sequence, e);
            HandlerErr::new("db_insert_failed", e.to_string())
        })?;

    if rows > 0 {
        let title = task_title(conn, &student_email, sequence);
        let message = if status == "approved" {
            format!(
                "Parabéns! Sua entrega para '{}' foi APROVADA pelo orientador.",
                title
            )
        } else {
            format!(
                "Atenção: Sua entrega para '{}' requer revisão. Veja o feedback do orientador.",
                title
            )
        };
        if let Err(e) =
            insert_notification(conn, &student_email, &message, Some((&student_email, sequence)))
        {
            eprintln!("reviews.record notification failed - {}: {}", student_email, e);
        }
    }

    Ok(json!({ "ok": true }))
}

/// Books the defense slot. The (datetime, location) uniqueness lives in the
/// store; a violation surfaces as a conflict, not a generic failure, and
/// the standing booking is untouched.
fn schedule(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let student_email = get_required_str(params, "studentEmail")?;
    let scheduler_email = get_required_str(params, "schedulerEmail")?;
    let defense_at_raw = get_required_str(params, "defenseAt")?;
    let location = get_required_str(params, "location")?;
    let panel = get_required_str(params, "panel")?;

    let defense_at = NaiveDateTime::parse_from_str(&defense_at_raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&defense_at_raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| HandlerErr::bad_params("defenseAt must be YYYY-MM-DDTHH:MM"))?;
    let defense_at_canonical = defense_at.format("%Y-%m-%dT%H:%M:%S").to_string();

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO defenses(id, student_email, scheduler_email, defense_at, location, evaluation_panel, status)
         VALUES(?, ?, ?, ?, ?, ?, 'Agendada')",
        (
            &id,
            &student_email,
            &scheduler_email,
            &defense_at_canonical,
            &location,
            &panel,
        ),
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            eprintln!(
                "defenses.schedule conflict - {} at {} / {}",
                student_email, defense_at_canonical, location
            );
            HandlerErr::new("conflict", "the selected time or location is already booked")
        }
        _ => {
            eprintln!("defenses.schedule failed - {}: {}", student_email, e);
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    let content = format!(
        "Sua defesa de TG foi agendada para: {} no local: {}",
        defense_at.format("%d/%m/%Y às %H:%M"),
        location
    );
    if let Err(e) = insert_notification(conn, &student_email, &content, None) {
        eprintln!("defenses.schedule notification failed - {}: {}", student_email, e);
    }

    Ok(json!({ "defenseId": id, "status": "Agendada" }))
}

fn defenses_list(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let student_email = get_required_str(params, "studentEmail")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, defense_at, location, evaluation_panel, status, scheduler_email
             FROM defenses
             WHERE student_email = ?
             ORDER BY defense_at",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&student_email], |r| {
            Ok(json!({
                "defenseId": r.get::<_, String>(0)?,
                "defenseAt": r.get::<_, String>(1)?,
                "location": r.get::<_, String>(2)?,
                "evaluationPanel": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "schedulerEmail": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "defenses": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reviews.record" => record(state, &req.params),
        "defenses.schedule" => schedule(state, &req.params),
        "defenses.list" => defenses_list(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
