use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_ref, get_required_i64, get_required_str, now_ts, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn section_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let sequence: i64 = r.get(0)?;
    let title: String = r.get(1)?;
    let status: String = r.get(2)?;
    let stage: i64 = r.get(3)?;
    let due_date: Option<String> = r.get(4)?;
    let review_status: Option<String> = r.get(5)?;
    let last_reviewed_at: Option<String> = r.get(6)?;
    Ok(json!({
        "sequenceOrder": sequence,
        "title": title,
        "status": status,
        "stage": stage,
        "dueDate": due_date,
        "reviewStatus": review_status,
        "lastReviewedAt": last_reviewed_at
    }))
}

const SECTION_SELECT: &str = "SELECT t.sequence_order, t.title, t.status, t.stage, t.due_date,
       (SELECT r.status FROM task_reviews r
         WHERE r.student_email = t.student_email AND r.sequence_order = t.sequence_order
         ORDER BY r.reviewed_at DESC LIMIT 1),
       (SELECT r.reviewed_at FROM task_reviews r
         WHERE r.student_email = t.student_email AND r.sequence_order = t.sequence_order
         ORDER BY r.reviewed_at DESC LIMIT 1)
 FROM tasks t";

fn list(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sections": [] }));
    };
    let parsed = (|| {
        let email = get_required_str(&req.params, "studentEmail")?;
        let sql = format!("{} WHERE t.student_email = ? ORDER BY t.sequence_order", SECTION_SELECT);
        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
        stmt.query_map([&email], section_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)
    })();
    match parsed {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => e.response(&req.id),
    }
}

/// Picks the section a student should land on: the open one first, then the
/// most recently finished, then the first still-locked one, then whatever
/// exists at all.
fn current(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "studentEmail")?;

    let ladder = [
        " WHERE t.student_email = ? AND t.status = 'in_progress' ORDER BY t.sequence_order LIMIT 1",
        " WHERE t.student_email = ? AND t.status = 'completed' ORDER BY t.sequence_order DESC LIMIT 1",
        " WHERE t.student_email = ? AND t.status = 'locked' ORDER BY t.sequence_order LIMIT 1",
        " WHERE t.student_email = ? ORDER BY t.sequence_order DESC LIMIT 1",
    ];
    for step in ladder {
        let sql = format!("{}{}", SECTION_SELECT, step);
        let found = conn
            .query_row(&sql, [&email], section_row)
            .optional()
            .map_err(HandlerErr::query)?;
        if let Some(section) = found {
            return Ok(json!({ "section": section }));
        }
    }
    Err(HandlerErr::not_found("student has no sections"))
}

/// Closes an in-progress section and unlocks the next one. Sections advance
/// strictly in sequence order; the student's current stage follows the stage
/// of whichever section opens next. Both writes land in one transaction.
fn advance(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM tasks WHERE student_email = ? AND sequence_order = ?",
            (&email, sequence),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match status.as_deref() {
        None => return Err(HandlerErr::not_found("section not found")),
        Some("in_progress") => {}
        Some(other) => {
            return Err(HandlerErr::new(
                "conflict",
                format!("section is {}, not in_progress", other),
            ));
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute(
        "UPDATE tasks SET status = 'completed'
         WHERE student_email = ? AND sequence_order = ?",
        (&email, sequence),
    )
    .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let unlocked = tx
        .execute(
            "UPDATE tasks SET status = 'in_progress'
             WHERE student_email = ? AND sequence_order = ? AND status = 'locked'",
            (&email, sequence + 1),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut current_stage: Option<i64> = None;
    if unlocked > 0 {
        let stage: i64 = tx
            .query_row(
                "SELECT stage FROM tasks WHERE student_email = ? AND sequence_order = ?",
                (&email, sequence + 1),
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?;
        tx.execute(
            "UPDATE students SET current_stage = ? WHERE email = ?",
            (stage, &email),
        )
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        current_stage = Some(stage);
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({
        "completed": sequence,
        "unlocked": if unlocked > 0 { Some(sequence + 1) } else { None },
        "currentStage": current_stage
    }))
}

/// Attempt numbers are per (student, section) and strictly increasing,
/// starting at 1.
fn submission_create(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let file_name = get_required_str(params, "fileName")?;
    let file_path = get_required_str(params, "filePath")?;

    let max_attempt: Option<i64> = conn
        .query_row(
            "SELECT MAX(attempt_number) FROM task_submissions
             WHERE student_email = ? AND sequence_order = ?",
            (&email, sequence),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    let attempt = max_attempt.unwrap_or(0) + 1;
    let submitted_at = now_ts();

    conn.execute(
        "INSERT INTO task_submissions(student_email, sequence_order, attempt_number, submitted_at, file_name, file_path)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&email, sequence, attempt, &submitted_at, &file_name, &file_path),
    )
    .map_err(|e| {
        eprintln!("submissions.create failed - {} #{}: {}", email, sequence, e);
        HandlerErr::new("db_insert_failed", e.to_string())
    })?;

    Ok(json!({ "attemptNumber": attempt, "submittedAt": submitted_at }))
}

fn submission_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let mut stmt = conn
        .prepare(
            "SELECT attempt_number, file_name, submitted_at, file_path
             FROM task_submissions
             WHERE student_email = ? AND sequence_order = ?
             ORDER BY submitted_at DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&email, sequence), |r| {
            Ok(json!({
                "attemptNumber": r.get::<_, i64>(0)?,
                "fileName": r.get::<_, String>(1)?,
                "submittedAt": r.get::<_, String>(2)?,
                "filePath": r.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "submissions": rows }))
}

/// Version history joined with reviews; a submission may not be reviewed
/// yet, hence the LEFT JOIN.
fn submission_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let mut stmt = conn
        .prepare(
            "SELECT ts.attempt_number, ts.submitted_at, ts.file_path,
                    tr.review_comment, tr.status
             FROM task_submissions ts
             LEFT JOIN task_reviews tr
               ON ts.student_email = tr.student_email
              AND ts.sequence_order = tr.sequence_order
              AND ts.submitted_at = tr.submitted_at
             WHERE ts.student_email = ? AND ts.sequence_order = ?
             ORDER BY ts.submitted_at DESC",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&email, sequence), |r| {
            Ok(json!({
                "attemptNumber": r.get::<_, i64>(0)?,
                "submittedAt": r.get::<_, String>(1)?,
                "filePath": r.get::<_, String>(2)?,
                "reviewComment": r.get::<_, Option<String>>(3)?,
                "reviewStatus": r.get::<_, Option<String>>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "history": rows }))
}

fn submission_latest_timestamp(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let latest: Option<String> = conn
        .query_row(
            "SELECT MAX(submitted_at) FROM task_submissions
             WHERE student_email = ? AND sequence_order = ?",
            (&email, sequence),
            |r| r.get(0),
        )
        .map_err(HandlerErr::query)?;
    Ok(json!({ "submittedAt": latest }))
}

fn submission_file_path(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "studentEmail")?;
    let sequence = get_required_i64(params, "sequenceOrder")?;
    let submitted_at = get_required_str(params, "submittedAt")?;
    let path: Option<String> = conn
        .query_row(
            "SELECT file_path FROM task_submissions
             WHERE student_email = ? AND sequence_order = ? AND submitted_at = ?",
            (&email, sequence, &submitted_at),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match path {
        Some(path) => Ok(json!({ "filePath": path })),
        None => Err(HandlerErr::not_found("submission not found")),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.list" => Some(list(state, req)),
        "sections.current" => Some(match current(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "sections.advance" => Some(match advance(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "submissions.create" => Some(match submission_create(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "submissions.list" | "submissions.history" | "submissions.latestTimestamp"
        | "submissions.filePath" => {
            let result = match db_ref(state) {
                Ok(conn) => match req.method.as_str() {
                    "submissions.list" => submission_list(conn, &req.params),
                    "submissions.history" => submission_history(conn, &req.params),
                    "submissions.latestTimestamp" => {
                        submission_latest_timestamp(conn, &req.params)
                    }
                    _ => submission_file_path(conn, &req.params),
                },
                Err(e) => Err(e),
            };
            Some(match result {
                Ok(v) => ok(&req.id, v),
                Err(e) => e.response(&req.id),
            })
        }
        _ => None,
    }
}
