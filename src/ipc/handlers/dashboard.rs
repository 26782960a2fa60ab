use crate::ipc::error::ok;
use crate::ipc::helpers::{class_label, get_required_str, term_label};
use crate::ipc::types::{AppState, Request};
use crate::progress::{self, Bucket, Distribution, TaskSnapshot};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

/// Review backlog entries: latest submission of each unfinished task of an
/// advisee that nobody has reviewed yet. No re-sort is imposed on top of the
/// store's return order.
fn pending_items(conn: &Connection, advisor_email: &str) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT
           (SELECT COUNT(*) FROM tasks tc
             WHERE tc.student_email = s.email AND tc.status = 'completed') * 1.0
             / COALESCE(c.max_tasks, 6),
           u.first_name || ' ' || u.last_name,
           s.email,
           s.class_discipline, s.class_year, s.class_semester,
           t.status, t.sequence_order, sub.submitted_at
         FROM students s
         JOIN users u ON u.email = s.email
         JOIN classes c ON c.discipline = s.class_discipline
                       AND c.year = s.class_year
                       AND c.semester = s.class_semester
         JOIN tasks t ON t.student_email = s.email AND t.status <> 'completed'
         JOIN task_submissions sub ON sub.student_email = t.student_email
                                  AND sub.sequence_order = t.sequence_order
         WHERE s.advisor_email = ?
           AND sub.submitted_at = (SELECT MAX(s2.submitted_at) FROM task_submissions s2
                                    WHERE s2.student_email = sub.student_email
                                      AND s2.sequence_order = sub.sequence_order)
           AND NOT EXISTS (SELECT 1 FROM task_reviews r
                            WHERE r.student_email = sub.student_email
                              AND r.sequence_order = sub.sequence_order
                              AND r.submitted_at = sub.submitted_at)",
    )?;
    stmt.query_map([advisor_email], |r| {
        let progress: f64 = r.get(0)?;
        let name: String = r.get(1)?;
        let email: String = r.get(2)?;
        let discipline: String = r.get(3)?;
        let year: i64 = r.get(4)?;
        let semester: i64 = r.get(5)?;
        let status: String = r.get(6)?;
        let sequence: i64 = r.get(7)?;
        let submitted_at: String = r.get(8)?;
        Ok(json!({
            "progress": progress,
            "studentName": name,
            "studentEmail": email,
            "classLabel": class_label(&discipline, year, semester),
            "termLabel": term_label(year, semester),
            "status": status,
            "sequenceOrder": sequence,
            "submittedAt": submitted_at
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn count_scalar(conn: &Connection, sql: &str, binds: &[&dyn rusqlite::ToSql]) -> rusqlite::Result<i64> {
    conn.query_row(sql, binds, |r| r.get(0))
}

const COMPLETED_TG_FILTER: &str = "NOT EXISTS (SELECT 1 FROM tasks t
         WHERE t.student_email = s.email AND t.status <> 'completed')
       AND EXISTS (SELECT 1 FROM tasks t2 WHERE t2.student_email = s.email)";

fn advisor_payload(conn: &Connection, email: &str) -> rusqlite::Result<serde_json::Value> {
    let pending = pending_items(conn, email)?;
    let total_advisees = count_scalar(
        conn,
        "SELECT COUNT(DISTINCT email) FROM students WHERE advisor_email = ?",
        &[&email],
    )?;
    let completed_tgs = count_scalar(
        conn,
        &format!(
            "SELECT COUNT(s.email) FROM students s WHERE s.advisor_email = ? AND {}",
            COMPLETED_TG_FILTER
        ),
        &[&email],
    )?;

    Ok(json!({
        "totalAdvisees": total_advisees,
        "completedTgs": completed_tgs,
        "pendingCount": pending.len(),
        "pending": pending
    }))
}

fn empty_advisor_payload() -> serde_json::Value {
    json!({
        "totalAdvisees": 0,
        "completedTgs": 0,
        "pendingCount": 0,
        "pending": []
    })
}

fn handle_advisor(state: &AppState, req: &Request) -> serde_json::Value {
    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, empty_advisor_payload());
    };
    match advisor_payload(conn, &email) {
        Ok(payload) => ok(&req.id, payload),
        Err(e) => {
            // The dashboard must stay renderable; degrade to zeroed data.
            eprintln!("dashboard.advisor degraded for {}: {}", email, e);
            ok(&req.id, empty_advisor_payload())
        }
    }
}

/// Folds the progress bucket of every student in the coordinator's
/// supervised classes. LEFT JOIN keeps task-less students visible; they
/// fall out as `Completed`, the fold's initialization default.
fn class_distribution(
    conn: &Connection,
    classes: &[(String, i64, i64)],
) -> rusqlite::Result<Distribution> {
    let mut snapshots: Vec<(String, TaskSnapshot)> = Vec::new();
    let mut students: HashSet<String> = HashSet::new();
    let mut stmt = conn.prepare(
        "SELECT s.email, s.current_stage, t.stage, t.status
         FROM students s
         LEFT JOIN tasks t ON t.student_email = s.email
         WHERE s.class_discipline = ? AND s.class_year = ? AND s.class_semester = ?",
    )?;
    for (discipline, year, semester) in classes {
        let rows = stmt
            .query_map((discipline, year, semester), |r| {
                let email: String = r.get(0)?;
                let student_stage: i64 = r.get(1)?;
                let task_stage: Option<i64> = r.get(2)?;
                let status: Option<String> = r.get(3)?;
                Ok((email, student_stage, task_stage, status))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (email, student_stage, task_stage, status) in rows {
            students.insert(email.clone());
            if let (Some(task_stage), Some(status)) = (task_stage, status) {
                snapshots.push((
                    email,
                    TaskSnapshot {
                        student_stage,
                        task_stage,
                        status,
                    },
                ));
            }
        }
    }

    let mut buckets = progress::aggregate_buckets(snapshots);
    for email in students {
        buckets.entry(email).or_insert(Bucket::Completed);
    }
    Ok(Distribution::from_buckets(buckets.into_values()))
}

fn coordinated_class_keys(
    conn: &Connection,
    email: &str,
) -> rusqlite::Result<Vec<(String, i64, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT class_discipline, class_year, class_semester
         FROM class_coordinations WHERE teacher_email = ?",
    )?;
    let rows = stmt
        .query_map([email], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect();
    rows
}

fn coordinator_payload(conn: &Connection, email: &str) -> rusqlite::Result<serde_json::Value> {
    let total_students = count_scalar(conn, "SELECT COUNT(*) FROM students", &[])?;
    let completed_tgs = count_scalar(
        conn,
        &format!("SELECT COUNT(s.email) FROM students s WHERE {}", COMPLETED_TG_FILTER),
        &[],
    )?;
    let total_advisors = count_scalar(
        conn,
        "SELECT COUNT(DISTINCT advisor_email) FROM students WHERE advisor_email IS NOT NULL",
        &[],
    )?;

    // Pendings stay scoped to the coordinator's own advisees, never to the
    // whole coordinated cohort.
    let pending = pending_items(conn, email)?;

    let classes = coordinated_class_keys(conn, email)?;
    let distribution = if classes.is_empty() {
        Distribution::default()
    } else {
        class_distribution(conn, &classes)?
    };

    Ok(json!({
        "totalStudents": total_students,
        "completedTgs": completed_tgs,
        "totalAdvisors": total_advisors,
        "distribution": distribution,
        "pendingCount": pending.len(),
        "pending": pending
    }))
}

fn empty_coordinator_payload() -> serde_json::Value {
    json!({
        "totalStudents": 0,
        "completedTgs": 0,
        "totalAdvisors": 0,
        "distribution": Distribution::default(),
        "pendingCount": 0,
        "pending": []
    })
}

fn handle_coordinator(state: &AppState, req: &Request) -> serde_json::Value {
    let email = match get_required_str(&req.params, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, empty_coordinator_payload());
    };
    match coordinator_payload(conn, &email) {
        Ok(payload) => ok(&req.id, payload),
        Err(e) => {
            eprintln!("dashboard.coordinator degraded for {}: {}", email, e);
            ok(&req.id, empty_coordinator_payload())
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.advisor" => Some(handle_advisor(state, req)),
        "dashboard.coordinator" => Some(handle_coordinator(state, req)),
        _ => None,
    }
}
