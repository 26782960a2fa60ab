use crate::ipc::error::ok;
use crate::ipc::helpers::{
    class_label, db_ref, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::{Months, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const DEFAULT_MAX_TASKS: i64 = 6;

/// Fixed six-section curriculum every enrolled student starts with.
/// Stages: the first four sections belong to stage 1, the last two to stage 2.
const CURRICULUM_TITLES: [&str; 6] = [
    "Apresentação Pessoal e Acadêmica",
    "Relatório PIM II",
    "Relatório PIM III",
    "Relatório PIM IV",
    "Relatório PIM V",
    "Relatório PIM VI",
];
const CURRICULUM_DESCRIPTIONS: [&str; 6] = [
    "", // section 1 carries the onboarding answers, built per student
    "Relatório referente ao PIM II",
    "Relatório referente ao PIM III",
    "Relatório referente ao PIM IV",
    "Relatório referente ao PIM V",
    "Relatório referente ao PIM VI",
];
const CURRICULUM_STAGES: [i64; 6] = [1, 1, 1, 1, 2, 2];

struct EnrollProfile {
    personal_email: String,
    advisor_email: Option<String>,
    discipline: String,
    year: i64,
    semester: i64,
    tg_type: String,
    problem_statement: String,
}

fn parse_profile(params: &serde_json::Value) -> Result<EnrollProfile, HandlerErr> {
    let Some(profile) = params.get("profile") else {
        return Err(HandlerErr::bad_params("missing profile"));
    };
    let advisor_email = profile
        .get("advisorEmail")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(EnrollProfile {
        personal_email: get_required_str(profile, "personalEmail")?,
        advisor_email,
        discipline: get_required_str(profile, "discipline")?,
        year: get_required_i64(profile, "year")?,
        semester: get_required_i64(profile, "semester")?,
        tg_type: get_required_str(profile, "tgType")?,
        problem_statement: profile
            .get("problemStatement")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
    })
}

/// Enrollment workflow: one student row plus its six curriculum tasks, all
/// or nothing. The agreement document must already be in storage; a missing
/// URL aborts before anything is written.
fn enroll(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let agreement_url = get_required_str(params, "agreementUrl")?;
    if agreement_url.trim().is_empty() {
        eprintln!("students.enroll rejected: missing agreement document - {}", email);
        return Err(HandlerErr::bad_params("agreementUrl must not be empty"));
    }
    let profile = parse_profile(params)?;

    // The first section doubles as the student's presentation; its
    // description carries the onboarding answers.
    let problem = if profile.problem_statement.trim().is_empty() {
        "N/A"
    } else {
        profile.problem_statement.as_str()
    };
    let first_description = format!(
        "Apresentação Pessoal e Acadêmica.\nE-mail Pessoal: {}\nTipo de TG: {}\nProblema a Resolver: {}",
        profile.personal_email, profile.tg_type, problem
    );

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute(
        "INSERT INTO students(email, personal_email, advisor_email, agreement_document_url,
                              class_discipline, class_year, class_semester, current_stage)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &email,
            &profile.personal_email,
            &profile.advisor_email,
            &agreement_url,
            &profile.discipline,
            profile.year,
            profile.semester,
        ),
    )
    .map_err(|e| {
        eprintln!("students.enroll failed on student insert - {}: {}", email, e);
        HandlerErr::new("db_tx_failed", e.to_string())
    })?;

    let base = Utc::now().date_naive();
    for i in 0..6usize {
        let due = base
            .checked_add_months(Months::new(i as u32 + 1))
            .unwrap_or(base);
        let description = if i == 0 {
            first_description.clone()
        } else {
            CURRICULUM_DESCRIPTIONS[i].to_string()
        };
        let status = if i == 0 { "in_progress" } else { "locked" };
        tx.execute(
            "INSERT INTO tasks(student_email, sequence_order, title, description, due_date, status, stage)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &email,
                i as i64 + 1,
                CURRICULUM_TITLES[i],
                &description,
                due.to_string(),
                status,
                CURRICULUM_STAGES[i],
            ),
        )
        .map_err(|e| {
            // Transaction rolls back on drop; no partial student survives.
            eprintln!("students.enroll failed on task insert - {}: {}", email, e);
            HandlerErr::new("db_tx_failed", e.to_string())
        })?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({ "email": email, "tasksCreated": 6 }))
}

fn student_rows(
    conn: &Connection,
    where_sql: &str,
    binds: &[&dyn rusqlite::ToSql],
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!(
        "SELECT u.first_name || ' ' || u.last_name, s.email,
                s.class_discipline, s.class_year, s.class_semester, u.profile_picture_url
         FROM students s
         JOIN users u ON u.email = s.email
         WHERE {}
         ORDER BY u.first_name, u.last_name",
        where_sql
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(binds, |r| {
        let name: String = r.get(0)?;
        let email: String = r.get(1)?;
        let discipline: String = r.get(2)?;
        let year: i64 = r.get(3)?;
        let semester: i64 = r.get(4)?;
        let picture: Option<String> = r.get(5)?;
        Ok(json!({
            "displayName": name,
            "email": email,
            "classLabel": class_label(&discipline, year, semester),
            "profilePictureUrl": picture
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn list_by_class(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let parsed = (|| {
        let discipline = get_required_str(&req.params, "discipline")?;
        let year = get_required_i64(&req.params, "year")?;
        let semester = get_required_i64(&req.params, "semester")?;
        student_rows(
            conn,
            "s.class_discipline = ? AND s.class_year = ? AND s.class_semester = ?",
            &[&discipline, &year, &semester],
        )
    })();
    match parsed {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => e.response(&req.id),
    }
}

fn list_advisees(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let parsed = (|| {
        let advisor = get_required_str(&req.params, "advisorEmail")?;
        student_rows(conn, "s.advisor_email = ?", &[&advisor])
    })();
    match parsed {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => e.response(&req.id),
    }
}

fn details(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let row: Option<(String, i64, i64, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT s.class_discipline, s.class_year, s.class_semester, s.advisor_email,
                    ua.first_name || ' ' || ua.last_name
             FROM students s
             LEFT JOIN users ua ON ua.email = s.advisor_email
             WHERE s.email = ?",
            [&email],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let Some((discipline, year, semester, advisor_email, advisor_name)) = row else {
        return Err(HandlerErr::not_found("student not found"));
    };
    Ok(json!({
        "classLabel": class_label(&discipline, year, semester),
        "advisorName": advisor_name.unwrap_or_else(|| "Não Atribuído".to_string()),
        "advisorEmail": advisor_email
    }))
}

fn stage_config(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let row: Option<(i64, Option<i64>)> = conn
        .query_row(
            "SELECT s.current_stage, c.max_tasks
             FROM students s
             JOIN classes c ON c.discipline = s.class_discipline
                           AND c.year = s.class_year
                           AND c.semester = s.class_semester
             WHERE s.email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let Some((stage, max_tasks)) = row else {
        return Err(HandlerErr::not_found("student not found"));
    };
    Ok(json!({
        "currentStage": stage,
        "maxTasks": max_tasks.unwrap_or(DEFAULT_MAX_TASKS)
    }))
}

fn is_tg_complete(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let row: Option<(i64, Option<i64>)> = conn
        .query_row(
            "SELECT COUNT(*), c.max_tasks
             FROM tasks t
             JOIN students s ON s.email = t.student_email
             JOIN classes c ON c.discipline = s.class_discipline
                           AND c.year = s.class_year
                           AND c.semester = s.class_semester
             WHERE t.student_email = ? AND t.status = 'completed'
             GROUP BY c.max_tasks",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let complete = match row {
        Some((completed, max_tasks)) => completed >= max_tasks.unwrap_or(DEFAULT_MAX_TASKS),
        None => false,
    };
    Ok(json!({ "complete": complete }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.enroll" => Some(match enroll(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "students.listByClass" => Some(list_by_class(state, req)),
        "students.listAdvisees" => Some(list_advisees(state, req)),
        "students.details" => Some(match details(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "students.stageConfig" => Some(match stage_config(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "students.isTgComplete" => Some(match is_tg_complete(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
