use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_ref, get_required_bool, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

struct CoordinationInput {
    discipline: String,
    year: i64,
    semester: i64,
    stages: Vec<i64>,
}

fn parse_coordinations(params: &serde_json::Value) -> Result<Vec<CoordinationInput>, HandlerErr> {
    let Some(raw) = params.get("coordinations") else {
        return Ok(Vec::new());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("coordinations must be an array"));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let stages = item
            .get("stages")
            .and_then(|v| v.as_array())
            .ok_or_else(|| HandlerErr::bad_params("coordination stages must be an array"))?
            .iter()
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| HandlerErr::bad_params("stages must be integers"))
            })
            .collect::<Result<Vec<i64>, _>>()?;
        out.push(CoordinationInput {
            discipline: get_required_str(item, "discipline")?,
            year: get_required_i64(item, "year")?,
            semester: get_required_i64(item, "semester")?,
            stages,
        });
    }
    Ok(out)
}

/// Coordination workflow: the teacher row and all of its (class, stage)
/// assignment rows land in one transaction. A failing assignment (bad class
/// key, duplicate pair) takes the teacher insert down with it.
fn register(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let is_coordinator = get_required_bool(params, "isCoordinator")?;
    let coordinations = parse_coordinations(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    tx.execute(
        "INSERT INTO teachers(email, is_coordinator) VALUES(?, ?)",
        (&email, is_coordinator as i64),
    )
    .map_err(|e| {
        eprintln!("teachers.register failed on teacher insert - {}: {}", email, e);
        HandlerErr::new("db_tx_failed", e.to_string())
    })?;

    let mut assignments = 0i64;
    if is_coordinator {
        for coord in &coordinations {
            for stage in &coord.stages {
                tx.execute(
                    "INSERT INTO class_coordinations(teacher_email, class_discipline, class_year, class_semester, supervised_stage)
                     VALUES(?, ?, ?, ?, ?)",
                    (&email, &coord.discipline, coord.year, coord.semester, stage),
                )
                .map_err(|e| {
                    // Rollback on drop: no teacher row without its assignments.
                    eprintln!(
                        "teachers.register failed on coordination insert - {} {} {}/{}: {}",
                        email, coord.discipline, coord.year, coord.semester, e
                    );
                    HandlerErr::new("db_tx_failed", e.to_string())
                })?;
                assignments += 1;
            }
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    Ok(json!({ "email": email, "coordinationsCreated": assignments }))
}

fn list(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };
    let rows = conn
        .prepare(
            "SELECT u.first_name || ' ' || u.last_name, t.email
             FROM teachers t
             JOIN users u ON u.email = t.email
             ORDER BY u.first_name, u.last_name",
        )
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                let name: String = r.get(0)?;
                let email: String = r.get(1)?;
                Ok(json!({
                    "email": email,
                    "display": format!("{} ({})", name, email)
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => HandlerErr::query(e).response(&req.id),
    }
}

fn coordinated_classes(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let parsed = (|| {
        let email = get_required_str(&req.params, "email")?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT c.discipline, c.year, c.semester
                 FROM classes c
                 JOIN class_coordinations coord ON c.discipline = coord.class_discipline
                   AND c.year = coord.class_year
                   AND c.semester = coord.class_semester
                 WHERE coord.teacher_email = ?
                 ORDER BY c.year DESC, c.semester DESC, c.discipline",
            )
            .map_err(HandlerErr::query)?;
        stmt.query_map([&email], |r| {
            Ok(json!({
                "discipline": r.get::<_, String>(0)?,
                "year": r.get::<_, i64>(1)?,
                "semester": r.get::<_, i64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
    })();
    match parsed {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => e.response(&req.id),
    }
}

fn classes_list(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    let rows = conn
        .prepare(
            "SELECT discipline, year, semester, max_tasks
             FROM classes
             ORDER BY year DESC, semester DESC, discipline",
        )
        .and_then(|mut stmt| {
            stmt.query_map([], |r| {
                Ok(json!({
                    "discipline": r.get::<_, String>(0)?,
                    "year": r.get::<_, i64>(1)?,
                    "semester": r.get::<_, i64>(2)?,
                    "maxTasks": r.get::<_, Option<i64>>(3)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => HandlerErr::query(e).response(&req.id),
    }
}

fn classes_create(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let discipline = get_required_str(params, "discipline")?;
    let year = get_required_i64(params, "year")?;
    let semester = get_required_i64(params, "semester")?;
    let max_tasks = params.get("maxTasks").and_then(|v| v.as_i64());

    conn.execute(
        "INSERT INTO classes(discipline, year, semester, max_tasks) VALUES(?, ?, ?, ?)",
        (&discipline, year, semester, max_tasks),
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            HandlerErr::new("conflict", "class already exists")
        }
        _ => HandlerErr::new("db_insert_failed", e.to_string()),
    })?;

    Ok(json!({ "discipline": discipline, "year": year, "semester": semester }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.register" => Some(match register(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "teachers.list" => Some(list(state, req)),
        "teachers.coordinatedClasses" => Some(coordinated_classes(state, req)),
        "classes.list" => Some(classes_list(state, req)),
        "classes.create" => Some(match classes_create(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
