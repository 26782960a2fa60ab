use crate::ipc::error::ok;
use crate::ipc::helpers::{db_ref, get_required_str, insert_notification, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn send(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let content = get_required_str(params, "content")?;
    let related = match (
        params.get("relatedStudentEmail").and_then(|v| v.as_str()),
        params.get("relatedSequenceOrder").and_then(|v| v.as_i64()),
    ) {
        (Some(e), Some(seq)) if !e.trim().is_empty() && seq > 0 => Some((e, seq)),
        _ => None,
    };

    insert_notification(conn, &email, &content, related).map_err(|e| {
        eprintln!("notifications.send failed - {}: {}", email, e);
        HandlerErr::new("db_insert_failed", e.to_string())
    })?;
    Ok(json!({ "ok": true }))
}

fn list(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "notifications": [] }));
    };
    let parsed = (|| {
        let email = get_required_str(&req.params, "email")?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_email, created_at, content, related_student_email,
                        related_sequence_order, is_read
                 FROM notifications
                 WHERE user_email = ?
                 ORDER BY created_at DESC",
            )
            .map_err(HandlerErr::query)?;
        stmt.query_map([&email], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "email": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
                "content": r.get::<_, String>(3)?,
                "relatedStudentEmail": r.get::<_, Option<String>>(4)?,
                "relatedSequenceOrder": r.get::<_, Option<i64>>(5)?,
                "isRead": r.get::<_, i64>(6)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
    })();
    match parsed {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => e.response(&req.id),
    }
}

fn mark_read(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let id = get_required_str(params, "id")?;
    let rows = conn
        .execute("UPDATE notifications SET is_read = 1 WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if rows == 0 {
        return Err(HandlerErr::not_found("notification not found"));
    }
    Ok(json!({ "ok": true }))
}

fn mark_all_read(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let rows = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE user_email = ? AND is_read = 0",
            [&email],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "updated": rows }))
}

fn unread_count(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "count": 0 }));
    };
    let parsed = (|| {
        let email = get_required_str(&req.params, "email")?;
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_email = ? AND is_read = 0",
            [&email],
            |r| r.get::<_, i64>(0),
        )
        .map_err(HandlerErr::query)
    })();
    match parsed {
        Ok(count) => ok(&req.id, json!({ "count": count })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.send" => Some(match send(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "notifications.list" => Some(list(state, req)),
        "notifications.markRead" => Some(match mark_read(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "notifications.markAllRead" => Some(match mark_all_read(state, &req.params) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        "notifications.unreadCount" => Some(unread_count(state, req)),
        _ => None,
    }
}
