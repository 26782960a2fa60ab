use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::ipc::error::err;
use crate::ipc::types::AppState;

/// Handler-internal failure carrying the envelope fields. Inner functions
/// return `Result<_, HandlerErr>` and the outermost handler maps it to the
/// JSON error envelope.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_ref<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// UTC wall-clock in a lexicographically sortable form; SQLite compares
/// these as plain strings.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn class_label(discipline: &str, year: i64, semester: i64) -> String {
    format!("{} {}/{}", discipline, year, semester)
}

pub fn term_label(year: i64, semester: i64) -> String {
    format!("{}/{}", year, semester)
}

/// Persists a notification row and logs the simulated email dispatch.
/// Callers treat failure as best-effort; nothing here escalates.
pub fn insert_notification(
    conn: &Connection,
    user_email: &str,
    content: &str,
    related_task: Option<(&str, i64)>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let (related_email, related_seq) = match related_task {
        Some((email, seq)) => (Some(email), Some(seq)),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO notifications(id, user_email, created_at, content, related_student_email, related_sequence_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, user_email, &now_ts(), content, related_email, related_seq),
    )?;

    // Email delivery is simulated; a real dispatcher would hook in here.
    let preview: String = content.chars().take(50).collect();
    eprintln!("notification email to {}: {}...", user_email, preview);
    Ok(())
}
