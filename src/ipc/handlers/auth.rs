use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_ref, get_optional_str, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex digest of `salt || password`. The store never sees the plaintext.
fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let out = hasher.finalize();
    out.iter().map(|b| format!("{:02x}", b)).collect()
}

fn user_exists(conn: &Connection, email: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM users WHERE email = ?", [email], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::query)
}

fn register(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let password = get_required_str(params, "password")?;
    if email.trim().is_empty() || password.is_empty() {
        return Err(HandlerErr::bad_params("email and password must not be empty"));
    }

    if user_exists(conn, &email)? {
        eprintln!("auth.register rejected: email already registered - {}", email);
        return Err(HandlerErr::new("conflict", "email already registered"));
    }

    let salt = Uuid::new_v4().to_string();
    let digest = password_digest(&salt, &password);
    conn.execute(
        "INSERT INTO users(email, first_name, last_name, password_salt, password_digest, status)
         VALUES(?, ?, ?, ?, ?, 'Active')",
        (&email, &first_name, &last_name, &salt, &digest),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "email": email }))
}

/// Verifies the password, then resolves the profile the way the login screen
/// branches: coordinator and plain teachers land on different homes, students
/// on theirs, and a user row without either profile is sent to onboarding.
fn login(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let password = get_required_str(params, "password")?;

    let creds: Option<(String, String)> = conn
        .query_row(
            "SELECT password_salt, password_digest FROM users WHERE email = ? AND status = 'Active'",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let Some((salt, stored_digest)) = creds else {
        eprintln!("auth.login failed: user not found - {}", email);
        return Err(HandlerErr::new("auth_failed", "invalid email or password"));
    };
    if password_digest(&salt, &password) != stored_digest {
        eprintln!("auth.login failed: wrong password - {}", email);
        return Err(HandlerErr::new("auth_failed", "invalid email or password"));
    }

    let teacher: Option<bool> = conn
        .query_row(
            "SELECT is_coordinator FROM teachers WHERE email = ?",
            [&email],
            |r| Ok(r.get::<_, i64>(0)? != 0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let role = match teacher {
        Some(true) => "coordinator",
        Some(false) => "teacher",
        None => {
            let is_student: Option<i64> = conn
                .query_row("SELECT 1 FROM students WHERE email = ?", [&email], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(HandlerErr::query)?;
            if is_student.is_some() {
                "student"
            } else {
                "incomplete_profile"
            }
        }
    };

    let display_name = display_name(conn, &email)?;
    Ok(json!({ "role": role, "displayName": display_name }))
}

fn reset_password(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let new_password = get_required_str(params, "newPassword")?;
    if new_password.is_empty() {
        return Err(HandlerErr::bad_params("newPassword must not be empty"));
    }

    let salt = Uuid::new_v4().to_string();
    let digest = password_digest(&salt, &new_password);
    let rows = conn
        .execute(
            "UPDATE users SET password_salt = ?, password_digest = ? WHERE email = ?",
            (&salt, &digest, &email),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    if rows == 0 {
        eprintln!("auth.resetPassword failed: user not found - {}", email);
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "ok": true }))
}

fn display_name(conn: &Connection, email: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT first_name || ' ' || last_name FROM users WHERE email = ?",
        [email],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(HandlerErr::query)
}

fn user_display_name(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    match display_name(conn, &email)? {
        Some(name) => Ok(json!({ "displayName": name })),
        None => Err(HandlerErr::not_found("user not found")),
    }
}

fn profile_picture_get(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let url: Option<Option<String>> = conn
        .query_row(
            "SELECT profile_picture_url FROM users WHERE email = ?",
            [&email],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    match url {
        Some(url) => Ok(json!({ "profilePictureUrl": url })),
        None => Err(HandlerErr::not_found("user not found")),
    }
}

fn profile_picture_set(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_ref(state)?;
    let email = get_required_str(params, "email")?;
    let url = get_optional_str(params, "url");
    let rows = conn
        .execute(
            "UPDATE users SET profile_picture_url = ? WHERE email = ?",
            (&url, &email),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    if rows == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.register" => register(state, &req.params),
        "auth.login" => login(state, &req.params),
        "auth.resetPassword" => reset_password(state, &req.params),
        "users.displayName" => user_display_name(state, &req.params),
        "users.profilePicture.get" => profile_picture_get(state, &req.params),
        "users.profilePicture.set" => profile_picture_set(state, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
