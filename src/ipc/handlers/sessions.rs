use crate::config::MAX_SESSION_TTL_HOURS;
use crate::ipc::error::{db_err, err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_row, row_exists, run, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{format_timestamp, now_timestamp, parse_timestamp, UserRole};
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub role: UserRole,
    pub client_id: Option<String>,
    pub walker_id: Option<String>,
}

impl SessionUser {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "userId": self.user_id,
            "role": self.role.as_str(),
            "clientId": self.client_id,
            "walkerId": self.walker_id,
        })
    }
}

fn unauthorized(message: &str) -> HandlerErr {
    HandlerErr::new("unauthorized", message)
}

/// Looks a session token up; expired sessions are removed and rejected.
pub fn resolve_session(conn: &Connection, token: &str) -> Result<SessionUser, HandlerErr> {
    let row: Option<(String, String, String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT s.expires_at, u.id, u.role, u.client_id, u.walker_id
               FROM sessions s
               JOIN users u ON u.id = s.user_id
              WHERE s.token = ?",
            [token],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed", "resolve session"))?;
    let Some((expires_at, user_id, role, client_id, walker_id)) = row else {
        return Err(unauthorized("invalid session"));
    };

    let expired = parse_timestamp(&expires_at)
        .map(|t| t <= Utc::now())
        .unwrap_or(true);
    if expired {
        conn.execute("DELETE FROM sessions WHERE token = ?", [token])
            .map_err(db_err("db_delete_failed", "expire session"))?;
        return Err(unauthorized("session expired"));
    }

    Ok(SessionUser {
        user_id,
        role: UserRole::parse(&role)?,
        client_id,
        walker_id,
    })
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    let display_name = get_required_str(params, "displayName")?;
    let role = UserRole::parse(&get_required_str(params, "role")?)?;
    let client_id = get_optional_str(params, "clientId")?;
    let walker_id = get_optional_str(params, "walkerId")?;

    match role {
        UserRole::Client if client_id.is_none() => {
            return Err(HandlerErr::bad_params("client users need clientId"))
        }
        UserRole::Walker if walker_id.is_none() => {
            return Err(HandlerErr::bad_params("walker users need walkerId"))
        }
        _ => {}
    }
    if let Some(cid) = client_id.as_deref() {
        require_row(conn, "clients", cid, "client")?;
    }
    if let Some(wid) = walker_id.as_deref() {
        require_row(conn, "walkers", wid, "walker")?;
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed", "create user"))?;
    if taken.is_some() {
        return Err(HandlerErr::bad_params("email already in use"));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, email, display_name, role, client_id, walker_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &email,
            &display_name,
            role.as_str(),
            &client_id,
            &walker_id,
            now_timestamp(),
        ),
    )
    .map_err(db_err("db_insert_failed", "create user"))?;

    tracing::info!(user_id = %user_id, role = role.as_str(), "user created");
    Ok(json!({ "userId": user_id, "role": role.as_str() }))
}

fn sessions_create(conn: &Connection, params: &serde_json::Value, default_ttl_hours: i64) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let ttl_hours = match params.get("ttlHours") {
        None => default_ttl_hours,
        Some(v) if v.is_null() => default_ttl_hours,
        Some(v) => v
            .as_i64()
            .filter(|h| (1..=MAX_SESSION_TTL_HOURS).contains(h))
            .ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "ttlHours must be between 1 and {}",
                    MAX_SESSION_TTL_HOURS
                ))
            })?,
    };
    if !row_exists(conn, "users", &user_id)? {
        return Err(HandlerErr::not_found("user not found"));
    }

    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let now = Utc::now();
    let expires = Duration::try_hours(ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| HandlerErr::bad_params("session lifetime out of range"))?;
    let expires_at = format_timestamp(expires);
    conn.execute(
        "INSERT INTO sessions(token, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        (&token, &user_id, format_timestamp(now), &expires_at),
    )
    .map_err(db_err("db_insert_failed", "create session"))?;

    Ok(json!({ "token": token, "userId": user_id, "expiresAt": expires_at }))
}

fn sessions_resolve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    Ok(resolve_session(conn, &token)?.to_json())
}

fn sessions_revoke(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let removed = conn
        .execute("DELETE FROM sessions WHERE token = ?", [&token])
        .map_err(db_err("db_delete_failed", "revoke session"))?;
    Ok(json!({ "revoked": removed > 0 }))
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sessions_create(conn, &req.params, state.session_ttl_hours) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "users.create" => users_create,
        "sessions.create" => return Some(handle_sessions_create(state, req)),
        "sessions.resolve" => sessions_resolve,
        "sessions.revoke" => sessions_revoke,
        _ => return None,
    };
    Some(run(state, req, handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn open_temp() -> Connection {
        let dir = std::env::temp_dir().join(format!(
            "walkbook-sessions-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        db::open_db(&dir).expect("open db")
    }

    #[test]
    fn oversized_default_ttl_is_rejected_not_a_panic() {
        let conn = open_temp();
        let user = users_create(
            &conn,
            &json!({ "email": "a@example.com", "displayName": "A", "role": "admin" }),
        )
        .expect("user");

        let e = sessions_create(&conn, &json!({ "userId": user["userId"] }), 9_999_999_999_999)
            .expect_err("out of range");
        assert_eq!(e.code, "bad_params");

        let e = sessions_create(
            &conn,
            &json!({ "userId": user["userId"], "ttlHours": 87_601 }),
            24,
        )
        .expect_err("out of range");
        assert_eq!(e.code, "bad_params");

        let ok = sessions_create(&conn, &json!({ "userId": user["userId"] }), MAX_SESSION_TTL_HOURS)
            .expect("max ttl");
        assert!(ok["expiresAt"].is_string());
    }
}
