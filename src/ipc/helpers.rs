use crate::ipc::error::{db_err, err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

pub type HandlerFn = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs a handler against the open workspace and wraps the outcome in the response envelope.
pub fn run(state: &AppState, req: &Request, handler: HandlerFn) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match handler(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, message = %error.message, "request rejected");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

/// `None` for absent, null, or blank strings.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
            };
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-integer {}", key)))
}

pub fn get_optional_bool(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain ids", key)))
        })
        .collect()
}

pub fn get_patch(params: &serde_json::Value) -> Result<&serde_json::Value, HandlerErr> {
    match params.get("patch") {
        Some(p) if p.is_object() => Ok(p),
        _ => Err(HandlerErr::bad_params("missing patch")),
    }
}

/// `table` is always a literal from this crate.
pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        &format!("SELECT 1 FROM {} WHERE id = ?", table),
        [id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err("db_query_failed", "look up record"))
}

pub fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if !row_exists(conn, table, id)? {
        return Err(HandlerErr::not_found(format!("{} not found", what)));
    }
    Ok(())
}

/// The acting user must exist and hold the admin role.
pub fn require_admin(conn: &Connection, params: &serde_json::Value) -> Result<String, HandlerErr> {
    let actor = get_required_str(params, "actorUserId")?;
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [&actor], |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed", "look up acting user"))?;
    match role.as_deref() {
        Some("admin") => Ok(actor),
        Some(_) => Err(HandlerErr::forbidden("admin role required")),
        None => Err(HandlerErr::forbidden("unknown acting user")),
    }
}

/// `BEGIN IMMEDIATE` takes the write lock up front so check-then-write
/// sequences cannot interleave with another writer on the same file.
pub fn begin_immediate<'c>(
    conn: &'c Connection,
    action: &'static str,
) -> Result<Transaction<'c>, HandlerErr> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(db_err("db_tx_failed", action))
}
