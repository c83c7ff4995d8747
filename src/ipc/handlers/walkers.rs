use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_patch, get_required_str, require_row, run, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::now_timestamp;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

fn walker_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, Option<String>>(2)?,
        "phone": r.get::<_, Option<String>>(3)?,
        "active": r.get::<_, i64>(4)? != 0,
    }))
}

fn load_walker(conn: &Connection, walker_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, email, phone, active FROM walkers WHERE id = ?",
        [walker_id],
        walker_json,
    )
    .optional()
    .map_err(db_err("db_query_failed", "load walker"))?
    .ok_or_else(|| HandlerErr::not_found("walker not found"))
}

fn walkers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let active_only = get_optional_bool(params, "activeOnly")?.unwrap_or(false);
    let sql = if active_only {
        "SELECT id, name, email, phone, active FROM walkers WHERE active = 1 ORDER BY name COLLATE NOCASE"
    } else {
        "SELECT id, name, email, phone, active FROM walkers ORDER BY name COLLATE NOCASE"
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(db_err("db_query_failed", "list walkers"))?;
    let walkers = stmt
        .query_map([], walker_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list walkers"))?;
    Ok(json!({ "walkers": walkers }))
}

fn walkers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_optional_str(params, "email")?;
    let phone = get_optional_str(params, "phone")?;

    let walker_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO walkers(id, name, email, phone, active, created_at) VALUES(?, ?, ?, ?, 1, ?)",
        (&walker_id, &name, &email, &phone, now_timestamp()),
    )
    .map_err(db_err("db_insert_failed", "create walker"))?;

    Ok(json!({ "walkerId": walker_id, "walker": load_walker(conn, &walker_id)? }))
}

fn walkers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let walker_id = get_required_str(params, "walkerId")?;
    let patch = get_patch(params)?;
    require_row(conn, "walkers", &walker_id, "walker")?;

    if patch.get("name").is_some() && get_optional_str(patch, "name")?.is_none() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "update walker"))?;
    for column in ["name", "email", "phone"] {
        if patch.get(column).is_none() {
            continue;
        }
        let value = get_optional_str(patch, column)?;
        tx.execute(
            &format!("UPDATE walkers SET {} = ? WHERE id = ?", column),
            (&value, &walker_id),
        )
        .map_err(db_err("db_update_failed", "update walker"))?;
    }
    if let Some(active) = get_optional_bool(patch, "active")? {
        tx.execute(
            "UPDATE walkers SET active = ? WHERE id = ?",
            (active as i64, &walker_id),
        )
        .map_err(db_err("db_update_failed", "update walker"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "update walker"))?;

    Ok(json!({ "walker": load_walker(conn, &walker_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "walkers.list" => walkers_list,
        "walkers.create" => walkers_create,
        "walkers.update" => walkers_update,
        _ => return None,
    };
    Some(run(state, req, handler))
}
