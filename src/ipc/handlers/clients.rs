use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_patch, get_required_str, require_row, run, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::workflow::now_timestamp;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const CLIENT_COLUMNS: &str = "c.id, c.name, c.email, c.phone, c.address, c.notes, c.created_at, c.updated_at,
    (SELECT COUNT(*) FROM pets p WHERE p.client_id = c.id AND p.active = 1) AS pet_count";

fn client_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "email": r.get::<_, Option<String>>(2)?,
        "phone": r.get::<_, Option<String>>(3)?,
        "address": r.get::<_, Option<String>>(4)?,
        "notes": r.get::<_, Option<String>>(5)?,
        "createdAt": r.get::<_, String>(6)?,
        "updatedAt": r.get::<_, Option<String>>(7)?,
        "petCount": r.get::<_, i64>(8)?,
    }))
}

pub fn load_client(conn: &Connection, client_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM clients c WHERE c.id = ?", CLIENT_COLUMNS),
        [client_id],
        client_json,
    )
    .optional()
    .map_err(db_err("db_query_failed", "load client"))?
    .ok_or_else(|| HandlerErr::not_found("client not found"))
}

fn clients_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM clients c ORDER BY c.name COLLATE NOCASE, c.created_at",
            CLIENT_COLUMNS
        ))
        .map_err(db_err("db_query_failed", "list clients"))?;
    let clients = stmt
        .query_map([], client_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list clients"))?;
    Ok(json!({ "clients": clients }))
}

fn clients_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_required_str(params, "clientId")?;
    Ok(json!({ "client": load_client(conn, &client_id)? }))
}

fn clients_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let email = get_optional_str(params, "email")?;
    let phone = get_optional_str(params, "phone")?;
    let address = get_optional_str(params, "address")?;
    let notes = get_optional_str(params, "notes")?;

    let client_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO clients(id, name, email, phone, address, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&client_id, &name, &email, &phone, &address, &notes, now_timestamp()),
    )
    .map_err(db_err("db_insert_failed", "create client"))?;

    tracing::info!(client_id = %client_id, "client created");
    Ok(json!({ "clientId": client_id, "client": load_client(conn, &client_id)? }))
}

fn clients_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_required_str(params, "clientId")?;
    let patch = get_patch(params)?;
    require_row(conn, "clients", &client_id, "client")?;

    if patch.get("name").is_some() && get_optional_str(patch, "name")?.is_none() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "update client"))?;
    for (key, column) in [
        ("name", "name"),
        ("email", "email"),
        ("phone", "phone"),
        ("address", "address"),
        ("notes", "notes"),
    ] {
        if patch.get(key).is_none() {
            continue;
        }
        let value = get_optional_str(patch, key)?;
        tx.execute(
            &format!("UPDATE clients SET {} = ? WHERE id = ?", column),
            (&value, &client_id),
        )
        .map_err(db_err("db_update_failed", "update client"))?;
    }
    tx.execute(
        "UPDATE clients SET updated_at = ? WHERE id = ?",
        (now_timestamp(), &client_id),
    )
    .map_err(db_err("db_update_failed", "update client"))?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "update client"))?;

    Ok(json!({ "client": load_client(conn, &client_id)? }))
}

fn clients_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_required_str(params, "clientId")?;
    require_row(conn, "clients", &client_id, "client")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "delete client"))?;

    // No ON DELETE CASCADE; delete in dependency order.
    for sql in [
        "DELETE FROM booking_pets
         WHERE booking_id IN (SELECT id FROM bookings WHERE client_id = ?1)",
        "DELETE FROM bookings WHERE client_id = ?1",
        "DELETE FROM pets WHERE client_id = ?1",
        "DELETE FROM sessions
         WHERE user_id IN (SELECT id FROM users WHERE client_id = ?1)",
        "DELETE FROM users WHERE client_id = ?1",
        "DELETE FROM clients WHERE id = ?1",
    ] {
        tx.execute(sql, [&client_id])
            .map_err(db_err("db_delete_failed", "delete client"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "delete client"))?;

    tracing::info!(client_id = %client_id, "client deleted");
    Ok(json!({ "success": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "clients.list" => clients_list,
        "clients.get" => clients_get,
        "clients.create" => clients_create,
        "clients.update" => clients_update,
        "clients.delete" => clients_delete,
        _ => return None,
    };
    Some(run(state, req, handler))
}
