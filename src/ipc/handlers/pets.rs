use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_patch, get_required_str, require_row, run, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::now_timestamp;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

fn pet_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "clientId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "breed": r.get::<_, Option<String>>(3)?,
        "notes": r.get::<_, Option<String>>(4)?,
        "active": r.get::<_, i64>(5)? != 0,
    }))
}

fn load_pet(conn: &Connection, pet_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, client_id, name, breed, notes, active FROM pets WHERE id = ?",
        [pet_id],
        pet_json,
    )
    .optional()
    .map_err(db_err("db_query_failed", "load pet"))?
    .ok_or_else(|| HandlerErr::not_found("pet not found"))
}

fn pets_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_optional_str(params, "clientId")?;
    let include_inactive = get_optional_bool(params, "includeInactive")?.unwrap_or(false);

    let mut sql = String::from(
        "SELECT id, client_id, name, breed, notes, active FROM pets WHERE 1 = 1",
    );
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = client_id {
        sql.push_str(" AND client_id = ?");
        binds.push(Value::Text(cid));
    }
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY name COLLATE NOCASE, created_at");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "list pets"))?;
    let pets = stmt
        .query_map(params_from_iter(binds), pet_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list pets"))?;
    Ok(json!({ "pets": pets }))
}

fn pets_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_required_str(params, "clientId")?;
    let name = get_required_str(params, "name")?;
    let breed = get_optional_str(params, "breed")?;
    let notes = get_optional_str(params, "notes")?;
    require_row(conn, "clients", &client_id, "client")?;

    let pet_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO pets(id, client_id, name, breed, notes, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&pet_id, &client_id, &name, &breed, &notes, now_timestamp()),
    )
    .map_err(db_err("db_insert_failed", "create pet"))?;

    Ok(json!({ "petId": pet_id, "pet": load_pet(conn, &pet_id)? }))
}

fn pets_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pet_id = get_required_str(params, "petId")?;
    let patch = get_patch(params)?;
    require_row(conn, "pets", &pet_id, "pet")?;

    if patch.get("name").is_some() && get_optional_str(patch, "name")?.is_none() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "update pet"))?;
    for column in ["name", "breed", "notes"] {
        if patch.get(column).is_none() {
            continue;
        }
        let value = get_optional_str(patch, column)?;
        tx.execute(
            &format!("UPDATE pets SET {} = ? WHERE id = ?", column),
            (&value, &pet_id),
        )
        .map_err(db_err("db_update_failed", "update pet"))?;
    }
    if let Some(active) = get_optional_bool(patch, "active")? {
        tx.execute(
            "UPDATE pets SET active = ? WHERE id = ?",
            (active as i64, &pet_id),
        )
        .map_err(db_err("db_update_failed", "update pet"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "update pet"))?;

    Ok(json!({ "pet": load_pet(conn, &pet_id)? }))
}

fn pets_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let pet_id = get_required_str(params, "petId")?;
    require_row(conn, "pets", &pet_id, "pet")?;

    let referenced: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM booking_pets WHERE pet_id = ?",
            [&pet_id],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed", "delete pet"))?;

    // Booking history keeps its pets; retire the pet instead.
    if referenced > 0 {
        conn.execute("UPDATE pets SET active = 0 WHERE id = ?", [&pet_id])
            .map_err(db_err("db_update_failed", "delete pet"))?;
        return Ok(json!({ "deleted": false, "deactivated": true }));
    }

    conn.execute("DELETE FROM pets WHERE id = ?", [&pet_id])
        .map_err(db_err("db_delete_failed", "delete pet"))?;
    Ok(json!({ "deleted": true, "deactivated": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "pets.list" => pets_list,
        "pets.create" => pets_create,
        "pets.update" => pets_update,
        "pets.delete" => pets_delete,
        _ => return None,
    };
    Some(run(state, req, handler))
}
