use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::helpers::{
    begin_immediate, get_optional_bool, get_optional_str, get_patch, get_required_i64,
    get_required_str, require_row, run, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{
    self, now_timestamp, spots_remaining, validate_capacity, validate_time_range, SlotStatus,
    WalkType, CAPACITY_HOLDING_SQL,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SlotState {
    pub status: SlotStatus,
    pub capacity_dogs: i64,
    pub starts_at: String,
    pub ends_at: String,
}

fn slot_select_sql() -> String {
    format!(
        "SELECT s.id, s.starts_at, s.ends_at, s.walk_type, s.capacity_dogs, s.walker_id, w.name,
                s.status, s.location,
                (SELECT COUNT(*)
                   FROM booking_pets bp
                   JOIN bookings b ON b.id = bp.booking_id
                  WHERE b.slot_id = s.id AND b.status IN {}) AS booked_dogs
           FROM walk_slots s
           LEFT JOIN walkers w ON w.id = s.walker_id",
        CAPACITY_HOLDING_SQL
    )
}

fn slot_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let capacity: i64 = r.get(4)?;
    let booked: i64 = r.get(9)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "startsAt": r.get::<_, String>(1)?,
        "endsAt": r.get::<_, String>(2)?,
        "walkType": r.get::<_, String>(3)?,
        "capacityDogs": capacity,
        "walkerId": r.get::<_, Option<String>>(5)?,
        "walkerName": r.get::<_, Option<String>>(6)?,
        "status": r.get::<_, String>(7)?,
        "location": r.get::<_, Option<String>>(8)?,
        "bookedDogs": booked,
        "spotsRemaining": spots_remaining(capacity, booked),
    }))
}

pub fn load_slot(conn: &Connection, slot_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", slot_select_sql()),
        [slot_id],
        slot_json,
    )
    .optional()
    .map_err(db_err("db_query_failed", "load slot"))?
    .ok_or_else(|| HandlerErr::not_found("slot not found"))
}

pub fn load_slot_state(conn: &Connection, slot_id: &str) -> Result<SlotState, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT status, capacity_dogs, starts_at, ends_at FROM walk_slots WHERE id = ?",
            [slot_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed", "load slot"))?;
    let Some((status, capacity_dogs, starts_at, ends_at)) = row else {
        return Err(HandlerErr::not_found("slot not found"));
    };
    Ok(SlotState {
        status: SlotStatus::parse(&status)?,
        capacity_dogs,
        starts_at,
        ends_at,
    })
}

/// Dogs currently holding capacity on the slot.
pub fn booked_dogs(conn: &Connection, slot_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*)
               FROM booking_pets bp
               JOIN bookings b ON b.id = bp.booking_id
              WHERE b.slot_id = ? AND b.status IN {}",
            CAPACITY_HOLDING_SQL
        ),
        [slot_id],
        |r| r.get(0),
    )
    .map_err(db_err("db_query_failed", "count booked dogs"))
}

fn slots_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let from = get_optional_str(params, "from")?
        .map(|s| workflow::normalize_timestamp(&s))
        .transpose()?;
    let to = get_optional_str(params, "to")?
        .map(|s| workflow::normalize_timestamp(&s))
        .transpose()?;
    let status = get_optional_str(params, "status")?
        .map(|s| SlotStatus::parse(&s))
        .transpose()?;
    let walker_id = get_optional_str(params, "walkerId")?;
    let bookable_only = get_optional_bool(params, "bookableOnly")?.unwrap_or(false);

    let mut sql = format!("{} WHERE 1 = 1", slot_select_sql());
    let mut binds: Vec<Value> = Vec::new();
    if let Some(f) = from {
        sql.push_str(" AND s.starts_at >= ?");
        binds.push(Value::Text(f));
    }
    if let Some(t) = to {
        sql.push_str(" AND s.starts_at < ?");
        binds.push(Value::Text(t));
    }
    if bookable_only {
        sql.push_str(" AND s.status = 'AVAILABLE'");
    } else if let Some(st) = status {
        sql.push_str(" AND s.status = ?");
        binds.push(Value::Text(st.as_str().to_string()));
    }
    if let Some(w) = walker_id {
        sql.push_str(" AND s.walker_id = ?");
        binds.push(Value::Text(w));
    }
    sql.push_str(" ORDER BY s.starts_at, s.created_at");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "list slots"))?;
    let mut slots = stmt
        .query_map(params_from_iter(binds), slot_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list slots"))?;
    if bookable_only {
        slots.retain(|s| s.get("spotsRemaining").and_then(|v| v.as_i64()).unwrap_or(0) > 0);
    }
    Ok(json!({ "slots": slots }))
}

fn slots_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    Ok(json!({ "slot": load_slot(conn, &slot_id)? }))
}

fn slots_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let starts_at = workflow::parse_timestamp(&get_required_str(params, "startsAt")?)?;
    let ends_at = workflow::parse_timestamp(&get_required_str(params, "endsAt")?)?;
    validate_time_range(starts_at, ends_at)?;
    let walk_type = get_optional_str(params, "walkType")?
        .map(|s| WalkType::parse(&s))
        .transpose()?
        .unwrap_or(WalkType::Group);
    let capacity_dogs = get_required_i64(params, "capacityDogs")?;
    validate_capacity(capacity_dogs)?;
    let walker_id = get_optional_str(params, "walkerId")?;
    if let Some(w) = walker_id.as_deref() {
        require_row(conn, "walkers", w, "walker")?;
    }
    let location = get_optional_str(params, "location")?;

    let slot_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO walk_slots(id, starts_at, ends_at, walk_type, capacity_dogs, walker_id, status, location, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 'AVAILABLE', ?, ?)",
        (
            &slot_id,
            workflow::format_timestamp(starts_at),
            workflow::format_timestamp(ends_at),
            walk_type.as_str(),
            capacity_dogs,
            &walker_id,
            &location,
            now_timestamp(),
        ),
    )
    .map_err(db_err("db_insert_failed", "create slot"))?;

    tracing::info!(slot_id = %slot_id, capacity_dogs, "slot created");
    Ok(json!({ "slotId": slot_id, "slot": load_slot(conn, &slot_id)? }))
}

fn slots_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let patch = get_patch(params)?;

    let tx = begin_immediate(conn, "update slot")?;
    let current = load_slot_state(&tx, &slot_id)?;
    if current.status == SlotStatus::Cancelled {
        return Err(HandlerErr::invalid_state("slot is cancelled"));
    }

    let starts_raw = get_optional_str(patch, "startsAt")?.unwrap_or(current.starts_at);
    let ends_raw = get_optional_str(patch, "endsAt")?.unwrap_or(current.ends_at);
    let starts_at = workflow::parse_timestamp(&starts_raw)?;
    let ends_at = workflow::parse_timestamp(&ends_raw)?;
    validate_time_range(starts_at, ends_at)?;
    tx.execute(
        "UPDATE walk_slots SET starts_at = ?, ends_at = ? WHERE id = ?",
        (
            workflow::format_timestamp(starts_at),
            workflow::format_timestamp(ends_at),
            &slot_id,
        ),
    )
    .map_err(db_err("db_update_failed", "update slot"))?;

    if let Some(raw) = get_optional_str(patch, "walkType")? {
        let walk_type = WalkType::parse(&raw)?;
        tx.execute(
            "UPDATE walk_slots SET walk_type = ? WHERE id = ?",
            (walk_type.as_str(), &slot_id),
        )
        .map_err(db_err("db_update_failed", "update slot"))?;
    }

    if patch.get("capacityDogs").is_some() {
        let capacity_dogs = get_required_i64(patch, "capacityDogs")?;
        validate_capacity(capacity_dogs)?;
        let booked = booked_dogs(&tx, &slot_id)?;
        if capacity_dogs < booked {
            return Err(HandlerErr::new(
                "capacity_exceeded",
                "capacity_dogs cannot drop below the dogs already booked",
            )
            .with_details(json!({ "bookedDogs": booked })));
        }
        tx.execute(
            "UPDATE walk_slots SET capacity_dogs = ? WHERE id = ?",
            (capacity_dogs, &slot_id),
        )
        .map_err(db_err("db_update_failed", "update slot"))?;
    }

    if patch.get("walkerId").is_some() {
        let walker_id = get_optional_str(patch, "walkerId")?;
        if let Some(w) = walker_id.as_deref() {
            require_row(&tx, "walkers", w, "walker")?;
        }
        tx.execute(
            "UPDATE walk_slots SET walker_id = ? WHERE id = ?",
            (&walker_id, &slot_id),
        )
        .map_err(db_err("db_update_failed", "update slot"))?;
    }

    if patch.get("location").is_some() {
        let location = get_optional_str(patch, "location")?;
        tx.execute(
            "UPDATE walk_slots SET location = ? WHERE id = ?",
            (&location, &slot_id),
        )
        .map_err(db_err("db_update_failed", "update slot"))?;
    }

    if let Some(raw) = get_optional_str(patch, "status")? {
        let status = SlotStatus::parse(&raw)?;
        if status == SlotStatus::Cancelled {
            return Err(HandlerErr::bad_params("use slots.cancel to cancel a slot"));
        }
        tx.execute(
            "UPDATE walk_slots SET status = ? WHERE id = ?",
            (status.as_str(), &slot_id),
        )
        .map_err(db_err("db_update_failed", "update slot"))?;
    }

    tx.execute(
        "UPDATE walk_slots SET updated_at = ? WHERE id = ?",
        (now_timestamp(), &slot_id),
    )
    .map_err(db_err("db_update_failed", "update slot"))?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "update slot"))?;

    Ok(json!({ "slot": load_slot(conn, &slot_id)? }))
}

fn slots_cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let changed = conn
        .execute(
            "UPDATE walk_slots SET status = 'CANCELLED', updated_at = ?
             WHERE id = ? AND status != 'CANCELLED'",
            (now_timestamp(), &slot_id),
        )
        .map_err(db_err("db_update_failed", "cancel slot"))?;
    if changed == 0 {
        require_row(conn, "walk_slots", &slot_id, "slot")?;
        return Err(HandlerErr::invalid_state("slot is already cancelled"));
    }

    tracing::info!(slot_id = %slot_id, "slot cancelled");
    Ok(json!({ "success": true, "slot": load_slot(conn, &slot_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "slots.list" => slots_list,
        "slots.get" => slots_get,
        "slots.create" => slots_create,
        "slots.update" => slots_update,
        "slots.cancel" => slots_cancel,
        _ => return None,
    };
    Some(run(state, req, handler))
}
