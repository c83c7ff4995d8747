use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::handlers::slots::{booked_dogs, load_slot_state};
use crate::ipc::helpers::{
    begin_immediate, get_optional_str, get_required_str, get_str_array, require_admin,
    require_row, run, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{
    self, check_capacity, now_timestamp, BookingStatus, SlotStatus, CAPACITY_HOLDING_SQL,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

const BOOKING_SELECT: &str = "SELECT b.id, b.client_id, c.name, c.email, b.slot_id,
        COALESCE(s.starts_at, b.starts_at), COALESCE(s.ends_at, b.ends_at),
        s.walk_type, s.location, s.walker_id, w.name,
        b.status, b.notes, b.requested_at, b.created_by,
        b.decided_at, b.decided_by_user_id, b.decision_notes, b.updated_at
   FROM bookings b
   LEFT JOIN clients c ON c.id = b.client_id
   LEFT JOIN walk_slots s ON s.id = b.slot_id
   LEFT JOIN walkers w ON w.id = s.walker_id";

fn booking_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let status: String = r.get(11)?;
    let legacy = BookingStatus::parse(&status).ok().map(|s| s.legacy_label());
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "clientId": r.get::<_, String>(1)?,
        "clientName": r.get::<_, Option<String>>(2)?,
        "clientEmail": r.get::<_, Option<String>>(3)?,
        "slotId": r.get::<_, Option<String>>(4)?,
        "startsAt": r.get::<_, Option<String>>(5)?,
        "endsAt": r.get::<_, Option<String>>(6)?,
        "walkType": r.get::<_, Option<String>>(7)?,
        "location": r.get::<_, Option<String>>(8)?,
        "walkerId": r.get::<_, Option<String>>(9)?,
        "walkerName": r.get::<_, Option<String>>(10)?,
        "status": status,
        "legacyStatus": legacy,
        "notes": r.get::<_, Option<String>>(12)?,
        "requestedAt": r.get::<_, String>(13)?,
        "createdBy": r.get::<_, String>(14)?,
        "decidedAt": r.get::<_, Option<String>>(15)?,
        "decidedByUserId": r.get::<_, Option<String>>(16)?,
        "decisionNotes": r.get::<_, Option<String>>(17)?,
        "updatedAt": r.get::<_, Option<String>>(18)?,
    }))
}

fn attach_pets(conn: &Connection, booking: &mut serde_json::Value) -> Result<(), HandlerErr> {
    let Some(booking_id) = booking.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
        return Ok(());
    };
    let mut stmt = conn
        .prepare_cached(
            "SELECT p.id, p.name
               FROM booking_pets bp
               JOIN pets p ON p.id = bp.pet_id
              WHERE bp.booking_id = ?
              ORDER BY p.name COLLATE NOCASE",
        )
        .map_err(db_err("db_query_failed", "load booking pets"))?;
    let pets = stmt
        .query_map([&booking_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "load booking pets"))?;
    booking["dogCount"] = json!(pets.len());
    booking["pets"] = json!(pets);
    Ok(())
}

fn query_bookings(
    conn: &Connection,
    where_sql: &str,
    binds: Vec<Value>,
    order_sql: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!("{} {} {}", BOOKING_SELECT, where_sql, order_sql);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "list bookings"))?;
    let mut bookings = stmt
        .query_map(params_from_iter(binds), booking_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list bookings"))?;
    for b in bookings.iter_mut() {
        attach_pets(conn, b)?;
    }
    Ok(bookings)
}

pub fn load_booking(conn: &Connection, booking_id: &str) -> Result<serde_json::Value, HandlerErr> {
    query_bookings(
        conn,
        "WHERE b.id = ?",
        vec![Value::Text(booking_id.to_string())],
        "",
    )?
    .into_iter()
    .next()
    .ok_or_else(|| HandlerErr::not_found("booking not found"))
}

fn parse_pet_ids(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let pet_ids = get_str_array(params, "petIds")?;
    if pet_ids.is_empty() {
        return Err(HandlerErr::bad_params("petIds must not be empty"));
    }
    let mut seen = HashSet::new();
    if !pet_ids.iter().all(|id| seen.insert(id.as_str())) {
        return Err(HandlerErr::bad_params("petIds must not repeat"));
    }
    Ok(pet_ids)
}

fn check_pets_owned(conn: &Connection, client_id: &str, pet_ids: &[String]) -> Result<(), HandlerErr> {
    for pet_id in pet_ids {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT client_id, active FROM pets WHERE id = ?",
                [pet_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(db_err("db_query_failed", "look up pet"))?;
        match row {
            None => {
                return Err(HandlerErr::bad_params("pet not found")
                    .with_details(json!({ "petId": pet_id })))
            }
            Some((owner, _)) if owner != client_id => {
                return Err(HandlerErr::bad_params("pet does not belong to client")
                    .with_details(json!({ "petId": pet_id })))
            }
            Some((_, 0)) => {
                return Err(HandlerErr::bad_params("pet is inactive")
                    .with_details(json!({ "petId": pet_id })))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validates the slot can take `pet_ids` and returns nothing on success.
/// Must run inside an immediate transaction together with the insert.
fn reserve_on_slot(
    conn: &Connection,
    slot_id: &str,
    pet_ids: &[String],
    allow_locked: bool,
) -> Result<(), HandlerErr> {
    let slot = load_slot_state(conn, slot_id)?;
    match slot.status {
        SlotStatus::Available => {}
        SlotStatus::Locked if allow_locked => {}
        SlotStatus::Cancelled => return Err(HandlerErr::invalid_state("slot is cancelled")),
        SlotStatus::Locked => return Err(HandlerErr::invalid_state("slot is not available")),
    }

    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT COUNT(*)
               FROM booking_pets bp
               JOIN bookings b ON b.id = bp.booking_id
              WHERE b.slot_id = ? AND bp.pet_id = ? AND b.status IN {}",
            CAPACITY_HOLDING_SQL
        ))
        .map_err(db_err("db_query_failed", "check slot bookings"))?;
    for pet_id in pet_ids {
        let n: i64 = stmt
            .query_row((slot_id, pet_id), |r| r.get(0))
            .map_err(db_err("db_query_failed", "check slot bookings"))?;
        if n > 0 {
            return Err(HandlerErr::invalid_state("pet is already booked on this slot")
                .with_details(json!({ "petId": pet_id })));
        }
    }

    let booked = booked_dogs(conn, slot_id)?;
    check_capacity(slot.capacity_dogs, booked, pet_ids.len() as i64)?;
    Ok(())
}

struct NewBooking<'a> {
    client_id: &'a str,
    slot_id: Option<&'a str>,
    starts_at: Option<String>,
    ends_at: Option<String>,
    status: BookingStatus,
    notes: Option<String>,
    created_by: &'static str,
    decided_by: Option<&'a str>,
}

fn insert_booking(conn: &Connection, b: &NewBooking<'_>, pet_ids: &[String]) -> Result<String, HandlerErr> {
    let booking_id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    let decided_at = b.decided_by.map(|_| now.clone());
    conn.execute(
        "INSERT INTO bookings(id, client_id, slot_id, starts_at, ends_at, status, notes,
                              requested_at, created_by, decided_at, decided_by_user_id, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &booking_id,
            b.client_id,
            b.slot_id,
            &b.starts_at,
            &b.ends_at,
            b.status.as_str(),
            &b.notes,
            &now,
            b.created_by,
            &decided_at,
            b.decided_by,
            &now,
        ),
    )
    .map_err(db_err("db_insert_failed", "create booking"))?;
    for pet_id in pet_ids {
        conn.execute(
            "INSERT INTO booking_pets(booking_id, pet_id) VALUES(?, ?)",
            (&booking_id, pet_id),
        )
        .map_err(db_err("db_insert_failed", "create booking"))?;
    }
    Ok(booking_id)
}

fn bookings_request(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let client_id = get_required_str(params, "clientId")?;
    let slot_id = get_required_str(params, "slotId")?;
    let pet_ids = parse_pet_ids(params)?;
    let notes = get_optional_str(params, "notes")?;

    let tx = begin_immediate(conn, "submit booking request")?;
    require_row(&tx, "clients", &client_id, "client")?;
    check_pets_owned(&tx, &client_id, &pet_ids)?;
    reserve_on_slot(&tx, &slot_id, &pet_ids, false)?;
    let booking_id = insert_booking(
        &tx,
        &NewBooking {
            client_id: &client_id,
            slot_id: Some(&slot_id),
            starts_at: None,
            ends_at: None,
            status: BookingStatus::PendingApproval,
            notes,
            created_by: "client",
            decided_by: None,
        },
        &pet_ids,
    )?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "submit booking request"))?;

    tracing::info!(booking_id = %booking_id, slot_id = %slot_id, dogs = pet_ids.len(), "booking requested");
    Ok(json!({ "bookingId": booking_id, "booking": load_booking(conn, &booking_id)? }))
}

fn bookings_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let actor = require_admin(conn, params)?;
    let client_id = get_required_str(params, "clientId")?;
    let pet_ids = parse_pet_ids(params)?;
    let notes = get_optional_str(params, "notes")?;
    let slot_id = get_optional_str(params, "slotId")?;
    let status = get_optional_str(params, "status")?
        .map(|s| BookingStatus::parse(&s))
        .transpose()?
        .unwrap_or(BookingStatus::Draft);
    if !matches!(status, BookingStatus::Draft | BookingStatus::Approved) {
        return Err(HandlerErr::bad_params(
            "admin bookings start as DRAFT or APPROVED",
        ));
    }

    let has_times = get_optional_str(params, "startsAt")?.is_some()
        || get_optional_str(params, "endsAt")?.is_some();
    let (starts_at, ends_at) = if slot_id.is_some() {
        if has_times {
            return Err(HandlerErr::bad_params(
                "give either slotId or startsAt/endsAt, not both",
            ));
        }
        (None, None)
    } else {
        let starts = workflow::parse_timestamp(&get_required_str(params, "startsAt")?)?;
        let ends = workflow::parse_timestamp(&get_required_str(params, "endsAt")?)?;
        workflow::validate_time_range(starts, ends)?;
        (
            Some(workflow::format_timestamp(starts)),
            Some(workflow::format_timestamp(ends)),
        )
    };

    let tx = begin_immediate(conn, "create booking")?;
    require_row(&tx, "clients", &client_id, "client")?;
    check_pets_owned(&tx, &client_id, &pet_ids)?;
    if let Some(sid) = slot_id.as_deref() {
        reserve_on_slot(&tx, sid, &pet_ids, true)?;
    }
    let booking_id = insert_booking(
        &tx,
        &NewBooking {
            client_id: &client_id,
            slot_id: slot_id.as_deref(),
            starts_at,
            ends_at,
            status,
            notes,
            created_by: "admin",
            decided_by: (status == BookingStatus::Approved).then_some(actor.as_str()),
        },
        &pet_ids,
    )?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "create booking"))?;

    tracing::info!(booking_id = %booking_id, status = status.as_str(), "admin booking created");
    Ok(json!({ "bookingId": booking_id, "booking": load_booking(conn, &booking_id)? }))
}

const SLOT_NOT_CANCELLED_SQL: &str = "(slot_id IS NULL OR slot_id NOT IN
        (SELECT id FROM walk_slots WHERE status = 'CANCELLED'))";

/// Why a booking cannot be approved, read after a guarded update matched nothing.
fn approval_blocker(conn: &Connection, booking_id: &str) -> Result<HandlerErr, HandlerErr> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT b.status, s.status
               FROM bookings b
               LEFT JOIN walk_slots s ON s.id = b.slot_id
              WHERE b.id = ?",
            [booking_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed", "look up booking"))?;
    Ok(match row {
        None => HandlerErr::not_found("booking not found"),
        Some((status, _)) if status != BookingStatus::PendingApproval.as_str() => {
            HandlerErr::invalid_state("booking is not pending approval")
        }
        Some((_, Some(slot))) if slot == SlotStatus::Cancelled.as_str() => {
            HandlerErr::invalid_state("slot is cancelled")
        }
        Some(_) => HandlerErr::invalid_state("booking is not pending approval"),
    })
}

/// Approve/deny a pending request with a single conditional update, so a
/// stale decision can never overwrite a newer one. Approval also requires
/// the slot to still be live.
fn decide(
    conn: &Connection,
    params: &serde_json::Value,
    next: BookingStatus,
    action: &'static str,
) -> Result<serde_json::Value, HandlerErr> {
    let booking_id = get_required_str(params, "bookingId")?;
    let actor = require_admin(conn, params)?;
    let decision_notes = get_optional_str(params, "decisionNotes")?;

    let slot_guard = if next == BookingStatus::Approved {
        format!(" AND {}", SLOT_NOT_CANCELLED_SQL)
    } else {
        String::new()
    };
    let now = now_timestamp();
    let changed = conn
        .execute(
            &format!(
                "UPDATE bookings
                    SET status = ?, decided_at = ?, decided_by_user_id = ?, decision_notes = ?, updated_at = ?
                  WHERE id = ? AND status = 'PENDING_APPROVAL'{}",
                slot_guard
            ),
            (
                next.as_str(),
                &now,
                &actor,
                &decision_notes,
                &now,
                &booking_id,
            ),
        )
        .map_err(db_err("db_update_failed", action))?;
    if changed == 0 {
        return Err(approval_blocker(conn, &booking_id)?);
    }

    tracing::info!(booking_id = %booking_id, actor = %actor, status = next.as_str(), "booking decided");
    Ok(json!({ "success": true, "booking": load_booking(conn, &booking_id)? }))
}

fn bookings_approve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    decide(conn, params, BookingStatus::Approved, "approve booking")
}

fn bookings_deny(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    decide(conn, params, BookingStatus::Denied, "deny booking")
}

/// Moves a booking along the state machine. `client_scope` hides bookings
/// owned by other clients; `decided_by` stamps the decision columns.
fn move_booking(
    conn: &Connection,
    booking_id: &str,
    next: BookingStatus,
    client_scope: Option<&str>,
    decided_by: Option<(&str, Option<String>)>,
) -> Result<serde_json::Value, HandlerErr> {
    let tx = begin_immediate(conn, "update booking")?;
    let row: Option<(String, String)> = tx
        .query_row(
            "SELECT status, client_id FROM bookings WHERE id = ?",
            [booking_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed", "update booking"))?;
    let Some((raw_status, owner)) = row else {
        return Err(HandlerErr::not_found("booking not found"));
    };
    if client_scope.is_some_and(|cid| cid != owner) {
        return Err(HandlerErr::not_found("booking not found"));
    }
    let current = BookingStatus::parse(&raw_status)?;
    if let Err(e) = current.transition(next) {
        let allowed: Vec<&str> = BookingStatus::sources_of(next)
            .into_iter()
            .map(BookingStatus::as_str)
            .collect();
        return Err(HandlerErr::from(e).with_details(json!({
            "status": current.as_str(),
            "terminal": current.is_terminal(),
            "allowedFrom": allowed,
        })));
    }

    if next == BookingStatus::Approved {
        let slot_status: Option<String> = tx
            .query_row(
                "SELECT s.status FROM bookings b JOIN walk_slots s ON s.id = b.slot_id WHERE b.id = ?",
                [booking_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err("db_query_failed", "update booking"))?;
        if slot_status.as_deref() == Some(SlotStatus::Cancelled.as_str()) {
            return Err(HandlerErr::invalid_state("slot is cancelled"));
        }
    }

    let now = now_timestamp();
    tx.execute(
        "UPDATE bookings SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        (next.as_str(), &now, booking_id, current.as_str()),
    )
    .map_err(db_err("db_update_failed", "update booking"))?;
    if let Some((actor, notes)) = decided_by {
        tx.execute(
            "UPDATE bookings SET decided_at = ?, decided_by_user_id = ?, decision_notes = ? WHERE id = ?",
            (&now, actor, &notes, booking_id),
        )
        .map_err(db_err("db_update_failed", "update booking"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "update booking"))?;

    tracing::info!(
        booking_id = %booking_id,
        from = current.as_str(),
        to = next.as_str(),
        released_capacity = current.holds_capacity() && !next.holds_capacity(),
        "booking status changed"
    );
    Ok(json!({
        "success": true,
        "previousStatus": current.as_str(),
        "booking": load_booking(conn, booking_id)?
    }))
}

fn bookings_complete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let booking_id = get_required_str(params, "bookingId")?;
    require_admin(conn, params)?;
    move_booking(conn, &booking_id, BookingStatus::Completed, None, None)
}

fn bookings_cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let booking_id = get_required_str(params, "bookingId")?;
    match get_optional_str(params, "clientId")? {
        Some(client_id) => move_booking(
            conn,
            &booking_id,
            BookingStatus::Cancelled,
            Some(&client_id),
            None,
        ),
        None => {
            require_admin(conn, params)?;
            move_booking(conn, &booking_id, BookingStatus::Cancelled, None, None)
        }
    }
}

fn bookings_transition(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let booking_id = get_required_str(params, "bookingId")?;
    let actor = require_admin(conn, params)?;
    let next = BookingStatus::parse(&get_required_str(params, "status")?)?;
    let decision = matches!(next, BookingStatus::Approved | BookingStatus::Denied)
        .then(|| get_optional_str(params, "decisionNotes"))
        .transpose()?
        .map(|notes| (actor.as_str(), notes));
    move_booking(conn, &booking_id, next, None, decision)
}

fn bookings_requests(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let requests = query_bookings(
        conn,
        "WHERE b.status = 'PENDING_APPROVAL'",
        Vec::new(),
        "ORDER BY b.requested_at, b.rowid",
    )?;
    Ok(json!({ "requests": requests }))
}

fn bookings_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut where_sql = String::from("WHERE 1 = 1");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(cid) = get_optional_str(params, "clientId")? {
        where_sql.push_str(" AND b.client_id = ?");
        binds.push(Value::Text(cid));
    }
    if let Some(sid) = get_optional_str(params, "slotId")? {
        where_sql.push_str(" AND b.slot_id = ?");
        binds.push(Value::Text(sid));
    }
    if let Some(raw) = get_optional_str(params, "status")? {
        let status = BookingStatus::parse(&raw)?;
        where_sql.push_str(" AND b.status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }
    let bookings = query_bookings(
        conn,
        &where_sql,
        binds,
        "ORDER BY COALESCE(s.starts_at, b.starts_at), b.requested_at, b.rowid",
    )?;
    Ok(json!({ "bookings": bookings }))
}

fn bookings_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let booking_id = get_required_str(params, "bookingId")?;
    let booking = load_booking(conn, &booking_id)?;
    if let Some(cid) = get_optional_str(params, "clientId")? {
        if booking.get("clientId").and_then(|v| v.as_str()) != Some(cid.as_str()) {
            return Err(HandlerErr::not_found("booking not found"));
        }
    }
    Ok(json!({ "booking": booking }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "bookings.request" => bookings_request,
        "bookings.create" => bookings_create,
        "bookings.approve" => bookings_approve,
        "bookings.deny" => bookings_deny,
        "bookings.complete" => bookings_complete,
        "bookings.cancel" => bookings_cancel,
        "bookings.transition" => bookings_transition,
        "bookings.requests" => bookings_requests,
        "bookings.list" => bookings_list,
        "bookings.get" => bookings_get,
        _ => return None,
    };
    Some(run(state, req, handler))
}
