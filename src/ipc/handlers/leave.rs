use crate::ipc::error::{db_err, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_patch, get_required_str, require_row, run, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{self, now_timestamp, LeaveStatus, LeaveType};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const LEAVE_SELECT: &str = "SELECT l.id, l.walker_id, w.name, l.start_date, l.end_date,
        l.leave_type, l.status, l.notes, l.created_at
   FROM leave_records l
   LEFT JOIN walkers w ON w.id = l.walker_id";

fn leave_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "walkerId": r.get::<_, String>(1)?,
        "walkerName": r.get::<_, Option<String>>(2)?,
        "startDate": r.get::<_, String>(3)?,
        "endDate": r.get::<_, String>(4)?,
        "leaveType": r.get::<_, String>(5)?,
        "status": r.get::<_, String>(6)?,
        "notes": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
    }))
}

fn load_leave(conn: &Connection, leave_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE l.id = ?", LEAVE_SELECT),
        [leave_id],
        leave_json,
    )
    .optional()
    .map_err(db_err("db_query_failed", "load leave record"))?
    .ok_or_else(|| HandlerErr::not_found("leave record not found"))
}

fn leave_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = format!("{} WHERE 1 = 1", LEAVE_SELECT);
    let mut binds: Vec<Value> = Vec::new();
    if let Some(raw) = get_optional_str(params, "status")? {
        let status = LeaveStatus::parse(&raw)?;
        sql.push_str(" AND l.status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(walker_id) = get_optional_str(params, "walkerId")? {
        sql.push_str(" AND l.walker_id = ?");
        binds.push(Value::Text(walker_id));
    }
    sql.push_str(" ORDER BY l.start_date, l.created_at");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("db_query_failed", "list leave records"))?;
    let records = stmt
        .query_map(params_from_iter(binds), leave_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed", "list leave records"))?;
    Ok(json!({ "leave": records }))
}

fn leave_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let walker_id = get_required_str(params, "walkerId")?;
    let start = workflow::parse_date(&get_required_str(params, "startDate")?)?;
    let end = workflow::parse_date(&get_required_str(params, "endDate")?)?;
    workflow::validate_date_range(start, end)?;
    let leave_type = get_optional_str(params, "leaveType")?
        .map(|s| LeaveType::parse(&s))
        .transpose()?
        .unwrap_or(LeaveType::Vacation);
    let status = get_optional_str(params, "status")?
        .map(|s| LeaveStatus::parse(&s))
        .transpose()?
        .unwrap_or(LeaveStatus::Pending);
    let notes = get_optional_str(params, "notes")?;
    require_row(conn, "walkers", &walker_id, "walker")?;

    let leave_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO leave_records(id, walker_id, start_date, end_date, leave_type, status, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &leave_id,
            &walker_id,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
            leave_type.as_str(),
            status.as_str(),
            &notes,
            now_timestamp(),
        ),
    )
    .map_err(db_err("db_insert_failed", "create leave record"))?;

    Ok(json!({ "leaveId": leave_id, "leave": load_leave(conn, &leave_id)? }))
}

fn leave_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let leave_id = get_required_str(params, "leaveId")?;
    let patch = get_patch(params)?;

    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT start_date, end_date FROM leave_records WHERE id = ?",
            [&leave_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed", "update leave record"))?;
    let Some((cur_start, cur_end)) = current else {
        return Err(HandlerErr::not_found("leave record not found"));
    };

    let start = workflow::parse_date(&get_optional_str(patch, "startDate")?.unwrap_or(cur_start))?;
    let end = workflow::parse_date(&get_optional_str(patch, "endDate")?.unwrap_or(cur_end))?;
    workflow::validate_date_range(start, end)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "update leave record"))?;
    tx.execute(
        "UPDATE leave_records SET start_date = ?, end_date = ? WHERE id = ?",
        (
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
            &leave_id,
        ),
    )
    .map_err(db_err("db_update_failed", "update leave record"))?;
    if let Some(raw) = get_optional_str(patch, "leaveType")? {
        let leave_type = LeaveType::parse(&raw)?;
        tx.execute(
            "UPDATE leave_records SET leave_type = ? WHERE id = ?",
            (leave_type.as_str(), &leave_id),
        )
        .map_err(db_err("db_update_failed", "update leave record"))?;
    }
    if let Some(raw) = get_optional_str(patch, "status")? {
        let status = LeaveStatus::parse(&raw)?;
        tx.execute(
            "UPDATE leave_records SET status = ? WHERE id = ?",
            (status.as_str(), &leave_id),
        )
        .map_err(db_err("db_update_failed", "update leave record"))?;
    }
    if patch.get("notes").is_some() {
        let notes = get_optional_str(patch, "notes")?;
        tx.execute(
            "UPDATE leave_records SET notes = ? WHERE id = ?",
            (&notes, &leave_id),
        )
        .map_err(db_err("db_update_failed", "update leave record"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "update leave record"))?;

    Ok(json!({ "leave": load_leave(conn, &leave_id)? }))
}

fn leave_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let leave_id = get_required_str(params, "leaveId")?;
    let changed = conn
        .execute("DELETE FROM leave_records WHERE id = ?", [&leave_id])
        .map_err(db_err("db_delete_failed", "delete leave record"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("leave record not found"));
    }
    Ok(json!({ "success": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: HandlerFn = match req.method.as_str() {
        "leave.list" => leave_list,
        "leave.create" => leave_create,
        "leave.update" => leave_update,
        "leave.delete" => leave_delete,
        _ => return None,
    };
    Some(run(state, req, handler))
}
