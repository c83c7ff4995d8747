use crate::workflow::BookingStatus;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "walkbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            address TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS walkers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL,
            client_id TEXT,
            walker_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(client_id) REFERENCES clients(id),
            FOREIGN KEY(walker_id) REFERENCES walkers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pets(
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            name TEXT NOT NULL,
            breed TEXT,
            notes TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(client_id) REFERENCES clients(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pets_client ON pets(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS walk_slots(
            id TEXT PRIMARY KEY,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            walk_type TEXT NOT NULL,
            capacity_dogs INTEGER NOT NULL,
            walker_id TEXT,
            status TEXT NOT NULL DEFAULT 'AVAILABLE',
            location TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(walker_id) REFERENCES walkers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_walk_slots_starts ON walk_slots(starts_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bookings(
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            slot_id TEXT,
            starts_at TEXT,
            ends_at TEXT,
            status TEXT NOT NULL,
            notes TEXT,
            requested_at TEXT NOT NULL,
            created_by TEXT NOT NULL DEFAULT 'client',
            decided_at TEXT,
            decided_by_user_id TEXT,
            decision_notes TEXT,
            updated_at TEXT,
            FOREIGN KEY(client_id) REFERENCES clients(id),
            FOREIGN KEY(slot_id) REFERENCES walk_slots(id)
        )",
        [],
    )?;
    ensure_bookings_columns(&conn)?;
    // Workspaces created before the status fold carry booking_status next to status.
    migrate_booking_statuses(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_slot ON bookings(slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_client ON bookings(client_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bookings_status_requested ON bookings(status, requested_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS booking_pets(
            booking_id TEXT NOT NULL,
            pet_id TEXT NOT NULL,
            PRIMARY KEY(booking_id, pet_id),
            FOREIGN KEY(booking_id) REFERENCES bookings(id),
            FOREIGN KEY(pet_id) REFERENCES pets(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_booking_pets_pet ON booking_pets(pet_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_records(
            id TEXT PRIMARY KEY,
            walker_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            leave_type TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(walker_id) REFERENCES walkers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_records_walker ON leave_records(walker_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_bookings_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, decl) in [
        ("starts_at", "TEXT"),
        ("ends_at", "TEXT"),
        ("notes", "TEXT"),
        ("requested_at", "TEXT NOT NULL DEFAULT ''"),
        ("created_by", "TEXT NOT NULL DEFAULT 'client'"),
        ("decided_at", "TEXT"),
        ("decided_by_user_id", "TEXT"),
        ("decision_notes", "TEXT"),
        ("updated_at", "TEXT"),
    ] {
        if !table_has_column(conn, "bookings", column)? {
            conn.execute(
                &format!("ALTER TABLE bookings ADD COLUMN {} {}", column, decl),
                [],
            )?;
        }
    }
    Ok(())
}

fn migrate_booking_statuses(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "bookings", "booking_status")? {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    let rows = {
        let mut stmt = tx.prepare("SELECT id, booking_status, status FROM bookings")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for (id, booking_status, status) in &rows {
        let folded = BookingStatus::from_legacy(booking_status.as_deref(), status.as_deref());
        tx.execute(
            "UPDATE bookings SET status = ? WHERE id = ?",
            (folded.as_str(), id),
        )?;
    }

    // DROP COLUMN refuses indexed columns.
    let index_names = {
        let mut stmt = tx.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = 'bookings' AND sql LIKE '%booking_status%'",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        names
    };
    for name in index_names {
        tx.execute(&format!("DROP INDEX IF EXISTS \"{}\"", name), [])?;
    }
    tx.execute("ALTER TABLE bookings DROP COLUMN booking_status", [])?;
    tx.commit()?;

    tracing::info!(rows = rows.len(), "folded legacy booking statuses");
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
