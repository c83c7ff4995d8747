use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_walkbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("WALKBOOK_WORKSPACE")
        .env_remove("WALKBOOK_HTTP_ADDR")
        .spawn()
        .expect("spawn walkbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn legacy_dual_status_rows_fold_into_one_status() {
    let workspace = temp_dir("walkbook-legacy-status");
    {
        let conn = rusqlite::Connection::open(workspace.join("walkbook.sqlite3")).expect("open legacy db");
        conn.execute_batch(
            "CREATE TABLE clients(
                 id TEXT PRIMARY KEY,
                 name TEXT NOT NULL,
                 email TEXT,
                 phone TEXT,
                 address TEXT,
                 notes TEXT,
                 created_at TEXT NOT NULL,
                 updated_at TEXT
             );
             CREATE TABLE bookings(
                 id TEXT PRIMARY KEY,
                 client_id TEXT NOT NULL,
                 slot_id TEXT,
                 status TEXT NOT NULL,
                 booking_status TEXT,
                 requested_at TEXT NOT NULL
             );
             CREATE INDEX idx_bookings_booking_status ON bookings(booking_status);
             INSERT INTO clients(id, name, created_at) VALUES('c1', 'Legacy Client', '2023-01-01T00:00:00Z');
             INSERT INTO bookings VALUES('b1', 'c1', NULL, 'pending',   'PENDING_APPROVAL', '2023-01-01T00:00:01Z');
             INSERT INTO bookings VALUES('b2', 'c1', NULL, 'scheduled', 'APPROVED',         '2023-01-01T00:00:02Z');
             INSERT INTO bookings VALUES('b3', 'c1', NULL, 'completed', 'APPROVED',         '2023-01-01T00:00:03Z');
             INSERT INTO bookings VALUES('b4', 'c1', NULL, 'cancelled', 'PENDING_APPROVAL', '2023-01-01T00:00:04Z');
             INSERT INTO bookings VALUES('b5', 'c1', NULL, 'scheduled', NULL,               '2023-01-01T00:00:05Z');",
        )
        .expect("seed legacy schema");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "2", "bookings.list", json!({}));
    let mut statuses: Vec<(String, String, String)> = listed["bookings"]
        .as_array()
        .expect("bookings array")
        .iter()
        .map(|b| {
            (
                b["id"].as_str().unwrap_or_default().to_string(),
                b["status"].as_str().unwrap_or_default().to_string(),
                b["legacyStatus"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    statuses.sort();
    let expected = [
        ("b1", "PENDING_APPROVAL", "pending"),
        ("b2", "APPROVED", "scheduled"),
        ("b3", "COMPLETED", "completed"),
        ("b4", "CANCELLED", "cancelled"),
        ("b5", "APPROVED", "scheduled"),
    ]
    .iter()
    .map(|(a, b, c)| (a.to_string(), b.to_string(), c.to_string()))
    .collect::<Vec<_>>();
    assert_eq!(statuses, expected);

    let queue = request_ok(&mut stdin, &mut reader, "3", "bookings.requests", json!({}));
    assert_eq!(queue["requests"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();

    let conn = rusqlite::Connection::open(workspace.join("walkbook.sqlite3")).expect("reopen db");
    let mut stmt = conn.prepare("PRAGMA table_info(bookings)").expect("table info");
    let columns: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(1))
        .expect("query columns")
        .collect::<Result<_, _>>()
        .expect("collect columns");
    assert!(!columns.iter().any(|c| c == "booking_status"));
    assert!(columns.iter().any(|c| c == "decided_by_user_id"));
}

#[test]
fn reopening_a_migrated_workspace_is_a_no_op() {
    let workspace = temp_dir("walkbook-legacy-reopen");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    for i in 0..2 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("open-{}", i),
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
    }
    let listed = request_ok(&mut stdin, &mut reader, "list", "bookings.list", json!({}));
    assert_eq!(listed["bookings"].as_array().map(|a| a.len()), Some(0));
    drop(stdin);
    let _ = child.wait();
}
