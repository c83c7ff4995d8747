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

struct Seed {
    admin_id: String,
    client_id: String,
    pet_ids: Vec<String>,
    slot_id: String,
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

/// Opens a fresh workspace with one admin, one client owning `pets` dogs,
/// and one slot holding `capacity` dogs.
fn seed(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
    capacity: i64,
    pets: usize,
) -> Seed {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        stdin,
        reader,
        "seed-admin",
        "users.create",
        json!({ "email": "office@example.com", "displayName": "Office", "role": "admin" }),
    );
    let client = request_ok(
        stdin,
        reader,
        "seed-client",
        "clients.create",
        json!({ "name": "Robin Ortega", "email": "robin@example.com" }),
    );
    let client_id = str_field(&client, "clientId");
    let pet_ids = (0..pets)
        .map(|i| {
            let pet = request_ok(
                stdin,
                reader,
                &format!("seed-pet-{}", i),
                "pets.create",
                json!({ "clientId": client_id, "name": format!("Dog {}", i + 1) }),
            );
            str_field(&pet, "petId")
        })
        .collect();
    let slot = request_ok(
        stdin,
        reader,
        "seed-slot",
        "slots.create",
        json!({
            "startsAt": "2030-03-04T09:00:00Z",
            "endsAt": "2030-03-04T10:00:00Z",
            "walkType": "GROUP",
            "capacityDogs": capacity,
        }),
    );
    Seed {
        admin_id: str_field(&admin, "userId"),
        client_id,
        pet_ids,
        slot_id: str_field(&slot, "slotId"),
    }
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").is_some_and(|v| v.is_null()));

    let early = request(&mut stdin, &mut reader, "2", "slots.list", json!({}));
    assert_eq!(error_code(&early), "no_workspace");

    let s = seed(&mut stdin, &mut reader, "walkbook-router-smoke", 4, 1);

    let calls: Vec<(&str, serde_json::Value)> = vec![
        ("clients.list", json!({})),
        ("clients.get", json!({ "clientId": s.client_id })),
        ("pets.list", json!({ "clientId": s.client_id })),
        ("walkers.list", json!({})),
        ("slots.list", json!({})),
        ("slots.get", json!({ "slotId": s.slot_id })),
        ("bookings.list", json!({})),
        ("bookings.requests", json!({})),
        ("leave.list", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        request_ok(&mut stdin, &mut reader, &format!("f{}", i), method, params);
    }

    let unknown = request(&mut stdin, &mut reader, "u1", "grades.compute", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(error_code(&bad), "bad_json");

    let after = request_ok(&mut stdin, &mut reader, "h2", "health", json!({}));
    assert!(after.get("workspacePath").and_then(|v| v.as_str()).is_some());

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn missing_params_are_bad_params() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seed(&mut stdin, &mut reader, "walkbook-router-params", 2, 1);

    let no_slot = request(&mut stdin, &mut reader, "1", "slots.get", json!({}));
    assert_eq!(error_code(&no_slot), "bad_params");

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "slots.get",
        json!({ "slotId": "nope" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let bad_ws = request(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(error_code(&bad_ws), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
