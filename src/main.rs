mod config;
mod db;
mod http;
mod ipc;
mod workflow;

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the IPC protocol; logs go to stderr.
    let filter = EnvFilter::try_from_env("WALKBOOK_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_stdio(state: &mut ipc::AppState) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(state, req),
            Err(e) => {
                // Can't reply without id.
                tracing::debug!(error = %e, "unparseable request line");
                serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

fn main() -> anyhow::Result<()> {
    let config = config::AppConfig::load()?;
    init_tracing();

    let mut state = ipc::AppState::new(config.session_ttl_hours);
    if let Some(workspace) = config.workspace.clone() {
        ipc::select_workspace(&mut state, workspace)?;
    }

    match config.http_addr {
        Some(addr) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(http::serve(addr, Arc::new(Mutex::new(state))))
        }
        None => {
            tracing::info!("serving ipc on stdio");
            run_stdio(&mut state);
            Ok(())
        }
    }
}
