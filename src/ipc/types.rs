use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session_ttl_hours: i64,
}

impl AppState {
    pub fn new(session_ttl_hours: i64) -> Self {
        AppState {
            workspace: None,
            db: None,
            session_ttl_hours,
        }
    }
}
