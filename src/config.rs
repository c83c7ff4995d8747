use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 168;
/// Ten years; also bounds `ttlHours` on `sessions.create`.
pub const MAX_SESSION_TTL_HOURS: i64 = 87_600;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Opened at startup; clients may still switch with `workspace.select`.
    pub workspace: Option<PathBuf>,
    /// Serve HTTP on this address instead of the stdio sidecar protocol.
    pub http_addr: Option<SocketAddr>,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::from_sources(env::args().skip(1), |key| env::var(key).ok())
    }

    /// CLI flags win over the environment.
    pub fn from_sources<I, F>(args: I, var: F) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut workspace = var("WALKBOOK_WORKSPACE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let mut http_raw = var("WALKBOOK_HTTP_ADDR").filter(|s| !s.trim().is_empty());
        let session_ttl_hours = match var("WALKBOOK_SESSION_TTL_HOURS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|h| (1..=MAX_SESSION_TTL_HOURS).contains(h))
                .with_context(|| {
                    format!(
                        "WALKBOOK_SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}, got {raw:?}"
                    )
                })?,
            None => DEFAULT_SESSION_TTL_HOURS,
        };

        let mut it = args.into_iter();
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--workspace" => {
                    let v = it.next().context("--workspace needs a path")?;
                    workspace = Some(PathBuf::from(v));
                }
                "--http" => {
                    let v = it.next().context("--http needs an address")?;
                    http_raw = Some(v);
                }
                other => anyhow::bail!("unknown argument: {other}"),
            }
        }

        let http_addr = http_raw
            .map(|raw| {
                raw.trim()
                    .parse::<SocketAddr>()
                    .with_context(|| format!("invalid http address {raw:?}"))
            })
            .transpose()?;

        Ok(AppConfig {
            workspace,
            http_addr,
            session_ttl_hours,
        })
    }
}
