use crate::ledger::{ExpiryPolicy, DEFAULT_PAID_TTL_DAYS};
use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8787";

/// Process settings resolved from the environment. Command-line flags are
/// applied on top by `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub http_addr: SocketAddr,
    pub paid_ttl_days: i64,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            workspace: env::var("SCHOOLD_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            http_addr: env_socket_addr("SCHOOLD_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            paid_ttl_days: env_i64("SCHOOLD_PAID_TTL_DAYS", DEFAULT_PAID_TTL_DAYS),
            log_json: env_bool("SCHOOLD_LOG_JSON", false),
        }
    }

    /// Fails on an out-of-range ttl so a bad setting stops the process at
    /// startup.
    pub fn expiry_policy(&self) -> anyhow::Result<ExpiryPolicy> {
        ExpiryPolicy::from_days(self.paid_ttl_days)
            .context("invalid SCHOOLD_PAID_TTL_DAYS / --paid-ttl-days")
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_socket_addr(name: &str, default: &str) -> SocketAddr {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<SocketAddr>().ok())
        .unwrap_or_else(|| {
            default
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)))
        })
}
