mod config;
mod db;
mod http;
mod ipc;
mod ledger;
mod telemetry;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Config;
use ledger::{ExpiryPolicy, Ledger};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "schoold")]
#[command(about = "School fee and salary ledger daemon")]
#[command(
    after_help = "Environment:\n  SCHOOLD_WORKSPACE      Workspace directory\n  SCHOOLD_HTTP_ADDR      Listen address for `serve`\n  SCHOOLD_PAID_TTL_DAYS  Days a paid status stays valid\n  SCHOOLD_LOG_JSON       Emit JSON logs\n  RUST_LOG               Log filter"
)]
struct Cli {
    /// Workspace directory holding the database.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Days a paid status stays valid.
    #[arg(long, global = true)]
    paid_ttl_days: Option<i64>,
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON-lines protocol on stdin/stdout (default).
    Stdio,
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Revert lapsed paid records once and exit.
    Sweep {
        /// Limit the sweep to one ledger (`fees` or `salaries`).
        #[arg(long)]
        ledger: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut cfg = Config::from_env();
    if let Some(ws) = cli.workspace {
        cfg.workspace = Some(ws);
    }
    if let Some(days) = cli.paid_ttl_days {
        cfg.paid_ttl_days = days;
    }
    cfg.log_json |= cli.log_json;
    telemetry::init_tracing(cfg.log_json);

    let result = cfg.expiry_policy().and_then(|policy| {
        match cli.command.unwrap_or(Commands::Stdio) {
            Commands::Stdio => {
                run_stdio(&cfg, policy);
                Ok(())
            }
            Commands::Serve { addr } => run_http(&cfg, policy, addr.unwrap_or(cfg.http_addr)),
            Commands::Sweep { ledger } => run_sweep(&cfg, policy, ledger.as_deref()),
        }
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("schoold failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_stdio(cfg: &Config, policy: ExpiryPolicy) {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        policy,
    };
    if let Some(ws) = &cfg.workspace {
        match db::open_db(ws) {
            Ok(conn) => {
                state.workspace = Some(ws.clone());
                state.db = Some(conn);
            }
            Err(e) => warn!(workspace = %ws.display(), error = %e, "initial workspace not opened"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let _ = writeln!(
                    stdout,
                    "{}",
                    json!({ "ok": false, "error": { "code": "bad_json", "message": e.to_string() } })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}

fn require_workspace(cfg: &Config) -> anyhow::Result<rusqlite::Connection> {
    let ws = cfg
        .workspace
        .as_ref()
        .context("no workspace: pass --workspace or set SCHOOLD_WORKSPACE")?;
    db::open_db(ws)
}

fn run_http(cfg: &Config, policy: ExpiryPolicy, addr: SocketAddr) -> anyhow::Result<()> {
    let conn = require_workspace(cfg)?;
    let state = http::HttpState::new(conn, policy);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(http::serve(addr, state))
}

fn run_sweep(cfg: &Config, policy: ExpiryPolicy, only: Option<&str>) -> anyhow::Result<()> {
    let ledgers: Vec<Ledger> = match only {
        Some(name) => vec![Ledger::parse(name)
            .with_context(|| format!("unknown ledger: {name} (expected fees or salaries)"))?],
        None => Ledger::ALL.to_vec(),
    };
    let conn = require_workspace(cfg)?;
    let now = Utc::now();

    let mut out = json!({ "success": true });
    for target in ledgers {
        match ledger::sweep::sweep(&conn, target, now, policy) {
            Ok(report) => out[report.ledger] = json!(report.updated),
            Err(e) => {
                println!("{}", json!({ "success": false, "error": e.to_string() }));
                return Err(e).with_context(|| format!("{} sweep failed", target.name()));
            }
        }
    }
    info!(result = %out, "sweep complete");
    println!("{out}");
    Ok(())
}
