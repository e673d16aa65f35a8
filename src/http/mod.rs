//! HTTP surface for schedulers and dashboards.
//!
//! Routes mirror the JSON-lines methods for the ledgers. One connection is
//! shared behind an async mutex; store work runs on the blocking pool and
//! holds the connection until it completes.

mod handlers;

use crate::ledger::ExpiryPolicy;
use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use rusqlite::Connection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct HttpState {
    pub db: Arc<Mutex<Connection>>,
    pub policy: ExpiryPolicy,
}

impl HttpState {
    pub fn new(conn: Connection, policy: ExpiryPolicy) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            policy,
        }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz_handler))
        .route(
            "/api/sweep",
            get(handlers::sweep_all_handler).post(handlers::sweep_all_handler),
        )
        .route(
            "/api/:ledger/sweep",
            get(handlers::sweep_handler).post(handlers::sweep_handler),
        )
        .route("/api/:ledger/toggle", post(handlers::toggle_handler))
        .route("/api/:ledger/monthly", get(handlers::monthly_handler))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: HttpState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "ctrl-c handler unavailable; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
