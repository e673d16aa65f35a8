use super::HttpState;
use crate::ledger::toggle::{upsert_and_toggle, ToggleRequest};
use crate::ledger::{lookup, sweep, Ledger, LedgerError, PeriodKey};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::error;

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

fn internal_error() -> Response {
    failure(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

/// Validation problems are echoed back; store failures are logged and
/// reported with a generic message.
fn ledger_failure(scope: &str, e: LedgerError) -> Response {
    match e {
        LedgerError::Validation(message) => failure(StatusCode::BAD_REQUEST, &message),
        LedgerError::Store(inner) => {
            error!(ledger = scope, error = %inner, "ledger store failure");
            internal_error()
        }
    }
}

fn unknown_ledger(name: &str) -> Response {
    failure(StatusCode::NOT_FOUND, &format!("unknown ledger: {name}"))
}

/// Runs blocking store work off the async workers, holding the connection
/// for the whole call.
async fn with_conn<T, F>(state: &HttpState, scope: &'static str, work: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, LedgerError> + Send + 'static,
{
    let db = state.db.clone();
    match tokio::task::spawn_blocking(move || work(&*db.blocking_lock())).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(ledger_failure(scope, e)),
        Err(e) => {
            error!(ledger = scope, error = %e, "store task failed");
            Err(internal_error())
        }
    }
}

pub(crate) async fn healthz_handler() -> Response {
    Json(json!({ "ok": true, "version": env!("CARGO_PKG_VERSION") })).into_response()
}

pub(crate) async fn toggle_handler(
    State(state): State<HttpState>,
    Path(ledger_name): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let Some(ledger) = Ledger::parse(&ledger_name) else {
        return unknown_ledger(&ledger_name);
    };
    let Some(Json(params)) = body else {
        return failure(StatusCode::BAD_REQUEST, "request body must be a JSON object");
    };
    let now = Utc::now();
    let req = match ToggleRequest::from_params(&params, now) {
        Ok(v) => v,
        Err(e) => return ledger_failure(ledger.name(), e),
    };

    let policy = state.policy;
    let result = with_conn(&state, ledger.name(), move |conn| {
        upsert_and_toggle(conn, ledger, &req, now, policy)
    })
    .await;
    match result {
        Ok(rec) => Json(json!({ "success": true, "status": rec.status })).into_response(),
        Err(resp) => resp,
    }
}

pub(crate) async fn monthly_handler(
    State(state): State<HttpState>,
    Path(ledger_name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(ledger) = Ledger::parse(&ledger_name) else {
        return unknown_ledger(&ledger_name);
    };
    let Some(subject_id) = query
        .get("subjectId")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        return failure(StatusCode::BAD_REQUEST, "missing subjectId");
    };
    let now = Utc::now();
    let month = query.get("month").map(|s| Value::String(s.clone()));
    let year = query.get("year").map(|s| Value::String(s.clone()));
    let period = match PeriodKey::from_params(month.as_ref(), year.as_ref(), now) {
        Ok(v) => v,
        Err(e) => return ledger_failure(ledger.name(), e),
    };

    let policy = state.policy;
    let result = with_conn(&state, ledger.name(), move |conn| {
        lookup::monthly(conn, ledger, &subject_id, period, now, policy)
    })
    .await;
    match result {
        Ok(rec) => Json(json!({
            "success": true,
            "exists": rec.is_some(),
            "record": rec
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

pub(crate) async fn sweep_handler(
    State(state): State<HttpState>,
    Path(ledger_name): Path<String>,
) -> Response {
    let Some(ledger) = Ledger::parse(&ledger_name) else {
        return unknown_ledger(&ledger_name);
    };
    let policy = state.policy;
    let result = with_conn(&state, ledger.name(), move |conn| {
        sweep::sweep(conn, ledger, Utc::now(), policy)
    })
    .await;
    match result {
        Ok(report) => Json(json!({ "success": true, "updated": report.updated })).into_response(),
        Err(resp) => resp,
    }
}

pub(crate) async fn sweep_all_handler(State(state): State<HttpState>) -> Response {
    let policy = state.policy;
    let result = with_conn(&state, "all", move |conn| {
        let now = Utc::now();
        Ledger::ALL
            .into_iter()
            .map(|ledger| sweep::sweep(conn, ledger, now, policy))
            .collect::<Result<Vec<_>, _>>()
    })
    .await;
    match result {
        Ok(reports) => {
            let mut body = json!({ "success": true });
            for report in reports {
                body[report.ledger] = json!(report.updated);
            }
            Json(body).into_response()
        }
        Err(resp) => resp,
    }
}
