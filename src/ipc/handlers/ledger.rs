use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::ledger::toggle::{upsert_and_toggle, ToggleRequest};
use crate::ledger::{lookup, sweep, ExpiryPolicy, Ledger, PeriodKey};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

fn ledger_toggle(
    conn: &Connection,
    ledger: Ledger,
    policy: ExpiryPolicy,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now = Utc::now();
    let req = ToggleRequest::from_params(params, now)?;
    let rec = upsert_and_toggle(conn, ledger, &req, now, policy)?;
    Ok(json!({ "status": rec.status, "record": rec }))
}

fn ledger_monthly(
    conn: &Connection,
    ledger: Ledger,
    policy: ExpiryPolicy,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now = Utc::now();
    let subject_id = get_required_str(params, "subjectId")?;
    let period = PeriodKey::from_params(params.get("month"), params.get("year"), now)?;
    let rec = lookup::monthly(conn, ledger, &subject_id, period, now, policy)?;
    Ok(json!({ "exists": rec.is_some(), "record": rec }))
}

fn ledger_history(
    conn: &Connection,
    ledger: Ledger,
    policy: ExpiryPolicy,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let records = lookup::history(conn, ledger, &subject_id, Utc::now(), policy)?;
    Ok(json!({ "records": records }))
}

fn ledger_sweep(
    conn: &Connection,
    ledger: Ledger,
    policy: ExpiryPolicy,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report = sweep::sweep(conn, ledger, Utc::now(), policy)?;
    Ok(json!({ "updated": report.updated }))
}

type LedgerOp = fn(
    &Connection,
    Ledger,
    ExpiryPolicy,
    &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr>;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (family, op) = req.method.split_once('.')?;
    let ledger = Ledger::parse(family)?;
    let run: LedgerOp = match op {
        "toggle" => ledger_toggle,
        "monthly" => ledger_monthly,
        "history" => ledger_history,
        "sweep" => ledger_sweep,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, ledger, state.policy, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
