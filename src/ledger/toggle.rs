use super::reconcile::reconcile;
use super::store::{self, is_unique_violation};
use super::{ExpiryPolicy, Ledger, LedgerError, PaymentStatus, PeriodKey, PeriodRecord};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// Flip paid <-> unpaid. A period with no record counts as unpaid.
    Toggle,
    Set(PaymentStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleRequest {
    pub subject_id: String,
    pub amount: f64,
    pub period: PeriodKey,
    pub action: ToggleAction,
}

impl ToggleRequest {
    /// Parses `{ subjectId, amount, month, year?, status? }`.
    pub fn from_params(params: &Value, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let subject_id = params
            .get("subjectId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LedgerError::validation("missing subjectId"))?;

        let amount = match params.get("amount") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| LedgerError::validation("amount must be a number"))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::validation("amount must be a non-negative number"));
        }

        let period = PeriodKey::from_params(params.get("month"), params.get("year"), now)?;

        let action = match params.get("status") {
            None | Some(Value::Null) => ToggleAction::Toggle,
            Some(v) => v
                .as_str()
                .and_then(PaymentStatus::parse)
                .map(ToggleAction::Set)
                .ok_or_else(|| LedgerError::validation("status must be paid or unpaid"))?,
        };

        Ok(Self {
            subject_id,
            amount,
            period,
            action,
        })
    }

    fn target_status(&self, current: PaymentStatus) -> PaymentStatus {
        match self.action {
            ToggleAction::Toggle => current.flipped(),
            ToggleAction::Set(status) => status,
        }
    }
}

/// Finds or creates the period record and applies the requested action.
///
/// Uniqueness of (subject, month, year) is enforced by the table; when a
/// concurrent writer wins the insert, the existing row is re-read and the
/// action is applied to it instead.
pub fn upsert_and_toggle(
    conn: &Connection,
    ledger: Ledger,
    req: &ToggleRequest,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<PeriodRecord, LedgerError> {
    match store::find(conn, ledger, &req.subject_id, req.period)? {
        Some(existing) => apply(conn, ledger, existing, req, now, policy),
        None => create(conn, ledger, req, now, policy),
    }
}

/// Inserts the record for a period that looked absent. Losing the insert to
/// another writer turns into an update of the winner's row.
fn create(
    conn: &Connection,
    ledger: Ledger,
    req: &ToggleRequest,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<PeriodRecord, LedgerError> {
    let status = req.target_status(PaymentStatus::Unpaid);
    let rec = PeriodRecord {
        id: Uuid::new_v4().to_string(),
        subject_id: req.subject_id.clone(),
        month: req.period.month,
        year: req.period.year,
        amount: req.amount,
        status,
        paid_date: (status == PaymentStatus::Paid).then_some(now),
        updated_at: now,
    };
    match store::insert(conn, ledger, &rec) {
        Ok(()) => {
            info!(
                ledger = ledger.name(),
                subject_id = %rec.subject_id,
                month = rec.month,
                year = rec.year,
                status = rec.status.as_str(),
                "period record created"
            );
            Ok(rec)
        }
        Err(e) if is_unique_violation(&e) => {
            warn!(
                ledger = ledger.name(),
                subject_id = %req.subject_id,
                "period record inserted concurrently; re-reading"
            );
            let existing = store::find(conn, ledger, &req.subject_id, req.period)?
                .ok_or(LedgerError::Store(e))?;
            apply(conn, ledger, existing, req, now, policy)
        }
        Err(e) => Err(e.into()),
    }
}

fn apply(
    conn: &Connection,
    ledger: Ledger,
    existing: PeriodRecord,
    req: &ToggleRequest,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<PeriodRecord, LedgerError> {
    let (current, _) = reconcile(conn, ledger, existing, now, policy)?;
    let status = req.target_status(current.status);
    let paid_date = match (current.status, status) {
        (PaymentStatus::Paid, PaymentStatus::Paid) => current.paid_date,
        (_, PaymentStatus::Paid) => Some(now),
        (_, PaymentStatus::Unpaid) => None,
    };
    let next = PeriodRecord {
        amount: req.amount,
        status,
        paid_date,
        updated_at: now,
        ..current
    };
    store::update(conn, ledger, &next)?;
    info!(
        ledger = ledger.name(),
        subject_id = %next.subject_id,
        month = next.month,
        year = next.year,
        status = next.status.as_str(),
        "period record updated"
    );
    Ok(next)
}
