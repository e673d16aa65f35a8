use super::reconcile::{reconcile, reconcile_all};
use super::{store, ExpiryPolicy, Ledger, LedgerError, PeriodKey, PeriodRecord};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// The record for one subject and period, reconciled before it is returned.
/// A missing record is `Ok(None)`, not an error.
pub fn monthly(
    conn: &Connection,
    ledger: Ledger,
    subject_id: &str,
    period: PeriodKey,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<Option<PeriodRecord>, LedgerError> {
    let Some(rec) = store::find(conn, ledger, subject_id, period)? else {
        return Ok(None);
    };
    let (rec, _) = reconcile(conn, ledger, rec, now, policy)?;
    Ok(Some(rec))
}

pub fn history(
    conn: &Connection,
    ledger: Ledger,
    subject_id: &str,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<Vec<PeriodRecord>, LedgerError> {
    let records = store::list_for_subject(conn, ledger, subject_id)?;
    reconcile_all(conn, ledger, records, now, policy)
}
