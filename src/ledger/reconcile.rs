use super::{ExpiryPolicy, Ledger, LedgerError, PaymentStatus, PeriodRecord};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

pub fn is_expired(rec: &PeriodRecord, now: DateTime<Utc>, policy: ExpiryPolicy) -> bool {
    match (rec.status, rec.paid_date) {
        (PaymentStatus::Paid, Some(paid_at)) => now.signed_duration_since(paid_at) >= policy.ttl,
        _ => false,
    }
}

/// Reverts a lapsed paid record to unpaid and persists it.
///
/// Returns the (possibly updated) record and whether it lapsed. Records that
/// are unpaid, have no paid date, or are still inside the window come back
/// untouched. The UPDATE is conditional on `status = 'paid'`, so racing a
/// sweep over the same row is harmless.
pub fn reconcile(
    conn: &Connection,
    ledger: Ledger,
    rec: PeriodRecord,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<(PeriodRecord, bool), LedgerError> {
    if !is_expired(&rec, now, policy) {
        return Ok((rec, false));
    }

    let sql = format!(
        "UPDATE {} SET status = 'unpaid', paid_date = NULL, updated_at = ?
         WHERE id = ? AND status = 'paid'",
        ledger.table()
    );
    let changed = conn.execute(&sql, (now, &rec.id))?;
    debug!(
        ledger = ledger.name(),
        record_id = %rec.id,
        changed,
        "paid status lapsed"
    );

    Ok((
        PeriodRecord {
            status: PaymentStatus::Unpaid,
            paid_date: None,
            updated_at: now,
            ..rec
        },
        true,
    ))
}

pub fn reconcile_all(
    conn: &Connection,
    ledger: Ledger,
    records: Vec<PeriodRecord>,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<Vec<PeriodRecord>, LedgerError> {
    records
        .into_iter()
        .map(|rec| reconcile(conn, ledger, rec, now, policy).map(|(rec, _)| rec))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::{at, memory_db};
    use crate::ledger::{store, PeriodKey};
    use chrono::Duration;

    fn seed(
        conn: &Connection,
        status: PaymentStatus,
        paid_date: Option<DateTime<Utc>>,
    ) -> PeriodRecord {
        let rec = PeriodRecord {
            id: "rec-1".into(),
            subject_id: "student-1".into(),
            month: 3,
            year: 2025,
            amount: 120.0,
            status,
            paid_date,
            updated_at: at(2025, 3, 1),
        };
        store::insert(conn, Ledger::Fees, &rec).expect("insert");
        rec
    }

    fn reload(conn: &Connection) -> PeriodRecord {
        store::find(conn, Ledger::Fees, "student-1", PeriodKey { month: 3, year: 2025 })
            .expect("find")
            .expect("row exists")
    }

    #[test]
    fn paid_35_days_ago_lapses() {
        let conn = memory_db();
        let now = at(2025, 5, 1);
        let rec = seed(&conn, PaymentStatus::Paid, Some(now - Duration::days(35)));

        let (out, lapsed) =
            reconcile(&conn, Ledger::Fees, rec, now, ExpiryPolicy::default()).expect("reconcile");
        assert!(lapsed);
        assert_eq!(out.status, PaymentStatus::Unpaid);
        assert_eq!(out.paid_date, None);

        let stored = reload(&conn);
        assert_eq!(stored.status, PaymentStatus::Unpaid);
        assert_eq!(stored.paid_date, None);
    }

    #[test]
    fn exactly_at_threshold_lapses() {
        let conn = memory_db();
        let now = at(2025, 5, 1);
        let rec = seed(&conn, PaymentStatus::Paid, Some(now - Duration::days(30)));
        let (_, lapsed) =
            reconcile(&conn, Ledger::Fees, rec, now, ExpiryPolicy::default()).expect("reconcile");
        assert!(lapsed);
    }

    #[test]
    fn recent_payment_stays_paid() {
        let conn = memory_db();
        let now = at(2025, 5, 1);
        let paid_at = now - Duration::days(29) - Duration::hours(23);
        let rec = seed(&conn, PaymentStatus::Paid, Some(paid_at));

        let (out, lapsed) =
            reconcile(&conn, Ledger::Fees, rec, now, ExpiryPolicy::default()).expect("reconcile");
        assert!(!lapsed);
        assert_eq!(out.status, PaymentStatus::Paid);
        assert_eq!(reload(&conn).paid_date, Some(paid_at));
    }

    #[test]
    fn unpaid_and_dateless_records_are_untouched() {
        let conn = memory_db();
        let now = at(2025, 5, 1);
        let rec = seed(&conn, PaymentStatus::Unpaid, None);
        let (out, lapsed) = reconcile(&conn, Ledger::Fees, rec.clone(), now, ExpiryPolicy::default())
            .expect("reconcile");
        assert!(!lapsed);
        assert_eq!(out, rec);

        let dateless = PeriodRecord {
            status: PaymentStatus::Paid,
            paid_date: None,
            ..rec
        };
        assert!(!is_expired(&dateless, now, ExpiryPolicy::default()));
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let conn = memory_db();
        let now = at(2025, 5, 1);
        let rec = seed(&conn, PaymentStatus::Paid, Some(now - Duration::days(40)));
        let policy = ExpiryPolicy::default();

        let (first, lapsed_first) = reconcile(&conn, Ledger::Fees, rec, now, policy).expect("first");
        let (second, lapsed_second) =
            reconcile(&conn, Ledger::Fees, first.clone(), now, policy).expect("second");
        assert!(lapsed_first);
        assert!(!lapsed_second);
        assert_eq!(first, second);
        assert_eq!(reload(&conn), second);
    }

    #[test]
    fn custom_window_is_respected() {
        let now = at(2025, 5, 1);
        let rec = PeriodRecord {
            id: "x".into(),
            subject_id: "t".into(),
            month: 4,
            year: 2025,
            amount: 0.0,
            status: PaymentStatus::Paid,
            paid_date: Some(now - Duration::days(8)),
            updated_at: now,
        };
        let week = ExpiryPolicy::from_days(7).expect("policy");
        assert!(is_expired(&rec, now, week));
        assert!(!is_expired(&rec, now, ExpiryPolicy::default()));
    }
}
