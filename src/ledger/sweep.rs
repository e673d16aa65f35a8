use super::{ExpiryPolicy, Ledger, LedgerError};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

// Keeps each UPDATE well under SQLite's bound-parameter limit.
const SWEEP_BATCH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub ledger: &'static str,
    pub updated: usize,
}

/// Reverts every lapsed paid record in `ledger` to unpaid.
///
/// Matching ids are collected first and reverted with bulk UPDATEs inside one
/// transaction. Re-running is harmless: already-unpaid rows never match.
pub fn sweep(
    conn: &Connection,
    ledger: Ledger,
    now: DateTime<Utc>,
    policy: ExpiryPolicy,
) -> Result<SweepReport, LedgerError> {
    let cutoff = policy.cutoff(now);
    let tx = conn.unchecked_transaction()?;

    let select = format!(
        "SELECT id FROM {}
         WHERE status = 'paid' AND paid_date IS NOT NULL AND paid_date <= ?",
        ledger.table()
    );
    let ids: Vec<String> = {
        let mut stmt = tx.prepare(&select)?;
        let rows = stmt
            .query_map([cutoff], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let mut updated = 0usize;
    for chunk in ids.chunks(SWEEP_BATCH) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "UPDATE {} SET status = 'unpaid', paid_date = NULL, updated_at = ?
             WHERE status = 'paid' AND id IN ({placeholders})",
            ledger.table()
        );
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
        params.push(&now);
        params.extend(chunk.iter().map(|id| id as &dyn ToSql));
        updated += tx.execute(&sql, params.as_slice())?;
    }
    tx.commit()?;

    info!(
        ledger = ledger.name(),
        matched = ids.len(),
        updated,
        cutoff = %cutoff,
        "sweep finished"
    );
    Ok(SweepReport {
        ledger: ledger.name(),
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testutil::{at, memory_db};
    use crate::ledger::{store, PaymentStatus, PeriodKey, PeriodRecord};
    use chrono::Duration;

    fn seed(conn: &Connection, subject: &str, status: PaymentStatus, paid: Option<DateTime<Utc>>) {
        let rec = PeriodRecord {
            id: format!("rec-{subject}"),
            subject_id: subject.into(),
            month: 1,
            year: 2025,
            amount: 10.0,
            status,
            paid_date: paid,
            updated_at: at(2025, 1, 1),
        };
        store::insert(conn, Ledger::Salaries, &rec).expect("insert");
    }

    fn status_of(conn: &Connection, subject: &str) -> PaymentStatus {
        store::find(conn, Ledger::Salaries, subject, PeriodKey { month: 1, year: 2025 })
            .expect("find")
            .expect("exists")
            .status
    }

    #[test]
    fn reverts_only_lapsed_paid_records() {
        let conn = memory_db();
        let now = at(2025, 3, 1);
        seed(&conn, "old", PaymentStatus::Paid, Some(now - Duration::days(31)));
        seed(&conn, "edge", PaymentStatus::Paid, Some(now - Duration::days(30)));
        seed(&conn, "fresh", PaymentStatus::Paid, Some(now - Duration::days(2)));
        seed(&conn, "unpaid", PaymentStatus::Unpaid, None);

        let report = sweep(&conn, Ledger::Salaries, now, ExpiryPolicy::default()).expect("sweep");
        assert_eq!(report.updated, 2);
        assert_eq!(report.ledger, "salaries");
        assert_eq!(status_of(&conn, "old"), PaymentStatus::Unpaid);
        assert_eq!(status_of(&conn, "edge"), PaymentStatus::Unpaid);
        assert_eq!(status_of(&conn, "fresh"), PaymentStatus::Paid);
        assert_eq!(status_of(&conn, "unpaid"), PaymentStatus::Unpaid);
    }

    #[test]
    fn repeated_sweep_is_idempotent() {
        let conn = memory_db();
        let now = at(2025, 3, 1);
        seed(&conn, "old", PaymentStatus::Paid, Some(now - Duration::days(90)));

        let policy = ExpiryPolicy::default();
        assert_eq!(sweep(&conn, Ledger::Salaries, now, policy).expect("first").updated, 1);
        assert_eq!(sweep(&conn, Ledger::Salaries, now, policy).expect("second").updated, 0);
        let paid_date: Option<String> = conn
            .query_row(
                "SELECT paid_date FROM teacher_salaries WHERE subject_id = 'old'",
                [],
                |r| r.get(0),
            )
            .expect("paid_date");
        assert_eq!(paid_date, None);
    }

    #[test]
    fn handles_more_rows_than_one_batch() {
        let conn = memory_db();
        let now = at(2025, 3, 1);
        for i in 0..(SWEEP_BATCH + 7) {
            seed(
                &conn,
                &format!("t{i}"),
                PaymentStatus::Paid,
                Some(now - Duration::days(60)),
            );
        }
        let report = sweep(&conn, Ledger::Salaries, now, ExpiryPolicy::default()).expect("sweep");
        assert_eq!(report.updated, SWEEP_BATCH + 7);
    }

    #[test]
    fn other_ledger_is_left_alone() {
        let conn = memory_db();
        let now = at(2025, 3, 1);
        seed(&conn, "old", PaymentStatus::Paid, Some(now - Duration::days(31)));
        let report = sweep(&conn, Ledger::Fees, now, ExpiryPolicy::default()).expect("sweep");
        assert_eq!(report.updated, 0);
        assert_eq!(status_of(&conn, "old"), PaymentStatus::Paid);
    }
}
