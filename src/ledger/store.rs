use super::{Ledger, LedgerError, PeriodKey, PeriodRecord};
use rusqlite::{ffi, Connection, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "id, subject_id, month, year, amount, status, paid_date, updated_at";

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<PeriodRecord> {
    Ok(PeriodRecord {
        id: r.get(0)?,
        subject_id: r.get(1)?,
        month: r.get(2)?,
        year: r.get(3)?,
        amount: r.get(4)?,
        status: r.get(5)?,
        paid_date: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

pub fn find(
    conn: &Connection,
    ledger: Ledger,
    subject_id: &str,
    period: PeriodKey,
) -> Result<Option<PeriodRecord>, LedgerError> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE subject_id = ? AND month = ? AND year = ?",
        ledger.table()
    );
    let rec = conn
        .query_row(&sql, (subject_id, period.month, period.year), row_to_record)
        .optional()?;
    Ok(rec)
}

/// Inserts a new period record. Returns the raw driver error so callers can
/// tell a uniqueness conflict apart from other failures.
pub fn insert(conn: &Connection, ledger: Ledger, rec: &PeriodRecord) -> rusqlite::Result<()> {
    let sql = format!(
        "INSERT INTO {}({RECORD_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        ledger.table()
    );
    conn.execute(
        &sql,
        (
            &rec.id,
            &rec.subject_id,
            rec.month,
            rec.year,
            rec.amount,
            rec.status,
            rec.paid_date,
            rec.updated_at,
        ),
    )?;
    Ok(())
}

pub fn update(conn: &Connection, ledger: Ledger, rec: &PeriodRecord) -> Result<(), LedgerError> {
    let sql = format!(
        "UPDATE {} SET amount = ?, status = ?, paid_date = ?, updated_at = ? WHERE id = ?",
        ledger.table()
    );
    conn.execute(
        &sql,
        (rec.amount, rec.status, rec.paid_date, rec.updated_at, &rec.id),
    )?;
    Ok(())
}

/// All periods for one subject, newest first.
pub fn list_for_subject(
    conn: &Connection,
    ledger: Ledger,
    subject_id: &str,
) -> Result<Vec<PeriodRecord>, LedgerError> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE subject_id = ? ORDER BY year DESC, month DESC",
        ledger.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([subject_id], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_for_subject(
    conn: &Connection,
    ledger: Ledger,
    subject_id: &str,
) -> rusqlite::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE subject_id = ?", ledger.table());
    conn.execute(&sql, [subject_id])
}

/// Only UNIQUE / PRIMARY KEY conflicts; CHECK and NOT NULL failures are real
/// errors.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
