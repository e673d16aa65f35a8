//! Fee and salary ledgers.
//!
//! Both ledgers share one record shape ([`PeriodRecord`]) keyed by
//! (subject, month, year). A paid record carries the time it was paid and
//! lapses back to unpaid once [`ExpiryPolicy::ttl`] has elapsed; that rule is
//! applied on read ([`reconcile`]), on toggle ([`toggle`]) and in bulk by the
//! scheduled [`sweep`]. [`lookup`] serves reads.

pub mod lookup;
pub mod period;
pub mod reconcile;
pub mod store;
pub mod sweep;
pub mod toggle;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use thiserror::Error;

pub use period::PeriodKey;

pub const DEFAULT_PAID_TTL_DAYS: i64 = 30;
pub const MAX_PAID_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    Fees,
    Salaries,
}

impl Ledger {
    pub const ALL: [Ledger; 2] = [Ledger::Fees, Ledger::Salaries];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fees" => Some(Self::Fees),
            "salaries" => Some(Self::Salaries),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fees => "fees",
            Self::Salaries => "salaries",
        }
    }

    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Fees => "student_fees",
            Self::Salaries => "teacher_salaries",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

impl PaymentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "paid" => Some(Self::Paid),
            "unpaid" => Some(Self::Unpaid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Unpaid => "unpaid",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Paid => Self::Unpaid,
            Self::Unpaid => Self::Paid,
        }
    }
}

impl ToSql for PaymentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for PaymentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| PaymentStatus::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

/// One fee or salary entry for a subject and a (month, year) period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub id: String,
    pub subject_id: String,
    pub month: u32,
    pub year: i32,
    pub amount: f64,
    pub status: PaymentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// How long a paid status stays valid before it lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub ttl: Duration,
}

impl ExpiryPolicy {
    /// Accepts 1..=[`MAX_PAID_TTL_DAYS`] days.
    pub fn from_days(days: i64) -> Result<Self, LedgerError> {
        if !(1..=MAX_PAID_TTL_DAYS).contains(&days) {
            return Err(LedgerError::validation(format!(
                "paid ttl must be between 1 and {MAX_PAID_TTL_DAYS} days, got {days}"
            )));
        }
        Ok(Self {
            ttl: Duration::days(days),
        })
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::days(DEFAULT_PAID_TTL_DAYS),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wire error code used by both the IPC envelope and the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::Store(_) => "db_query_failed",
        }
    }
}
