use super::LedgerError;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::Value;

/// Canonical (month, year) period. The string forms accepted on the wire
/// (`"3"`, `"2025-03"`) are parsed into this at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodKey {
    pub month: u32,
    pub year: i32,
}

impl PeriodKey {
    pub fn new(month: u32, year: i32) -> Result<Self, LedgerError> {
        if !(1..=12).contains(&month) {
            return Err(LedgerError::validation("month must be between 1 and 12"));
        }
        if !(1900..=9999).contains(&year) {
            return Err(LedgerError::validation("year must be between 1900 and 9999"));
        }
        Ok(Self { month, year })
    }

    /// Resolves `month` / `year` request values.
    ///
    /// A composite `"YYYY-MM"` month fixes the year and wins over a separate
    /// `year`. Otherwise `year` is used, falling back to the year of `now`.
    pub fn from_params(
        month: Option<&Value>,
        year: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        let Some(month) = month.filter(|v| !v.is_null()) else {
            return Err(LedgerError::validation("missing month"));
        };
        let (month_num, composite_year) = parse_month_value(month)?;
        let year = match composite_year {
            Some(y) => y,
            None => match year.filter(|v| !v.is_null()) {
                Some(v) => parse_year_value(v)?,
                None => now.year(),
            },
        };
        Self::new(month_num, year)
    }
}

fn parse_month_value(v: &Value) -> Result<(u32, Option<i32>), LedgerError> {
    if let Some(n) = v.as_u64() {
        let m = u32::try_from(n).map_err(|_| LedgerError::validation("month out of range"))?;
        return Ok((m, None));
    }
    let Some(s) = v.as_str() else {
        return Err(LedgerError::validation("month must be a number or YYYY-MM"));
    };
    let t = s.trim();
    if let Ok(m) = t.parse::<u32>() {
        return Ok((m, None));
    }
    let Some((y, m)) = t.split_once('-') else {
        return Err(LedgerError::validation("month must be MM or YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| LedgerError::validation("month year must be numeric"))?;
    let month = m
        .parse::<u32>()
        .map_err(|_| LedgerError::validation("month must be YYYY-MM"))?;
    Ok((month, Some(year)))
}

fn parse_year_value(v: &Value) -> Result<i32, LedgerError> {
    if let Some(n) = v.as_i64() {
        return i32::try_from(n).map_err(|_| LedgerError::validation("year out of range"));
    }
    v.as_str()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .ok_or_else(|| LedgerError::validation("year must be numeric"))
}
