use super::error::HandlerErr;
use rusqlite::{Connection, OptionalExtension};

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `true` when a row with `id` exists in `table`. Table names are internal
/// constants, never request input.
pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?;
    Ok(found.is_some())
}
