use crate::ledger::LedgerError;
use serde_json::json;
use tracing::error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, table: &str, e: rusqlite::Error) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> Self {
        let code = e.code();
        match e {
            LedgerError::Validation(message) => Self::new(code, message),
            LedgerError::Store(inner) => {
                error!(error = %inner, "ledger store failure");
                Self::new(code, inner.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_keep_their_codes() {
        let bad = HandlerErr::from(LedgerError::Validation("month must be 1..12".into()));
        assert_eq!(bad.code, "bad_params");
        assert_eq!(bad.message, "month must be 1..12");

        let store = HandlerErr::from(LedgerError::Store(rusqlite::Error::QueryReturnedNoRows));
        let resp = store.response("7");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("db_query_failed"));
    }
}
