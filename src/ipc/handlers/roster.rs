use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{store, Ledger};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// People who own period records: students pay fees, teachers draw salaries.
#[derive(Clone, Copy)]
enum PersonKind {
    Student,
    Teacher,
}

impl PersonKind {
    fn parse_method(method: &str) -> Option<(Self, &str)> {
        let (family, op) = method.split_once('.')?;
        let kind = match family {
            "students" => Self::Student,
            "teachers" => Self::Teacher,
            _ => return None,
        };
        Some((kind, op))
    }

    fn table(self) -> &'static str {
        match self {
            Self::Student => "students",
            Self::Teacher => "teachers",
        }
    }

    fn ledger(self) -> Ledger {
        match self {
            Self::Student => Ledger::Fees,
            Self::Teacher => Ledger::Salaries,
        }
    }

    fn id_key(self) -> &'static str {
        match self {
            Self::Student => "studentId",
            Self::Teacher => "teacherId",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }

    fn list_key(self) -> &'static str {
        match self {
            Self::Student => "students",
            Self::Teacher => "teachers",
        }
    }
}

fn roster_list(
    conn: &Connection,
    kind: PersonKind,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_filter = match kind {
        PersonKind::Student => get_optional_str(params, "classId"),
        PersonKind::Teacher => None,
    };
    let class_col = match kind {
        PersonKind::Student => "class_id",
        PersonKind::Teacher => "NULL",
    };
    let mut sql = format!(
        "SELECT id, last_name, first_name, active, {class_col} FROM {}",
        kind.table()
    );
    if class_filter.is_some() {
        sql.push_str(" WHERE class_id = ?1");
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "lastName": last,
            "firstName": first,
            "displayName": format!("{}, {}", last, first),
            "active": r.get::<_, i64>(3)? != 0,
            "classId": r.get::<_, Option<String>>(4)?,
        }))
    };
    let rows = match &class_filter {
        Some(class_id) => stmt.query_map([class_id], map_row)?,
        None => stmt.query_map([], map_row)?,
    }
    .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ kind.list_key(): rows }))
}

fn roster_create(
    conn: &Connection,
    kind: PersonKind,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    match kind {
        PersonKind::Student => {
            let class_id = get_optional_str(params, "classId");
            if let Some(cid) = &class_id {
                if !row_exists(conn, "classes", cid)? {
                    return Err(HandlerErr::new("not_found", "class not found"));
                }
            }
            conn.execute(
                "INSERT INTO students(id, class_id, last_name, first_name, active, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, &class_id, &last_name, &first_name, active as i64, now),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", "students", e))?;
        }
        PersonKind::Teacher => {
            conn.execute(
                "INSERT INTO teachers(id, last_name, first_name, active, created_at)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, &last_name, &first_name, active as i64, now),
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", "teachers", e))?;
        }
    }

    info!(table = kind.table(), id = %id, "person created");
    Ok(json!({ kind.id_key(): id }))
}

fn roster_update(
    conn: &Connection,
    kind: PersonKind,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, kind.id_key())?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if !row_exists(conn, kind.table(), &id)? {
        return Err(HandlerErr::new("not_found", format!("{} not found", kind.label())));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, col) in [("lastName", "last_name = ?"), ("firstName", "first_name = ?")] {
        if let Some(v) = patch.get(key) {
            let Some(s) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return Err(HandlerErr::bad_params(format!(
                    "patch.{} must be a non-empty string",
                    key
                )));
            };
            sets.push(col);
            values.push(s.to_string().into());
        }
    }
    if let Some(v) = patch.get("active") {
        let Some(b) = v.as_bool() else {
            return Err(HandlerErr::bad_params("patch.active must be boolean"));
        };
        sets.push("active = ?");
        values.push((b as i64).into());
    }
    if let PersonKind::Student = kind {
        if let Some(v) = patch.get("classId") {
            let class_id = v.as_str().map(|s| s.to_string());
            if let Some(cid) = &class_id {
                if !row_exists(conn, "classes", cid)? {
                    return Err(HandlerErr::new("not_found", "class not found"));
                }
            }
            sets.push("class_id = ?");
            values.push(class_id.into());
        }
    }
    if sets.is_empty() {
        return Ok(json!({ "ok": true, "changed": false }));
    }

    values.push(id.into());
    let sql = format!("UPDATE {} SET {} WHERE id = ?", kind.table(), sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", kind.table(), e))?;
    Ok(json!({ "ok": true, "changed": true }))
}

fn roster_delete(
    conn: &Connection,
    kind: PersonKind,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, kind.id_key())?;
    if !row_exists(conn, kind.table(), &id)? {
        return Err(HandlerErr::new("not_found", format!("{} not found", kind.label())));
    }

    let ledger = kind.ledger();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let removed_records = store::delete_for_subject(&tx, ledger, &id)
        .map_err(|e| HandlerErr::db("db_delete_failed", ledger.table(), e))?;
    let detach = match kind {
        PersonKind::Student => ("results", "DELETE FROM results WHERE student_id = ?"),
        PersonKind::Teacher => (
            "subjects",
            "UPDATE subjects SET teacher_id = NULL WHERE teacher_id = ?",
        ),
    };
    tx.execute(detach.1, [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", detach.0, e))?;
    tx.execute(&format!("DELETE FROM {} WHERE id = ?", kind.table()), [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", kind.table(), e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(table = kind.table(), id = %id, removed_records, "person deleted");
    Ok(json!({ "ok": true, "removedRecords": removed_records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, op) = PersonKind::parse_method(&req.method)?;
    let run: fn(&Connection, PersonKind, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match op {
            "list" => roster_list,
            "create" => roster_create,
            "update" => roster_update,
            "delete" => roster_delete,
            _ => return None,
        };
    let Some(conn) = state.db.as_ref() else {
        if op == "list" {
            return Some(ok(&req.id, json!({ kind.list_key(): [] })));
        }
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, kind, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
