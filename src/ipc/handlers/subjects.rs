use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Optional link columns a subject may carry, with the table each points at.
const LINKS: [(&str, &str, &str, &str); 2] = [
    ("classId", "class_id", "classes", "class not found"),
    ("teacherId", "teacher_id", "teachers", "teacher not found"),
];

fn check_link(
    conn: &Connection,
    table: &str,
    id: Option<&str>,
    missing: &str,
) -> Result<(), HandlerErr> {
    if let Some(id) = id {
        if !row_exists(conn, table, id)? {
            return Err(HandlerErr::new("not_found", missing));
        }
    }
    Ok(())
}

fn subjects_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut sql = String::from(
        "SELECT
           j.id,
           j.name,
           j.class_id,
           j.teacher_id,
           (SELECT COUNT(*) FROM results r WHERE r.subject_id = j.id)
         FROM subjects j",
    );
    let mut filters: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    for (key, col, _, _) in LINKS {
        if let Some(v) = get_optional_str(params, key) {
            filters.push(format!("j.{col} = ?"));
            values.push(v);
        }
    }
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }
    sql.push_str(" ORDER BY j.name");

    let mut stmt = conn.prepare(&sql)?;
    let subjects = stmt
        .query_map(rusqlite::params_from_iter(values), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "classId": r.get::<_, Option<String>>(2)?,
                "teacherId": r.get::<_, Option<String>>(3)?,
                "resultCount": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = get_optional_str(params, "classId");
    let teacher_id = get_optional_str(params, "teacherId");
    check_link(conn, "classes", class_id.as_deref(), "class not found")?;
    check_link(conn, "teachers", teacher_id.as_deref(), "teacher not found")?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, class_id, teacher_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &class_id, &teacher_id, Utc::now()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "subjects", e))?;

    info!(subject_id = %id, "subject created");
    Ok(json!({ "subjectId": id }))
}

fn subjects_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "subjectId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if !row_exists(conn, "subjects", &id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("name") {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params("patch.name must be a non-empty string"));
        };
        sets.push("name = ?".into());
        values.push(name.to_string().into());
    }
    // null detaches the link
    for (key, col, table, missing) in LINKS {
        if let Some(v) = patch.get(key) {
            let link = v.as_str().map(|s| s.to_string());
            if link.is_none() && !v.is_null() {
                return Err(HandlerErr::bad_params(format!(
                    "patch.{key} must be a string or null"
                )));
            }
            check_link(conn, table, link.as_deref(), missing)?;
            sets.push(format!("{col} = ?"));
            values.push(link.into());
        }
    }
    if sets.is_empty() {
        return Ok(json!({ "ok": true, "changed": false }));
    }

    values.push(id.into());
    let sql = format!("UPDATE subjects SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", "subjects", e))?;
    Ok(json!({ "ok": true, "changed": true }))
}

fn subjects_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "subjectId")?;
    if !row_exists(conn, "subjects", &id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let removed_results = tx
        .execute("DELETE FROM results WHERE subject_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "results", e))?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "subjects", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(subject_id = %id, removed_results, "subject deleted");
    Ok(json!({ "ok": true, "removedResults": removed_results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "subjects.list" => subjects_list,
            "subjects.create" => subjects_create,
            "subjects.update" => subjects_update,
            "subjects.delete" => subjects_delete,
            _ => return None,
        };
    let Some(conn) = state.db.as_ref() else {
        if req.method == "subjects.list" {
            return Some(ok(&req.id, json!({ "subjects": [] })));
        }
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
