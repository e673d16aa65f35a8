//! Quiz and exam results: one score per student, subject and assessment.

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const KINDS: [&str; 2] = ["quiz", "exam"];

fn parse_kind(v: Option<&serde_json::Value>) -> Result<String, HandlerErr> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|k| KINDS.contains(k))
        .map(str::to_string)
        .ok_or_else(|| HandlerErr::bad_params("kind must be quiz or exam"))
}

fn parse_number(v: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    v.as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a number")))
}

fn parse_date(v: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    v.as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| HandlerErr::bad_params("takenOn must be YYYY-MM-DD"))
}

fn check_scores(score: f64, max_score: f64) -> Result<(), HandlerErr> {
    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be greater than 0"));
    }
    if score < 0.0 || score > max_score {
        return Err(HandlerErr::bad_params("score must be between 0 and maxScore"));
    }
    Ok(())
}

fn results_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut filters: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    for (key, clause) in [
        ("studentId", "r.student_id = ?"),
        ("subjectId", "r.subject_id = ?"),
        ("kind", "r.kind = ?"),
    ] {
        if let Some(v) = get_optional_str(params, key) {
            filters.push(clause);
            values.push(v);
        }
    }
    let mut sql = String::from(
        "SELECT r.id, r.student_id, r.subject_id, j.name, r.kind, r.title,
                r.score, r.max_score, r.taken_on
         FROM results r
         JOIN subjects j ON j.id = r.subject_id",
    );
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }
    sql.push_str(" ORDER BY r.taken_on DESC, r.title");

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(rusqlite::params_from_iter(values), |r| {
            let score: f64 = r.get(6)?;
            let max_score: f64 = r.get(7)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "subjectId": r.get::<_, String>(2)?,
                "subjectName": r.get::<_, String>(3)?,
                "kind": r.get::<_, String>(4)?,
                "title": r.get::<_, String>(5)?,
                "score": score,
                "maxScore": max_score,
                "percent": score * 100.0 / max_score,
                "takenOn": r.get::<_, NaiveDate>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "results": results }))
}

fn results_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let kind = parse_kind(params.get("kind"))?;
    let title = get_required_str(params, "title")?;
    let score = parse_number(params.get("score").unwrap_or(&serde_json::Value::Null), "score")?;
    let max_score = match params.get("maxScore") {
        Some(v) => parse_number(v, "maxScore")?,
        None => 100.0,
    };
    check_scores(score, max_score)?;
    let taken_on = match params.get("takenOn").filter(|v| !v.is_null()) {
        Some(v) => parse_date(v)?,
        None => Utc::now().date_naive(),
    };

    if !row_exists(conn, "students", &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    if !row_exists(conn, "subjects", &subject_id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO results(id, student_id, subject_id, kind, title, score, max_score, taken_on, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &subject_id,
            &kind,
            &title,
            score,
            max_score,
            taken_on,
            Utc::now(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "results", e))?;

    info!(result_id = %id, student_id = %student_id, kind = %kind, "result recorded");
    Ok(json!({ "resultId": id }))
}

fn results_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "resultId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let current: Option<(String, f64, f64, NaiveDate)> = conn
        .query_row(
            "SELECT title, score, max_score, taken_on FROM results WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((mut title, mut score, mut max_score, mut taken_on)) = current else {
        return Err(HandlerErr::new("not_found", "result not found"));
    };

    if let Some(v) = patch.get("title") {
        let Some(t) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(HandlerErr::bad_params("patch.title must be a non-empty string"));
        };
        title = t.to_string();
    }
    if let Some(v) = patch.get("score") {
        score = parse_number(v, "patch.score")?;
    }
    if let Some(v) = patch.get("maxScore") {
        max_score = parse_number(v, "patch.maxScore")?;
    }
    if let Some(v) = patch.get("takenOn") {
        taken_on = parse_date(v)?;
    }
    check_scores(score, max_score)?;

    conn.execute(
        "UPDATE results SET title = ?, score = ?, max_score = ?, taken_on = ? WHERE id = ?",
        (&title, score, max_score, taken_on, &id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "results", e))?;
    Ok(json!({ "ok": true }))
}

fn results_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "resultId")?;
    let removed = conn
        .execute("DELETE FROM results WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "results", e))?;
    if removed == 0 {
        return Err(HandlerErr::new("not_found", "result not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "results.list" => results_list,
            "results.create" => results_create,
            "results.update" => results_update,
            "results.delete" => results_delete,
            _ => return None,
        };
    let Some(conn) = state.db.as_ref() else {
        if req.method == "results.list" {
            return Some(ok(&req.id, json!({ "results": [] })));
        }
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
