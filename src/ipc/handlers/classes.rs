use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn classes_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id),
           (SELECT COUNT(*) FROM subjects j WHERE j.class_id = c.id)
         FROM classes c
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "studentCount": r.get::<_, i64>(2)?,
                "subjectCount": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "classes", e))?;

    info!(class_id = %class_id, "class created");
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?;
    let changed = conn
        .execute("UPDATE classes SET name = ? WHERE id = ?", (&name, &class_id))
        .map_err(|e| HandlerErr::db("db_update_failed", "classes", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "class not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Removes a class with its students (and everything they own). Subjects
/// taught to the class are kept but detached.
fn classes_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !row_exists(conn, "classes", &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Dependency order, no ON DELETE CASCADE.
    let steps: [(&str, &str); 5] = [
        (
            "results",
            "DELETE FROM results
             WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        ),
        (
            "student_fees",
            "DELETE FROM student_fees
             WHERE subject_id IN (SELECT id FROM students WHERE class_id = ?)",
        ),
        ("students", "DELETE FROM students WHERE class_id = ?"),
        ("subjects", "UPDATE subjects SET class_id = NULL WHERE class_id = ?"),
        ("classes", "DELETE FROM classes WHERE id = ?"),
    ];
    let mut removed_students = 0usize;
    for (table, sql) in steps {
        let n = tx
            .execute(sql, [&class_id])
            .map_err(|e| HandlerErr::db("db_delete_failed", table, e))?;
        if table == "students" {
            removed_students = n;
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(class_id = %class_id, removed_students, "class deleted");
    Ok(json!({ "ok": true, "removedStudents": removed_students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let run: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "classes.list" => classes_list,
            "classes.create" => classes_create,
            "classes.update" => classes_update,
            "classes.delete" => classes_delete,
            _ => return None,
        };
    let Some(conn) = state.db.as_ref() else {
        if req.method == "classes.list" {
            return Some(ok(&req.id, json!({ "classes": [] })));
        }
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
