use chrono::{Datelike, Duration, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .env_remove("SCHOOLD_PAID_TTL_DAYS")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn seed_paid(workspace: &Path, table: &str, subject: &str, month: u32, days_ago: i64) {
    let conn = Connection::open(workspace.join("schoold.sqlite3")).expect("open workspace db");
    let paid = Utc::now() - Duration::days(days_ago);
    conn.execute(
        &format!(
            "INSERT INTO {table}(id, subject_id, month, year, amount, status, paid_date, updated_at)
             VALUES(?, ?, ?, 2024, 120, 'paid', ?, ?)"
        ),
        (
            format!("{table}-{subject}-{month}"),
            subject,
            month,
            paid,
            paid,
        ),
    )
    .expect("seed paid record");
}

#[test]
fn toggle_flips_and_monthly_reads_back() {
    let workspace = temp_dir("schoold-ledger-toggle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.toggle",
        json!({ "subjectId": "stu-1", "amount": 150, "month": "2025-04" }),
    );
    assert_eq!(first["status"], json!("paid"));
    assert_eq!(first["record"]["month"], json!(4));
    assert_eq!(first["record"]["year"], json!(2025));
    assert!(first["record"]["paidDate"].is_string());

    let monthly = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.monthly",
        json!({ "subjectId": "stu-1", "month": 4, "year": 2025 }),
    );
    assert_eq!(monthly["exists"], json!(true));
    assert_eq!(monthly["record"]["id"], first["record"]["id"]);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.toggle",
        json!({ "subjectId": "stu-1", "amount": "175.5", "month": 4, "year": 2025 }),
    );
    assert_eq!(second["status"], json!("unpaid"));
    assert_eq!(second["record"]["paidDate"], serde_json::Value::Null);
    assert_eq!(second["record"]["amount"], json!(175.5));

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.toggle",
        json!({ "subjectId": "stu-1", "amount": 175.5, "month": "2025-04", "status": "unpaid" }),
    );
    assert_eq!(set["status"], json!("unpaid"));

    // Month without a year falls back to the current year.
    let current = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "salaries.toggle",
        json!({ "subjectId": "t-1", "amount": 2000, "month": 1 }),
    );
    assert_eq!(current["record"]["year"], json!(Utc::now().year()));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.history",
        json!({ "subjectId": "stu-1" }),
    );
    assert_eq!(history["records"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn lapsed_payments_revert_on_read_and_sweep() {
    let workspace = temp_dir("schoold-ledger-sweep");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    seed_paid(&workspace, "student_fees", "stu-1", 1, 45);
    seed_paid(&workspace, "student_fees", "stu-2", 1, 40);
    seed_paid(&workspace, "student_fees", "stu-3", 1, 5);
    seed_paid(&workspace, "teacher_salaries", "t-1", 1, 31);

    let monthly = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.monthly",
        json!({ "subjectId": "stu-1", "month": 1, "year": 2024 }),
    );
    assert_eq!(monthly["record"]["status"], json!("unpaid"));
    assert_eq!(monthly["record"]["paidDate"], serde_json::Value::Null);

    let swept = request_ok(&mut stdin, &mut reader, "3", "fees.sweep", json!({}));
    assert_eq!(swept["updated"], json!(1));

    let again = request_ok(&mut stdin, &mut reader, "4", "fees.sweep", json!({}));
    assert_eq!(again["updated"], json!(0));

    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.monthly",
        json!({ "subjectId": "stu-3", "month": "2024-01" }),
    );
    assert_eq!(fresh["record"]["status"], json!("paid"));

    let salaries = request_ok(&mut stdin, &mut reader, "6", "salaries.sweep", json!({}));
    assert_eq!(salaries["updated"], json!(1));

    // A lapsed record toggles to a fresh payment, not to unpaid.
    seed_paid(&workspace, "student_fees", "stu-4", 2, 60);
    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "fees.toggle",
        json!({ "subjectId": "stu-4", "amount": 120, "month": 2, "year": 2024 }),
    );
    assert_eq!(toggled["status"], json!("paid"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_params_are_rejected() {
    let workspace = temp_dir("schoold-ledger-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cases = [
        json!({ "amount": 10, "month": 1 }),
        json!({ "subjectId": "s", "amount": -5, "month": 1 }),
        json!({ "subjectId": "s", "amount": 10, "month": 13 }),
        json!({ "subjectId": "s", "amount": 10, "month": "2025-00" }),
        json!({ "subjectId": "s", "amount": 10, "month": 1, "status": "pending" }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let id = format!("bad-{i}");
        let resp = request(&mut stdin, &mut reader, &id, "fees.toggle", params);
        assert_eq!(resp["ok"], json!(false), "case {i}");
        assert_eq!(resp["error"]["code"], json!("bad_params"), "case {i}");
    }

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_workspace_switch_keeps_the_open_workspace() {
    let workspace = temp_dir("schoold-ledger-switch");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.toggle",
        json!({ "subjectId": "stu-1", "amount": 50, "month": "2025-02" }),
    );

    // A regular file cannot become a workspace directory.
    let not_a_dir = workspace.join("occupied");
    std::fs::write(&not_a_dir, b"x").expect("write blocker file");
    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": not_a_dir.to_string_lossy() }),
    );
    assert_eq!(failed["ok"], json!(false));
    assert_eq!(failed["error"]["code"], json!("db_open_failed"));

    let health = request_ok(&mut stdin, &mut reader, "4", "health", json!({}));
    assert_eq!(
        health["workspacePath"],
        json!(workspace.to_string_lossy().to_string())
    );
    let monthly = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.monthly",
        json!({ "subjectId": "stu-1", "month": "2025-02" }),
    );
    assert_eq!(monthly["exists"], json!(true));
    assert_eq!(monthly["record"]["status"], json!("paid"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
