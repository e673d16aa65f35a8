use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_id TEXT,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('quiz', 'exam')),
            title TEXT NOT NULL,
            score REAL NOT NULL CHECK(score >= 0),
            max_score REAL NOT NULL CHECK(max_score > 0),
            taken_on TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK(score <= max_score),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_subject ON results(subject_id)",
        [],
    )?;

    // Fees and salaries share one shape. Payees (students, teachers) are
    // referenced by id only; the registry tables above are not the only
    // producer of payee ids.
    for table in ["student_fees", "teacher_salaries"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table}(
                    id TEXT PRIMARY KEY,
                    subject_id TEXT NOT NULL,
                    month INTEGER NOT NULL CHECK(month BETWEEN 1 AND 12),
                    year INTEGER NOT NULL,
                    amount REAL NOT NULL CHECK(amount >= 0),
                    status TEXT NOT NULL CHECK(status IN ('paid', 'unpaid')),
                    paid_date TEXT,
                    updated_at TEXT NOT NULL,
                    UNIQUE(subject_id, month, year)
                )"
            ),
            [],
        )?;
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS idx_{table}_subject ON {table}(subject_id)"),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_status_paid_date ON {table}(status, paid_date)"
            ),
            [],
        )?;
    }

    Ok(())
}
