use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "assessd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            uid TEXT PRIMARY KEY,
            email TEXT,
            role TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            user_id TEXT,
            name TEXT NOT NULL,
            roll_number TEXT,
            class_id TEXT,
            school_id TEXT,
            dob TEXT,
            admission_date TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_user ON students(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            subject TEXT,
            concept TEXT,
            difficulty TEXT,
            bloom TEXT,
            created_by TEXT,
            class_id TEXT,
            total_marks REAL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_created_by ON tests(created_by)",
        [],
    )?;

    // Results reference tests loosely: a result may point at a test that was
    // never synced, and the report must still count it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_results(
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL DEFAULT 0,
            test_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT,
            percentage_score REAL,
            correct_answers INTEGER NOT NULL DEFAULT 0,
            incorrect_answers INTEGER NOT NULL DEFAULT 0,
            skipped_questions INTEGER NOT NULL DEFAULT 0,
            answered_questions INTEGER NOT NULL DEFAULT 0,
            duration REAL,
            start_time TEXT,
            end_time TEXT,
            subject_name TEXT,
            grade TEXT
        )",
        [],
    )?;
    ensure_test_results_seq(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_results_student ON test_results(student_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_results_test ON test_results(test_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS remarks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            type TEXT,
            priority TEXT,
            personal_remarks TEXT,
            work_remarks TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_remarks_student ON remarks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

/// Results are returned in the order they were recorded; older workspaces
/// lack the ordering column, so add it and backfill from rowid.
fn ensure_test_results_seq(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "test_results", "seq")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE test_results ADD COLUMN seq INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    conn.execute("UPDATE test_results SET seq = rowid", [])?;
    Ok(())
}

pub fn next_result_seq(conn: &Connection) -> anyhow::Result<i64> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM test_results",
        [],
        |r| r.get(0),
    )?;
    Ok(seq)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
