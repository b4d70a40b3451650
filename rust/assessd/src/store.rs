//! Read side of the workspace: everything the report views need, loaded as
//! plain values so the aggregators never touch SQLite.

use crate::report::{TestDef, TestMeta, TestResult};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Upper bound on ids per `IN (...)` lookup when selecting results by test.
pub const RESULTS_BATCH_SIZE: usize = 30;

#[derive(Debug, Clone, Serialize)]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn query(e: rusqlite::Error) -> Self {
        tracing::warn!(error = %e, "workspace query failed");
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub roll_number: Option<String>,
    pub class_id: Option<String>,
    pub school_id: Option<String>,
    pub dob: Option<String>,
    pub admission_date: Option<String>,
}

impl StudentRow {
    /// Key test results are filed under.
    pub fn result_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub uid: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemarkRow {
    pub id: String,
    pub student_id: String,
    #[serde(rename = "type")]
    pub remark_type: Option<String>,
    pub priority: Option<String>,
    pub personal_remarks: Option<String>,
    pub work_remarks: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub meta_batch_size: usize,
    pub remarks_limit: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            meta_batch_size: 10,
            remarks_limit: 5,
        }
    }
}

/// Everything the consolidated student report is computed from.
#[derive(Debug, Clone)]
pub struct StudentReportInputs {
    pub student: Option<StudentRow>,
    pub user: Option<UserRow>,
    pub results: Vec<TestResult>,
    pub meta: HashMap<String, TestMeta>,
    pub remarks: Vec<RemarkRow>,
}

pub fn parse_timestamp(raw: Option<String>, field: &str) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(field, value = trimmed, error = %e, "ignoring unparseable timestamp");
            None
        }
    }
}

fn count(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

const STUDENT_COLUMNS: &str =
    "id, user_id, name, roll_number, class_id, school_id, dob, admission_date";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        name: r.get(2)?,
        roll_number: r.get(3)?,
        class_id: r.get(4)?,
        school_id: r.get(5)?,
        dob: r.get(6)?,
        admission_date: r.get(7)?,
    })
}

const RESULT_COLUMNS: &str = "id, test_id, student_id, student_name, percentage_score,
    correct_answers, incorrect_answers, skipped_questions, answered_questions,
    duration, start_time, end_time, subject_name, grade";

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<TestResult> {
    Ok(TestResult {
        id: r.get(0)?,
        test_id: r.get(1)?,
        student_id: r.get(2)?,
        student_name: r.get(3)?,
        percentage_score: r.get(4)?,
        correct_answers: count(r.get(5)?),
        incorrect_answers: count(r.get(6)?),
        skipped_questions: count(r.get(7)?),
        answered_questions: count(r.get(8)?),
        duration: r.get(9)?,
        start_time: parse_timestamp(r.get(10)?, "startTime"),
        end_time: parse_timestamp(r.get(11)?, "endTime"),
        subject_name: r.get(12)?,
        grade: r.get(13)?,
    })
}

const TEST_COLUMNS: &str =
    "id, title, subject, concept, difficulty, bloom, created_by, class_id, total_marks";

fn test_from_row(r: &Row<'_>) -> rusqlite::Result<TestDef> {
    Ok(TestDef {
        id: r.get(0)?,
        title: r.get(1)?,
        subject: r.get(2)?,
        concept: r.get(3)?,
        difficulty: r.get(4)?,
        bloom: r.get(5)?,
        created_by: r.get(6)?,
        class_id: r.get(7)?,
        total_marks: r.get(8)?,
    })
}

/// Finds the student whose login id is `student_id`, falling back to the
/// student record id itself.
pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, StoreError> {
    let by_user = conn
        .query_row(
            &format!(
                "SELECT {} FROM students WHERE user_id = ? ORDER BY rowid LIMIT 1",
                STUDENT_COLUMNS
            ),
            [student_id],
            student_from_row,
        )
        .optional()
        .map_err(StoreError::query)?;
    if by_user.is_some() {
        return Ok(by_user);
    }
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(StoreError::query)
}

/// Key results are filed under for `student_id`, which may be either a
/// login id or a student record id. Unknown ids are used as given.
pub fn resolve_result_key(conn: &Connection, student_id: &str) -> Result<String, StoreError> {
    Ok(load_student(conn, student_id)?
        .map(|s| s.result_key().to_string())
        .unwrap_or_else(|| student_id.to_string()))
}

pub fn load_user(conn: &Connection, uid: &str) -> Result<Option<UserRow>, StoreError> {
    conn.query_row(
        "SELECT uid, email, role FROM users WHERE uid = ?",
        [uid],
        |r| {
            Ok(UserRow {
                uid: r.get(0)?,
                email: r.get(1)?,
                role: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::query)
}

/// Case-insensitive substring match on name or roll number; a blank query
/// matches everyone.
pub fn matches_search(student: &StudentRow, search: &str) -> bool {
    let q = search.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    let name = student.name.to_lowercase();
    let roll = student.roll_number.as_deref().unwrap_or("").to_lowercase();
    name.contains(&q) || roll.contains(&q)
}

pub fn list_students(
    conn: &Connection,
    school_id: &str,
    search: Option<&str>,
) -> Result<Vec<StudentRow>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students WHERE school_id = ? ORDER BY name COLLATE NOCASE, id",
            STUDENT_COLUMNS
        ))
        .map_err(StoreError::query)?;
    let rows = stmt
        .query_map([school_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;
    Ok(match search {
        Some(q) => rows.into_iter().filter(|s| matches_search(s, q)).collect(),
        None => rows,
    })
}

pub fn load_class_roster(conn: &Connection, class_id: &str) -> Result<Vec<StudentRow>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students WHERE class_id = ? ORDER BY name COLLATE NOCASE, id",
            STUDENT_COLUMNS
        ))
        .map_err(StoreError::query)?;
    stmt.query_map([class_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

/// All results filed under `student_id`, in recording order.
pub fn load_results_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<TestResult>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM test_results WHERE student_id = ? ORDER BY seq, rowid",
            RESULT_COLUMNS
        ))
        .map_err(StoreError::query)?;
    stmt.query_map([student_id], result_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

pub fn load_results_for_tests(
    conn: &Connection,
    test_ids: &[String],
) -> Result<Vec<TestResult>, StoreError> {
    let mut out: Vec<(i64, TestResult)> = Vec::new();
    for chunk in test_ids.chunks(RESULTS_BATCH_SIZE) {
        let sql = format!(
            "SELECT {}, seq FROM test_results WHERE test_id IN ({})",
            RESULT_COLUMNS,
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
        let rows = stmt
            .query_map(
                params_from_iter(chunk.iter().map(|id| Value::Text(id.clone()))),
                |r| Ok((r.get::<_, i64>(14)?, result_from_row(r)?)),
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        out.extend(rows);
    }
    // Chunks are fetched independently; restore global recording order.
    out.sort_by_key(|(seq, _)| *seq);
    Ok(out.into_iter().map(|(_, r)| r).collect())
}

pub fn load_tests(conn: &Connection, created_by: Option<&str>) -> Result<Vec<TestDef>, StoreError> {
    let (sql, args): (String, Vec<Value>) = match created_by {
        Some(c) => (
            format!(
                "SELECT {} FROM tests WHERE created_by = ? ORDER BY rowid",
                TEST_COLUMNS
            ),
            vec![Value::Text(c.to_string())],
        ),
        None => (
            format!("SELECT {} FROM tests ORDER BY rowid", TEST_COLUMNS),
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    stmt.query_map(params_from_iter(args), test_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

pub fn load_test(conn: &Connection, test_id: &str) -> Result<Option<TestDef>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM tests WHERE id = ?", TEST_COLUMNS),
        [test_id],
        test_from_row,
    )
    .optional()
    .map_err(StoreError::query)
}

/// Number of distinct students with at least one result, per test.
pub fn completed_counts(conn: &Connection) -> Result<HashMap<String, usize>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT test_id, COUNT(DISTINCT student_id)
             FROM test_results
             GROUP BY test_id",
        )
        .map_err(StoreError::query)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;
    Ok(rows
        .into_iter()
        .map(|(id, n)| (id, usize::try_from(n).unwrap_or(0)))
        .collect())
}

pub fn class_sizes(conn: &Connection) -> Result<HashMap<String, usize>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT class_id, COUNT(*)
             FROM students
             WHERE class_id IS NOT NULL
             GROUP BY class_id",
        )
        .map_err(StoreError::query)?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;
    Ok(rows
        .into_iter()
        .map(|(id, n)| (id, usize::try_from(n).unwrap_or(0)))
        .collect())
}

/// Distinct non-empty test ids in first-seen order.
pub fn distinct_test_ids(results: &[TestResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .map(|r| r.test_id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Looks up classification tags for `test_ids`, `batch_size` ids per query.
/// Ids without a test row are absent from the map.
pub fn load_test_meta(
    conn: &Connection,
    test_ids: &[String],
    batch_size: usize,
) -> Result<HashMap<String, TestMeta>, StoreError> {
    let mut out = HashMap::new();
    for chunk in test_ids.chunks(batch_size.max(1)) {
        let sql = format!(
            "SELECT id, concept, difficulty, bloom FROM tests WHERE id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
        let rows = stmt
            .query_map(
                params_from_iter(chunk.iter().map(|id| Value::Text(id.clone()))),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        TestMeta {
                            concept: r.get(1)?,
                            difficulty: r.get(2)?,
                            bloom: r.get(3)?,
                        },
                    ))
                },
            )
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        out.extend(rows);
    }
    Ok(out)
}

/// Newest first; remarks without a timestamp go last.
pub fn load_latest_remarks(
    conn: &Connection,
    student_id: &str,
    limit: usize,
) -> Result<Vec<RemarkRow>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, type, priority, personal_remarks, work_remarks, created_at
             FROM remarks
             WHERE student_id = ?
             ORDER BY created_at IS NULL, created_at DESC, rowid DESC
             LIMIT ?",
        )
        .map_err(StoreError::query)?;
    stmt.query_map((student_id, limit as i64), |r| {
        Ok(RemarkRow {
            id: r.get(0)?,
            student_id: r.get(1)?,
            remark_type: r.get(2)?,
            priority: r.get(3)?,
            personal_remarks: r.get(4)?,
            work_remarks: r.get(5)?,
            created_at: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

pub fn load_student_report_inputs(
    conn: &Connection,
    student_id: &str,
    opts: &LoadOptions,
) -> Result<StudentReportInputs, StoreError> {
    let student = load_student(conn, student_id)?;
    let key = student
        .as_ref()
        .map(StudentRow::result_key)
        .unwrap_or(student_id);
    let user = load_user(conn, key)?;
    let results = load_results_for_student(conn, key)?;
    let test_ids = distinct_test_ids(&results);
    let meta = load_test_meta(conn, &test_ids, opts.meta_batch_size)?;
    let remarks = load_latest_remarks(conn, key, opts.remarks_limit)?;
    tracing::debug!(
        student_id,
        result_key = key,
        results = results.len(),
        tests = test_ids.len(),
        meta = meta.len(),
        "loaded student report inputs"
    );
    Ok(StudentReportInputs {
        student,
        user,
        results,
        meta,
        remarks,
    })
}
