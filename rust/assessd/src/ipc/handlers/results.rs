use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{clean, db_conn, parse_object, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultInput {
    id: Option<String>,
    test_id: String,
    student_id: String,
    student_name: Option<String>,
    percentage_score: Option<f64>,
    #[serde(default)]
    correct_answers: u32,
    #[serde(default)]
    incorrect_answers: u32,
    #[serde(default)]
    skipped_questions: u32,
    #[serde(default)]
    answered_questions: u32,
    duration: Option<f64>,
    start_time: Option<String>,
    end_time: Option<String>,
    subject_name: Option<String>,
    grade: Option<String>,
}

fn normalize_timestamp(raw: Option<String>, key: &str) -> Result<Option<String>, String> {
    let Some(raw) = clean(raw) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| {
            Some(
                t.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            )
        })
        .map_err(|e| format!("result.{} must be an RFC 3339 timestamp: {}", key, e))
}

fn handle_results_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: ResultInput = match parse_object(req, "result") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_id = input.test_id.trim().to_string();
    let student_id = input.student_id.trim().to_string();
    if test_id.is_empty() || student_id.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "result.testId and result.studentId are required",
            None,
        );
    }
    if let Some(p) = input.percentage_score {
        if !(0.0..=100.0).contains(&p) {
            return err(
                &req.id,
                "bad_params",
                "result.percentageScore must be in 0..=100",
                Some(json!({ "percentageScore": p })),
            );
        }
    }
    if let Some(d) = input.duration {
        if !d.is_finite() || d < 0.0 {
            return err(&req.id, "bad_params", "result.duration must be >= 0", None);
        }
    }
    let start_time = match normalize_timestamp(input.start_time, "startTime") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let end_time = match normalize_timestamp(input.end_time, "endTime") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    let id = match clean(input.id) {
        Some(id) => {
            let taken = conn
                .query_row("SELECT 1 FROM test_results WHERE id = ?", [&id], |_| Ok(()))
                .optional();
            match taken {
                Ok(None) => id,
                Ok(Some(())) => {
                    return err(
                        &req.id,
                        "bad_params",
                        "duplicate result id",
                        Some(json!({ "id": id })),
                    )
                }
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
        None => Uuid::new_v4().to_string(),
    };
    let seq = match db::next_result_seq(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // subjectName and grade are kept verbatim; blank subjects are folded
    // into "Unknown" at report time.
    if let Err(e) = conn.execute(
        "INSERT INTO test_results(
            id, seq, test_id, student_id, student_name, percentage_score,
            correct_answers, incorrect_answers, skipped_questions, answered_questions,
            duration, start_time, end_time, subject_name, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            seq,
            &test_id,
            &student_id,
            clean(input.student_name),
            input.percentage_score,
            input.correct_answers,
            input.incorrect_answers,
            input.skipped_questions,
            input.answered_questions,
            input.duration,
            start_time,
            end_time,
            input.subject_name,
            input.grade,
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "resultId": id }))
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_results_for_student(conn, &student_id) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.record" => Some(handle_results_record(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        _ => None,
    }
}
