use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{clean, db_conn, optional_str, parse_object, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestInput {
    id: Option<String>,
    title: String,
    subject: Option<String>,
    concept: Option<String>,
    difficulty: Option<String>,
    bloom: Option<String>,
    created_by: Option<String>,
    class_id: Option<String>,
    total_marks: Option<f64>,
}

fn handle_tests_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: TestInput = match parse_object(req, "test") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return err(&req.id, "bad_params", "test.title must not be empty", None);
    }
    if let Some(m) = input.total_marks {
        if !m.is_finite() || m <= 0.0 {
            return err(&req.id, "bad_params", "test.totalMarks must be > 0", None);
        }
    }
    let id = clean(input.id).unwrap_or_else(|| Uuid::new_v4().to_string());

    // Classification labels are stored as given; the report trims them.
    if let Err(e) = conn.execute(
        "INSERT INTO tests(id, title, subject, concept, difficulty, bloom, created_by, class_id, total_marks)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            subject = excluded.subject,
            concept = excluded.concept,
            difficulty = excluded.difficulty,
            bloom = excluded.bloom,
            created_by = excluded.created_by,
            class_id = excluded.class_id,
            total_marks = excluded.total_marks",
        (
            &id,
            &title,
            input.subject,
            input.concept,
            input.difficulty,
            input.bloom,
            clean(input.created_by),
            clean(input.class_id),
            input.total_marks,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "testId": id }))
}

fn handle_tests_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match optional_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_tests(conn, created_by.as_deref()) {
        Ok(tests) => ok(&req.id, json!({ "tests": tests })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tests.upsert" => Some(handle_tests_upsert(state, req)),
        "tests.list" => Some(handle_tests_list(state, req)),
        _ => None,
    }
}
