use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, optional_str, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::report::{round_decimals, TestDef};
use crate::store::{self, StoreError};
use crate::subjectwise::{self, PerformanceBand, SubmissionStatus};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

struct Completion {
    completed: HashMap<String, usize>,
    class_sizes: HashMap<String, usize>,
}

impl Completion {
    fn load(conn: &Connection) -> Result<Self, StoreError> {
        Ok(Self {
            completed: store::completed_counts(conn)?,
            class_sizes: store::class_sizes(conn)?,
        })
    }

    fn completed(&self, test: &TestDef) -> usize {
        self.completed.get(&test.id).copied().unwrap_or(0)
    }

    /// Expected submissions: the class roster, never fewer than what came in.
    fn total(&self, test: &TestDef) -> usize {
        let roster = test
            .class_id
            .as_ref()
            .and_then(|c| self.class_sizes.get(c))
            .copied()
            .unwrap_or(0);
        roster.max(self.completed(test))
    }
}

fn handle_completed_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match optional_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tests = match store::load_tests(conn, created_by.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let completion = match Completion::load(conn) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    // (subject, tests, completed, total) in first-seen order.
    let mut rows: Vec<(String, usize, usize, usize)> = Vec::new();
    for t in &tests {
        let subject = subjectwise::subject_of(t);
        let found = rows.iter().position(|r| r.0 == subject);
        let idx = match found {
            Some(i) => i,
            None => {
                rows.push((subject, 0, 0, 0));
                rows.len() - 1
            }
        };
        rows[idx].1 += 1;
        rows[idx].2 += completion.completed(t);
        rows[idx].3 += completion.total(t);
    }

    let subjects = rows
        .into_iter()
        .map(|(subject, test_count, completed, total)| {
            json!({
                "subject": subject,
                "testCount": test_count,
                "completed": completed,
                "total": total
            })
        })
        .collect::<Vec<_>>();
    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_completed_assessments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match optional_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tests = match store::load_tests(conn, created_by.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let completion = match Completion::load(conn) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let assessments = tests
        .iter()
        .filter(|t| subjectwise::subject_of(t) == subject)
        .map(|t| {
            json!({
                "id": t.id,
                "title": t.title,
                "subject": subject,
                "classId": t.class_id,
                "totalMarks": t.total_marks,
                "completed": completion.completed(t),
                "total": completion.total(t)
            })
        })
        .collect::<Vec<_>>();
    ok(
        &req.id,
        json!({ "subject": subject, "assessments": assessments }),
    )
}

fn handle_completed_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test_id = match required_str(req, "testId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match optional_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let test = match store::load_test(conn, &test_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "test not found", None),
        Err(e) => return store_err(req, e),
    };

    let roster = match (test.class_id.as_deref(), school_id.as_deref()) {
        (Some(class_id), _) => store::load_class_roster(conn, class_id),
        (None, Some(school_id)) => store::list_students(conn, school_id, None),
        (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "test has no class; pass schoolId to choose a roster",
                None,
            )
        }
    };
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let results = match store::load_results_for_tests(conn, std::slice::from_ref(&test.id)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let mut completed = 0usize;
    let rows = roster
        .iter()
        .map(|s| {
            let sub = subjectwise::submission(
                &test,
                subjectwise::latest_result(&results, &test.id, s.result_key()),
            );
            if sub.status == SubmissionStatus::Completed {
                completed += 1;
            }
            json!({
                "studentId": s.id,
                "userId": s.user_id,
                "name": s.name,
                "rollNumber": s.roll_number,
                "score": sub.score,
                "status": sub.status,
                "percentage": sub.percentage
            })
        })
        .collect::<Vec<_>>();

    ok(
        &req.id,
        json!({
            "test": test,
            "students": rows,
            "completed": completed,
            "remaining": roster.len() - completed
        }),
    )
}

fn handle_completed_suggestion(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let thresholds = match setup::analysis_thresholds(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let tests = match store::load_tests(conn, None) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let key = match store::resolve_result_key(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let results = match store::load_results_for_student(conn, &key) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let subject_tests = tests
        .iter()
        .filter(|t| subjectwise::subject_of(t) == subject)
        .collect::<Vec<_>>();
    let average = subjectwise::student_subject_average(&subject_tests, &results, &key);
    let band = PerformanceBand::classify(average, &thresholds);

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subject": subject,
            "testCount": subject_tests.len(),
            "averagePercentage": round_decimals(average, 2),
            "band": band.label(),
            "suggestion": band.suggestion()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.completed.subjects" => Some(handle_completed_subjects(state, req)),
        "assessments.completed.assessments" => Some(handle_completed_assessments(state, req)),
        "assessments.completed.students" => Some(handle_completed_students(state, req)),
        "assessments.completed.suggestion" => Some(handle_completed_suggestion(state, req)),
        _ => None,
    }
}
