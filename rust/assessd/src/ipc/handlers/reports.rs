use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{db_conn, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::report::{self, ReportOptions};
use crate::store;
use crate::subjectwise;
use serde_json::json;

fn handle_student_consolidated(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match setup::report_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let inputs = match store::load_student_report_inputs(conn, &student_id, &settings.load) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let summary = report::compute_report_with(
        &inputs.results,
        &inputs.meta,
        &ReportOptions {
            date_style: settings.date_style,
        },
    );
    let recommendations = report::recommendations(&summary);

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "student": inputs.student,
            "user": inputs.user,
            "summary": summary,
            "recommendations": recommendations,
            "remarks": inputs.remarks
        }),
    )
}

fn handle_subjectwise(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let thresholds = match setup::analysis_thresholds(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tests = match store::load_tests(conn, Some(&created_by)) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let test_ids = tests.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    let results = match store::load_results_for_tests(conn, &test_ids) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };

    let subjects = subjectwise::aggregate(&tests, &results, thresholds.pass);
    let chart = subjectwise::chart_rows(&subjects);
    let distribution = subjectwise::performance_distribution(&subjects, &thresholds);

    ok(
        &req.id,
        json!({
            "createdBy": created_by,
            "testCount": tests.len(),
            "resultCount": results.len(),
            "passThreshold": thresholds.pass,
            "subjects": subjects,
            "chart": chart,
            "distribution": distribution
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.student.consolidated" => Some(handle_student_consolidated(state, req)),
        "reports.subjectwise" => Some(handle_subjectwise(state, req)),
        _ => None,
    }
}
