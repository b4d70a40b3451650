mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{
    read_response, request, request_err_code, request_ok, select_workspace, spawn_sidecar,
};

#[test]
fn health_reports_version_before_and_after_workspace_select() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health.get("version").and_then(|v| v.as_str()),
        Some(env!("CARGO_PKG_VERSION"))
    );
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let workspace = select_workspace(&mut stdin, &mut reader, "assessd-health");
    assert!(workspace.join("assessd.sqlite3").exists());

    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
}

#[test]
fn data_methods_require_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    for (i, (method, params)) in [
        ("students.list", json!({ "schoolId": "sch-1" })),
        ("results.list", json!({ "studentId": "stu-1" })),
        ("reports.student.consolidated", json!({ "studentId": "stu-1" })),
        ("reports.subjectwise", json!({ "createdBy": "teacher-1" })),
        ("assessments.completed.subjects", json!({})),
        ("setup.get", json!({})),
    ]
    .into_iter()
    .enumerate()
    {
        let code = request_err_code(&mut stdin, &mut reader, &format!("{}", i), method, params);
        assert_eq!(code, "no_workspace", "{}", method);
    }
}

#[test]
fn unknown_methods_and_bad_params_are_reported() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = select_workspace(&mut stdin, &mut reader, "assessd-router-errors");

    let unknown = request(&mut stdin, &mut reader, "1", "grades.export", json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    let code = request_err_code(&mut stdin, &mut reader, "2", "workspace.select", json!({}));
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "reports.student.consolidated",
        json!({ "studentId": "   " }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_keeps_going() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let resp = read_response(&mut reader);
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_json")
    );

    // Blank lines are skipped without a reply.
    writeln!(stdin).expect("write blank line");
    let _ = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
}
