use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{clean, db_conn, parse_object, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemarkInput {
    student_id: String,
    #[serde(rename = "type")]
    remark_type: Option<String>,
    priority: Option<String>,
    personal_remarks: Option<String>,
    work_remarks: Option<String>,
    created_at: Option<String>,
}

fn handle_remarks_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: RemarkInput = match parse_object(req, "remark") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = input.student_id.trim().to_string();
    if student_id.is_empty() {
        return err(&req.id, "bad_params", "remark.studentId is required", None);
    }
    let created_at = match clean(input.created_at) {
        None => Utc::now(),
        Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("remark.createdAt must be an RFC 3339 timestamp: {}", e),
                    None,
                )
            }
        },
    };
    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO remarks(id, student_id, type, priority, personal_remarks, work_remarks, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            clean(input.remark_type).map(|s| s.to_ascii_lowercase()),
            clean(input.priority).map(|s| s.to_ascii_lowercase()),
            clean(input.personal_remarks),
            clean(input.work_remarks),
            created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "remarkId": id }))
}

fn handle_remarks_latest(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => match setup::report_settings(conn) {
            Ok(s) => s.load.remarks_limit,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Some(v) => match v.as_u64().filter(|n| (1..=50).contains(n)) {
            Some(n) => n as usize,
            None => return err(&req.id, "bad_params", "limit must be in 1..=50", None),
        },
    };
    match store::load_latest_remarks(conn, &student_id, limit) {
        Ok(remarks) => ok(&req.id, json!({ "remarks": remarks })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "remarks.add" => Some(handle_remarks_add(state, req)),
        "remarks.latest" => Some(handle_remarks_latest(state, req)),
        _ => None,
    }
}
