use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{clean, db_conn, optional_str, parse_object, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentInput {
    id: Option<String>,
    user_id: Option<String>,
    name: String,
    roll_number: Option<String>,
    class_id: Option<String>,
    school_id: Option<String>,
    dob: Option<String>,
    admission_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInput {
    uid: String,
    email: Option<String>,
    role: Option<String>,
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: StudentInput = match parse_object(req, "student") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return err(&req.id, "bad_params", "student.name must not be empty", None);
    }
    let id = clean(input.id).unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = conn.execute(
        "INSERT INTO students(id, user_id, name, roll_number, class_id, school_id, dob, admission_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            roll_number = excluded.roll_number,
            class_id = excluded.class_id,
            school_id = excluded.school_id,
            dob = excluded.dob,
            admission_date = excluded.admission_date",
        (
            &id,
            clean(input.user_id),
            &name,
            clean(input.roll_number),
            clean(input.class_id),
            clean(input.school_id),
            clean(input.dob),
            clean(input.admission_date),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let search = match optional_str(req, "search") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::list_students(conn, &school_id, search.as_deref()) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => store_err(req, e),
    }
}

fn handle_users_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input: UserInput = match parse_object(req, "user") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let uid = input.uid.trim().to_string();
    if uid.is_empty() {
        return err(&req.id, "bad_params", "user.uid must not be empty", None);
    }
    if let Err(e) = conn.execute(
        "INSERT INTO users(uid, email, role) VALUES(?, ?, ?)
         ON CONFLICT(uid) DO UPDATE SET email = excluded.email, role = excluded.role",
        (&uid, clean(input.email), clean(input.role)),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "uid": uid }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "users.upsert" => Some(handle_users_upsert(state, req)),
        _ => None,
    }
}
