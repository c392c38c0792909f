//! The authenticated management API under /teacher/. Every handler goes
//! through `require_teacher` and then the scope layer, so a teacher only
//! ever touches rows hanging off their own classrooms. Rows outside the
//! caller's scope answer 404, same as rows that do not exist.

use hyper::{Method, StatusCode};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use super::{parse_json_object, require_teacher};
use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};
use crate::scope::{self, StudentRow, Viewer};

pub fn try_handle(state: &AppState, conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    let rest = req.path.strip_prefix("/teacher/")?;

    if let Some(classroom_id) = rest.strip_prefix("classrooms/") {
        return Some(match req.method {
            &Method::DELETE => handle_classroom_delete(state, conn, req, classroom_id),
            _ => respond::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        });
    }
    if let Some(student_id) = rest.strip_prefix("students/") {
        return Some(match req.method {
            &Method::GET => handle_student_get(state, conn, req, student_id),
            &Method::PUT => handle_student_update(state, conn, req, student_id),
            &Method::DELETE => handle_student_delete(state, conn, req, student_id),
            _ => respond::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        });
    }

    match (req.method, rest) {
        (&Method::GET, "classrooms") => Some(handle_classrooms_list(state, conn, req)),
        (&Method::POST, "classrooms") => Some(handle_classroom_create(state, conn, req)),
        (&Method::GET, "school") => Some(handle_school(state, conn, req)),
        (&Method::GET, "students") => Some(handle_students_list(state, conn, req)),
        (&Method::POST, "students") => Some(handle_student_create(state, conn, req)),
        (&Method::GET, "run-statistics") => Some(handle_run_statistics_list(state, conn, req)),
        (_, "classrooms") | (_, "school") | (_, "students") | (_, "run-statistics") => Some(
            respond::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
        ),
        _ => None,
    }
}

fn student_json(s: &StudentRow) -> Value {
    json!({ "id": s.id, "fullName": s.full_name, "classroomId": s.classroom_id })
}

fn handle_classrooms_list(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rows = match scope::classrooms_for(conn, &viewer) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "classroom query failed");
            return respond::server_error();
        }
    };
    let classrooms: Vec<Value> = rows
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "classroomKey": c.classroom_key,
                "classroomName": c.classroom_name,
                "studentCount": c.student_count
            })
        })
        .collect();
    respond::json(StatusCode::OK, &json!({ "classrooms": classrooms }))
}

fn handle_classroom_create(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    let mut errors = serde_json::Map::new();
    let classroom_key = body
        .get("classroomKey")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if classroom_key.is_none() {
        errors.insert("classroomKey".into(), json!(["This field is required."]));
    }
    let classroom_name = body
        .get("classroomName")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if classroom_name.is_none() {
        errors.insert("classroomName".into(), json!(["This field is required."]));
    }

    // A teacher creates for themselves; only a superuser may name another
    // target teacher. Naming someone else is a field error, never a silent
    // reassignment to the caller.
    let teacher_id = if viewer.is_superuser {
        match (
            viewer.teacher_id.as_deref(),
            body.get("teacherId").and_then(|v| v.as_str()),
        ) {
            (_, Some(explicit)) => Some(explicit.to_string()),
            (Some(own), None) => Some(own.to_string()),
            (None, None) => {
                errors.insert("teacherId".into(), json!(["This field is required."]));
                None
            }
        }
    } else {
        match body.get("teacherId").and_then(|v| v.as_str()) {
            Some(explicit) if Some(explicit) != viewer.teacher_id.as_deref() => {
                errors.insert(
                    "teacherId".into(),
                    json!(["You can only create classrooms for your own profile."]),
                );
                None
            }
            // The gate guarantees a linked profile for non-superusers.
            _ => viewer.teacher_id.clone(),
        }
    };

    if errors.is_empty() {
        if let Some(tid) = teacher_id.as_deref() {
            match conn
                .query_row("SELECT 1 FROM teachers WHERE id = ?", [tid], |r| {
                    r.get::<_, i64>(0)
                })
                .optional()
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    errors.insert(
                        "teacherId".into(),
                        json!(["Select a valid choice. That choice is not one of the available choices."]),
                    );
                }
                Err(e) => {
                    error!(error = %e, "teacher lookup failed");
                    return respond::server_error();
                }
            }
        }
        if let Some(key) = classroom_key {
            match conn
                .query_row(
                    "SELECT 1 FROM classrooms WHERE classroom_key = ?",
                    [key],
                    |r| r.get::<_, i64>(0),
                )
                .optional()
            {
                Ok(Some(_)) => {
                    errors.insert(
                        "classroomKey".into(),
                        json!(["A classroom with that key already exists."]),
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "classroom lookup failed");
                    return respond::server_error();
                }
            }
        }
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(classroom_key), Some(classroom_name), Some(teacher_id)) =
        (classroom_key, classroom_name, teacher_id)
    else {
        return respond::server_error();
    };

    let classroom_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classrooms(id, classroom_key, classroom_name, teacher_id, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&classroom_id, classroom_key, classroom_name, &teacher_id),
    ) {
        error!(error = %e, "classroom insert failed");
        return respond::server_error();
    }

    respond::json(
        StatusCode::CREATED,
        &json!({
            "classroom": {
                "id": classroom_id,
                "classroomKey": classroom_key,
                "classroomName": classroom_name,
                "teacherId": teacher_id
            }
        }),
    )
}

fn handle_classroom_delete(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
    classroom_id: &str,
) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let existing = match scope::classroom_in_scope(conn, &viewer, classroom_id) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "classroom lookup failed");
            return respond::server_error();
        }
    };
    if existing.is_none() {
        return respond::error(StatusCode::NOT_FOUND, "Not found.");
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "transaction begin failed");
            return respond::server_error();
        }
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM run_statistics
         WHERE student_id IN (SELECT id FROM students WHERE classroom_id = ?)",
        [classroom_id],
    ) {
        let _ = tx.rollback();
        error!(error = %e, "run statistics delete failed");
        return respond::server_error();
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE classroom_id = ?", [classroom_id]) {
        let _ = tx.rollback();
        error!(error = %e, "student delete failed");
        return respond::server_error();
    }
    if let Err(e) = tx.execute("DELETE FROM classrooms WHERE id = ?", [classroom_id]) {
        let _ = tx.rollback();
        error!(error = %e, "classroom delete failed");
        return respond::server_error();
    }
    if let Err(e) = tx.commit() {
        error!(error = %e, "classroom delete commit failed");
        return respond::server_error();
    }

    respond::json(StatusCode::OK, &json!({ "deleted": true }))
}

fn handle_school(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return respond::error(StatusCode::NOT_FOUND, "School not found for this teacher.");
    };
    match conn
        .query_row(
            "SELECT sc.name, sc.municipality
             FROM teachers t
             JOIN schools sc ON sc.id = t.school_id
             WHERE t.id = ?",
            [teacher_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
    {
        Ok(Some((name, municipality))) => respond::json(
            StatusCode::OK,
            &json!({ "name": name, "municipality": municipality }),
        ),
        Ok(None) => respond::error(StatusCode::NOT_FOUND, "School not found for this teacher."),
        Err(e) => {
            error!(error = %e, "school lookup failed");
            respond::server_error()
        }
    }
}

fn handle_students_list(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rows = match scope::students_for(conn, &viewer) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "student query failed");
            return respond::server_error();
        }
    };
    let students: Vec<Value> = rows.iter().map(student_json).collect();
    respond::json(StatusCode::OK, &json!({ "students": students }))
}

/// `None` when the classroom is usable by this viewer; `Some(message)` is
/// the field error to report.
fn check_target_classroom(
    conn: &Connection,
    viewer: &Viewer,
    classroom_id: &str,
) -> Result<Option<&'static str>, ApiResponse> {
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classrooms WHERE id = ?", [classroom_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "classroom lookup failed");
            return Err(respond::server_error());
        }
    };
    if exists.is_none() {
        return Ok(Some("Classroom not found."));
    }
    let in_scope = match scope::classroom_in_scope(conn, viewer, classroom_id) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "classroom scope check failed");
            return Err(respond::server_error());
        }
    };
    if in_scope.is_none() {
        return Ok(Some("You can only assign students to your own classrooms."));
    }
    Ok(None)
}

fn student_name_taken(
    conn: &Connection,
    full_name: &str,
    classroom_id: &str,
    exclude_student: Option<&str>,
) -> rusqlite::Result<bool> {
    let row: Option<i64> = match exclude_student {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM students WHERE full_name = ? AND classroom_id = ? AND id != ?",
                (full_name, classroom_id, id),
                |r| r.get(0),
            )
            .optional()?,
        None => conn
            .query_row(
                "SELECT 1 FROM students WHERE full_name = ? AND classroom_id = ?",
                (full_name, classroom_id),
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(row.is_some())
}

fn handle_student_create(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    let mut errors = serde_json::Map::new();
    let full_name = body
        .get("fullName")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if full_name.is_none() {
        errors.insert("fullName".into(), json!(["This field is required."]));
    }
    let classroom_id = body
        .get("classroomId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if classroom_id.is_none() {
        errors.insert("classroomId".into(), json!(["This field is required."]));
    }

    if let (Some(name), Some(cid)) = (full_name, classroom_id) {
        match check_target_classroom(conn, &viewer, cid) {
            Ok(None) => {}
            Ok(Some(msg)) => {
                errors.insert("classroomId".into(), json!([msg]));
            }
            Err(resp) => return resp,
        }
        if !errors.contains_key("classroomId") {
            match student_name_taken(conn, name, cid, None) {
                Ok(true) => {
                    errors.insert(
                        "fullName".into(),
                        json!(["A student with that name already exists in this classroom."]),
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "student lookup failed");
                    return respond::server_error();
                }
            }
        }
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(full_name), Some(classroom_id)) = (full_name, classroom_id) else {
        return respond::server_error();
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, full_name, classroom_id, created_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&student_id, full_name, classroom_id),
    ) {
        error!(error = %e, "student insert failed");
        return respond::server_error();
    }

    respond::json(
        StatusCode::CREATED,
        &json!({
            "student": { "id": student_id, "fullName": full_name, "classroomId": classroom_id }
        }),
    )
}

fn handle_student_get(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
    student_id: &str,
) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match scope::student_in_scope(conn, &viewer, student_id) {
        Ok(Some(s)) => respond::json(StatusCode::OK, &json!({ "student": student_json(&s) })),
        Ok(None) => respond::error(StatusCode::NOT_FOUND, "Not found."),
        Err(e) => {
            error!(error = %e, "student lookup failed");
            respond::server_error()
        }
    }
}

fn handle_student_update(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
    student_id: &str,
) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let existing = match scope::student_in_scope(conn, &viewer, student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return respond::error(StatusCode::NOT_FOUND, "Not found."),
        Err(e) => {
            error!(error = %e, "student lookup failed");
            return respond::server_error();
        }
    };
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    // Absent fields keep their current value; present-but-blank is an error.
    let mut errors = serde_json::Map::new();
    let full_name = match body.get("fullName") {
        None => existing.full_name.clone(),
        Some(v) => match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => {
                errors.insert("fullName".into(), json!(["This field may not be blank."]));
                existing.full_name.clone()
            }
        },
    };
    let classroom_id = match body.get("classroomId") {
        None => existing.classroom_id.clone(),
        Some(v) => match v.as_str().filter(|s| !s.is_empty()) {
            Some(s) => s.to_string(),
            None => {
                errors.insert(
                    "classroomId".into(),
                    json!(["This field may not be blank."]),
                );
                existing.classroom_id.clone()
            }
        },
    };

    if errors.is_empty() {
        if classroom_id != existing.classroom_id {
            match check_target_classroom(conn, &viewer, &classroom_id) {
                Ok(None) => {}
                Ok(Some(msg)) => {
                    errors.insert("classroomId".into(), json!([msg]));
                }
                Err(resp) => return resp,
            }
        }
        let renamed_or_moved =
            full_name != existing.full_name || classroom_id != existing.classroom_id;
        if !errors.contains_key("classroomId") && renamed_or_moved {
            match student_name_taken(conn, &full_name, &classroom_id, Some(student_id)) {
                Ok(true) => {
                    errors.insert(
                        "fullName".into(),
                        json!(["A student with that name already exists in this classroom."]),
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "student lookup failed");
                    return respond::server_error();
                }
            }
        }
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET full_name = ?, classroom_id = ? WHERE id = ?",
        (&full_name, &classroom_id, student_id),
    ) {
        error!(error = %e, "student update failed");
        return respond::server_error();
    }

    respond::json(
        StatusCode::OK,
        &json!({
            "student": { "id": student_id, "fullName": full_name, "classroomId": classroom_id }
        }),
    )
}

fn handle_student_delete(
    state: &AppState,
    conn: &Connection,
    req: &ApiRequest,
    student_id: &str,
) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let existing = match scope::student_in_scope(conn, &viewer, student_id) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "student lookup failed");
            return respond::server_error();
        }
    };
    if existing.is_none() {
        return respond::error(StatusCode::NOT_FOUND, "Not found.");
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "transaction begin failed");
            return respond::server_error();
        }
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM run_statistics WHERE student_id = ?",
        [student_id],
    ) {
        let _ = tx.rollback();
        error!(error = %e, "run statistics delete failed");
        return respond::server_error();
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        let _ = tx.rollback();
        error!(error = %e, "student delete failed");
        return respond::server_error();
    }
    if let Err(e) = tx.commit() {
        error!(error = %e, "student delete commit failed");
        return respond::server_error();
    }

    respond::json(StatusCode::OK, &json!({ "deleted": true }))
}

fn handle_run_statistics_list(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match require_teacher(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let rows = match scope::run_statistics_for(conn, &viewer) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "run statistics query failed");
            return respond::server_error();
        }
    };
    let stats: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "student": r.student_id,
                "playerWon": r.player_won,
                "recordedAt": r.recorded_at
            })
        })
        .collect();
    respond::json(StatusCode::OK, &json!({ "runStatistics": stats }))
}
