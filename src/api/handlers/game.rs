//! The two endpoints the game client itself calls. Both are reachable with
//! nothing but a classroom key; neither exposes row identifiers.

use hyper::{Method, StatusCode};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use super::parse_json_object;
use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};

/// POST /checkClassroomKey: turn a classroom key into the roster the game
/// shows on its login screen.
fn handle_check_classroom_key(conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };
    let Some(classroom_key) = body
        .get("classroomKey")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    else {
        return respond::error(
            StatusCode::BAD_REQUEST,
            "Invalid input: classroomKey missing",
        );
    };

    // One query for the classroom, its owning teacher and their school.
    let found = match conn
        .query_row(
            "SELECT c.id, t.full_name, sc.name, sc.municipality
             FROM classrooms c
             JOIN teachers t ON t.id = c.teacher_id
             JOIN schools sc ON sc.id = t.school_id
             WHERE c.classroom_key = ?",
            [classroom_key],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "classroom lookup failed");
            return respond::server_error();
        }
    };
    let Some((classroom_id, teacher_name, school_name, municipality)) = found else {
        return respond::message(
            StatusCode::NOT_FOUND,
            "Classroom key verification failed or classroom not found",
        );
    };

    let mut stmt = match conn.prepare(
        "SELECT full_name FROM students WHERE classroom_id = ? ORDER BY full_name",
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "roster query failed");
            return respond::server_error();
        }
    };
    let students = stmt
        .query_map([&classroom_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match students {
        Ok(students) => respond::json(
            StatusCode::OK,
            &json!({
                "school": { "name": school_name, "municipality": municipality },
                "teacher": teacher_name,
                "students": students
            }),
        ),
        Err(e) => {
            error!(error = %e, "roster query failed");
            respond::server_error()
        }
    }
}

/// POST /insertLevelStatistics: append one finished run for a student named
/// by (classroom key, full name). `place == 1` is a win.
fn handle_insert_level_statistics(conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    // Field validation runs before any database access and reports every
    // failed field at once.
    let mut errors = serde_json::Map::new();
    let classroom_key = body
        .get("classroomKey")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    match classroom_key {
        None => {
            errors.insert("classroomKey".into(), json!(["This field is required."]));
        }
        Some(key) if key.chars().count() > 100 => {
            errors.insert(
                "classroomKey".into(),
                json!(["Ensure this field has no more than 100 characters."]),
            );
        }
        _ => {}
    }
    let user = body
        .get("user")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    match user {
        None => {
            errors.insert("user".into(), json!(["This field is required."]));
        }
        Some(name) if name.chars().count() > 255 => {
            errors.insert(
                "user".into(),
                json!(["Ensure this field has no more than 255 characters."]),
            );
        }
        _ => {}
    }
    let mut place: Option<i64> = None;
    match body.get("levelStatistics") {
        None => {
            errors.insert("levelStatistics".into(), json!(["This field is required."]));
        }
        Some(Value::Object(stats)) => match stats.get("place") {
            None => {
                errors.insert(
                    "levelStatistics".into(),
                    json!(["The 'place' key is required in levelStatistics."]),
                );
            }
            Some(v) => match v.as_i64() {
                Some(p) => place = Some(p),
                None => {
                    errors.insert(
                        "levelStatistics".into(),
                        json!(["The 'place' for levelStatistics must be an integer."]),
                    );
                }
            },
        },
        Some(_) => {
            errors.insert(
                "levelStatistics".into(),
                json!(["Expected a dictionary of items."]),
            );
        }
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(classroom_key), Some(user), Some(place)) = (classroom_key, user, place) else {
        return respond::server_error();
    };

    let classroom_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM classrooms WHERE classroom_key = ?",
            [classroom_key],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "classroom lookup failed");
            return respond::server_error();
        }
    };
    let Some(classroom_id) = classroom_id else {
        return respond::error(StatusCode::NOT_FOUND, "Classroom not found");
    };

    let student_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE full_name = ? AND classroom_id = ?",
            (user, &classroom_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "student lookup failed");
            return respond::server_error();
        }
    };
    let Some(student_id) = student_id else {
        return respond::error(
            StatusCode::NOT_FOUND,
            "User (Student) not found in this classroom",
        );
    };

    let player_won = place == 1;
    let player_won_i: i64 = if player_won { 1 } else { 0 };
    if let Err(e) = conn.execute(
        "INSERT INTO run_statistics(id, student_id, player_won, recorded_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (Uuid::new_v4().to_string(), &student_id, player_won_i),
    ) {
        error!(error = %e, "run statistics insert failed");
        return respond::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error while saving statistics",
        );
    }

    respond::message(StatusCode::CREATED, "Data inserted successfully")
}

pub fn try_handle(_state: &AppState, conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method, req.path) {
        (&Method::POST, "/checkClassroomKey") => Some(handle_check_classroom_key(conn, req)),
        (&Method::POST, "/insertLevelStatistics") => {
            Some(handle_insert_level_statistics(conn, req))
        }
        _ => None,
    }
}
