use hyper::{Method, StatusCode};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use super::{authenticate, parse_json_object};
use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};

/// GET /schools: the public list backing the registration form's school
/// picker. Names and municipalities only carry what the picker shows.
fn handle_schools_list(conn: &Connection) -> ApiResponse {
    let mut stmt = match conn
        .prepare("SELECT id, name, municipality FROM schools ORDER BY name, municipality")
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "school query failed");
            return respond::server_error();
        }
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let municipality: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "municipality": municipality }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(schools) => respond::json(StatusCode::OK, &json!({ "schools": schools })),
        Err(e) => {
            error!(error = %e, "school query failed");
            respond::server_error()
        }
    }
}

/// POST /admin/schools: superusers only. Ordinary teachers never create
/// schools, they pick one at registration.
fn handle_school_create(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match authenticate(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !viewer.is_superuser {
        return respond::error(
            StatusCode::FORBIDDEN,
            "You do not have permission to perform this action.",
        );
    }

    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };
    let mut errors = serde_json::Map::new();
    let name = body
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if name.is_none() {
        errors.insert("name".into(), json!(["This field is required."]));
    }
    let municipality = body
        .get("municipality")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if municipality.is_none() {
        errors.insert("municipality".into(), json!(["This field is required."]));
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(name), Some(municipality)) = (name, municipality) else {
        return respond::server_error();
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM schools WHERE name = ? AND municipality = ?",
            (name, municipality),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "school lookup failed");
            return respond::server_error();
        }
    };
    if exists.is_some() {
        return respond::error(
            StatusCode::BAD_REQUEST,
            "A school with that name and municipality already exists.",
        );
    }

    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name, municipality, created_at)
         VALUES(?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&school_id, name, municipality),
    ) {
        error!(error = %e, "school insert failed");
        return respond::server_error();
    }

    respond::json(
        StatusCode::CREATED,
        &json!({
            "school": { "id": school_id, "name": name, "municipality": municipality }
        }),
    )
}

pub fn try_handle(state: &AppState, conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method, req.path) {
        (&Method::GET, "/schools") => Some(handle_schools_list(conn)),
        (&Method::POST, "/admin/schools") => Some(handle_school_create(state, conn, req)),
        _ => None,
    }
}
