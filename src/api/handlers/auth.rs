use hyper::{Method, StatusCode};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::error;

use super::{authenticate, parse_json_object};
use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};
use crate::auth::password;

/// POST /auth/login: password check against the stored Argon2 hash, then a
/// signed session token.
fn handle_login(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let body = match parse_json_object(req.body) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    let mut errors = serde_json::Map::new();
    let username = body
        .get("username")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if username.is_none() {
        errors.insert("username".into(), json!(["This field is required."]));
    }
    let password_plain = body
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    if password_plain.is_none() {
        errors.insert("password".into(), json!(["This field is required."]));
    }
    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(username), Some(password_plain)) = (username, password_plain) else {
        return respond::server_error();
    };

    let account: Option<(String, String)> = match conn
        .query_row(
            "SELECT id, password_hash FROM accounts WHERE username = ?",
            [username],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "account lookup failed");
            return respond::server_error();
        }
    };

    // Unknown user and wrong password answer identically.
    let Some((account_id, password_hash)) = account else {
        return respond::error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    };
    if !password::verify_password(password_plain, &password_hash) {
        return respond::error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }

    let token = match state.tokens.generate(&account_id, username) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "token generation failed");
            return respond::server_error();
        }
    };

    respond::json(
        StatusCode::OK,
        &json!({
            "token": token,
            "expiresIn": state.tokens.expiry_seconds(),
            "username": username
        }),
    )
}

/// GET /auth/me: who the presented token belongs to, with the linked
/// teacher profile when one exists.
fn handle_me(state: &AppState, conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let viewer = match authenticate(state, conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let account: Option<(String, String, i64, i64)> = match conn
        .query_row(
            "SELECT username, email, is_staff, is_superuser FROM accounts WHERE id = ?",
            [&viewer.account_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "account lookup failed");
            return respond::server_error();
        }
    };
    let Some((username, email, is_staff, is_superuser)) = account else {
        return respond::error(StatusCode::UNAUTHORIZED, "Invalid or expired token");
    };

    let teacher = match viewer.teacher_id.as_deref() {
        None => Value::Null,
        Some(teacher_id) => match conn
            .query_row(
                "SELECT t.full_name, sc.name, sc.municipality
                 FROM teachers t
                 JOIN schools sc ON sc.id = t.school_id
                 WHERE t.id = ?",
                [teacher_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
        {
            Ok(Some((full_name, school_name, municipality))) => json!({
                "id": teacher_id,
                "fullName": full_name,
                "school": { "name": school_name, "municipality": municipality }
            }),
            Ok(None) => Value::Null,
            Err(e) => {
                error!(error = %e, "teacher profile lookup failed");
                return respond::server_error();
            }
        },
    };

    respond::json(
        StatusCode::OK,
        &json!({
            "username": username,
            "email": email,
            "isStaff": is_staff != 0,
            "isSuperuser": is_superuser != 0,
            "teacher": teacher
        }),
    )
}

pub fn try_handle(state: &AppState, conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method, req.path) {
        (&Method::POST, "/auth/login") => Some(handle_login(state, conn, req)),
        (&Method::GET, "/auth/me") => Some(handle_me(state, conn, req)),
        _ => None,
    }
}
