//! Teacher self-registration. One request creates the account, the linked
//! teacher profile and the Teachers group membership, all inside a single
//! transaction, with every field validated up front.

use hyper::header::CONTENT_TYPE;
use hyper::{Method, StatusCode};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::api::respond;
use crate::api::types::{ApiRequest, ApiResponse, AppState};
use crate::auth::password;
use crate::auth::permissions::TEACHERS_GROUP;

/// Accept the registration body as JSON or a classic URL-encoded form.
fn parse_registration_fields(
    req: &ApiRequest,
) -> Result<serde_json::Map<String, Value>, ApiResponse> {
    let content_type = req
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        let pairs: Vec<(String, String)> = match serde_urlencoded::from_bytes(req.body) {
            Ok(v) => v,
            Err(_) => {
                return Err(respond::error(StatusCode::BAD_REQUEST, "Invalid form body"));
            }
        };
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert(k, Value::String(v));
        }
        return Ok(map);
    }
    super::parse_json_object(req.body)
}

fn str_field<'a>(body: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn valid_username(username: &str) -> bool {
    username.len() <= 150
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

fn username_taken(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM accounts WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

fn email_taken(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    let row: Option<i64> = conn
        .query_row("SELECT 1 FROM accounts WHERE email = ?", [email], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(row.is_some())
}

fn handle_register_teacher(conn: &Connection, req: &ApiRequest) -> ApiResponse {
    let body = match parse_registration_fields(req) {
        Ok(map) => map,
        Err(resp) => return resp,
    };

    let username = str_field(&body, "username");
    // Passwords are taken verbatim; leading or trailing spaces count.
    let password_plain = body
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let password_confirm = body
        .get("password_confirm")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let first_name = str_field(&body, "first_name").unwrap_or("");
    let last_name = str_field(&body, "last_name").unwrap_or("");
    let email = str_field(&body, "email");
    let school = str_field(&body, "school");

    // Collect every failed field before answering, so one round trip shows
    // the whole form state.
    let mut errors = serde_json::Map::new();

    match username {
        None => {
            errors.insert("username".into(), json!(["This field is required."]));
        }
        Some(u) if !valid_username(u) => {
            errors.insert(
                "username".into(),
                json!([
                    "Enter a valid username. 150 characters or fewer. Letters, digits and @/./+/-/_ only."
                ]),
            );
        }
        Some(u) => match username_taken(conn, u) {
            Ok(true) => {
                errors.insert(
                    "username".into(),
                    json!(["A user with that username already exists."]),
                );
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "username lookup failed");
                return respond::server_error();
            }
        },
    }

    match email {
        None => {
            errors.insert("email".into(), json!(["This field is required."]));
        }
        Some(addr) if !addr.contains('@') => {
            errors.insert("email".into(), json!(["Enter a valid email address."]));
        }
        Some(addr) => match email_taken(conn, addr) {
            Ok(true) => {
                errors.insert(
                    "email".into(),
                    json!(["This email address is already in use."]),
                );
            }
            Ok(false) => {}
            Err(e) => {
                error!(error = %e, "email lookup failed");
                return respond::server_error();
            }
        },
    }

    match password_plain {
        None => {
            errors.insert("password".into(), json!(["This field is required."]));
        }
        Some(p) if p.len() < 8 => {
            errors.insert(
                "password".into(),
                json!(["This password is too short. It must contain at least 8 characters."]),
            );
        }
        _ => {}
    }
    match (password_plain, password_confirm) {
        (_, None) => {
            errors.insert(
                "password_confirm".into(),
                json!(["This field is required."]),
            );
        }
        (Some(p), Some(pc)) if p != pc => {
            errors.insert("password_confirm".into(), json!(["Passwords don't match."]));
        }
        _ => {}
    }

    let mut school_id: Option<String> = None;
    match school {
        None => {
            errors.insert("school".into(), json!(["This field is required."]));
        }
        Some(candidate) => match conn
            .query_row(
                "SELECT id FROM schools WHERE id = ?",
                [candidate],
                |r| r.get::<_, String>(0),
            )
            .optional()
        {
            Ok(Some(id)) => school_id = Some(id),
            Ok(None) => {
                errors.insert(
                    "school".into(),
                    json!(["Select a valid choice. That choice is not one of the available choices."]),
                );
            }
            Err(e) => {
                error!(error = %e, "school lookup failed");
                return respond::server_error();
            }
        },
    }

    if !errors.is_empty() {
        return respond::field_errors(Value::Object(errors));
    }
    let (Some(username), Some(password_plain), Some(email), Some(school_id)) =
        (username, password_plain, email, school_id.as_deref())
    else {
        return respond::server_error();
    };

    // Display name for the profile; the username stands in when the form
    // carried no name at all.
    let combined = format!("{first_name} {last_name}");
    let combined = combined.trim();
    let full_name = if combined.is_empty() { username } else { combined };

    let duplicate: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM teachers WHERE full_name = ? AND school_id = ?",
            (full_name, school_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "teacher lookup failed");
            return respond::server_error();
        }
    };
    if duplicate.is_some() {
        return respond::error(
            StatusCode::BAD_REQUEST,
            "A teacher with that name is already registered at this school.",
        );
    }

    let password_hash = match password::hash_password(password_plain) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %e, "password hashing failed");
            return respond::server_error();
        }
    };

    // Account, profile and group membership commit together or not at all.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "transaction begin failed");
            return respond::server_error();
        }
    };

    let group_id: Option<String> = match tx
        .query_row(
            "SELECT id FROM groups WHERE name = ?",
            [TEACHERS_GROUP],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "group lookup failed");
            return respond::server_error();
        }
    };
    let Some(group_id) = group_id else {
        error!("the Teachers group is missing; run provisioning with --init");
        return respond::server_error();
    };

    let account_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO accounts(id, username, email, password_hash, first_name, last_name, is_staff, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&account_id, username, email, &password_hash, first_name, last_name),
    ) {
        let _ = tx.rollback();
        error!(error = %e, "account insert failed");
        return respond::server_error();
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO teachers(id, account_id, full_name, school_id, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&teacher_id, &account_id, full_name, school_id),
    ) {
        let _ = tx.rollback();
        error!(error = %e, "teacher profile insert failed");
        return respond::server_error();
    }

    if let Err(e) = tx.execute(
        "INSERT INTO account_groups(account_id, group_id) VALUES(?, ?)",
        (&account_id, &group_id),
    ) {
        let _ = tx.rollback();
        error!(error = %e, "group membership insert failed");
        return respond::server_error();
    }

    if let Err(e) = tx.commit() {
        error!(error = %e, "registration commit failed");
        return respond::server_error();
    }

    respond::message(
        StatusCode::CREATED,
        format!("Account created for {username}! You can now log in."),
    )
}

pub fn try_handle(_state: &AppState, conn: &Connection, req: &ApiRequest) -> Option<ApiResponse> {
    match (req.method, req.path) {
        (&Method::POST, "/register/teacher") => Some(handle_register_teacher(conn, req)),
        _ => None,
    }
}
