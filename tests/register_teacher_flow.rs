use std::time::{SystemTime, UNIX_EPOCH};

use http_body_util::BodyExt;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::{json, Value};

use classkeyd::auth::TokenIssuer;
use classkeyd::{db, dispatch, ApiRequest, AppState};

const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

fn test_state(prefix: &str) -> AppState {
    let db_path = std::env::temp_dir().join(format!(
        "{}-{}.sqlite3",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    let conn = db::open_db(&db_path).expect("open db");
    db::seed_teacher_group(&conn).expect("seed group");
    drop(conn);
    AppState::new(db_path, TokenIssuer::new(TEST_SECRET, 3600))
}

fn send_raw(
    state: &AppState,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: &[u8],
) -> (StatusCode, Value) {
    let req = ApiRequest {
        method: &method,
        path,
        headers: &headers,
        body,
    };
    let resp = dispatch(state, &req);
    let status = resp.status();
    let bytes = tokio_test::block_on(resp.into_body().collect())
        .expect("collect body")
        .to_bytes();
    let value: Value = if bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&bytes).expect("parse response json")
    };
    (status, value)
}

fn send(state: &AppState, method: Method, path: &str, body: Value) -> (StatusCode, Value) {
    let body_bytes = if body.is_null() {
        Vec::new()
    } else {
        body.to_string().into_bytes()
    };
    send_raw(state, method, path, HeaderMap::new(), &body_bytes)
}

fn seed_school(state: &AppState, name: &str) -> String {
    let conn = db::connect(&state.db_path).expect("connect");
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name, municipality) VALUES(?, ?, 'Testville')",
        (&id, name),
    )
    .expect("insert school");
    id
}

fn registration_body(username: &str, first: &str, last: &str, school_id: &str) -> Value {
    json!({
        "username": username,
        "email": format!("{username}@example.com"),
        "password": "longenough-pass",
        "password_confirm": "longenough-pass",
        "first_name": first,
        "last_name": last,
        "school": school_id
    })
}

#[test]
fn registration_creates_account_profile_and_membership() {
    let state = test_state("classkey-register-ok");
    let school_id = seed_school(&state, "Register School");
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("mking", "Martin", "King", &school_id),
    );
    assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");
    assert_eq!(
        body.get("message").and_then(|v| v.as_str()),
        Some("Account created for mking! You can now log in.")
    );

    let conn = db::connect(&state.db_path).expect("connect");
    let (account_id, password_hash, is_staff, is_superuser): (String, String, i64, i64) = conn
        .query_row(
            "SELECT id, password_hash, is_staff, is_superuser FROM accounts WHERE username = 'mking'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .expect("account row");
    assert_eq!(is_staff, 1);
    assert_eq!(is_superuser, 0);
    // Only the salted hash is stored, never the password.
    assert!(password_hash.starts_with("$argon2"));
    assert_ne!(password_hash, "longenough-pass");

    let (full_name, linked_school): (String, String) = conn
        .query_row(
            "SELECT full_name, school_id FROM teachers WHERE account_id = ?",
            [&account_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("teacher row");
    assert_eq!(full_name, "Martin King");
    assert_eq!(linked_school, school_id);

    let memberships: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM account_groups ag
             JOIN groups g ON g.id = ag.group_id
             WHERE ag.account_id = ? AND g.name = 'Teachers'",
            [&account_id],
            |r| r.get(0),
        )
        .expect("membership count");
    assert_eq!(memberships, 1);
}

#[test]
fn full_name_falls_back_to_username() {
    let state = test_state("classkey-register-fallback");
    let school_id = seed_school(&state, "Fallback School");
    let (status, _) = send(
        &state,
        Method::POST,
        "/register/teacher",
        json!({
            "username": "nameless",
            "email": "nameless@example.com",
            "password": "longenough-pass",
            "password_confirm": "longenough-pass",
            "school": school_id
        }),
    );
    assert_eq!(status, StatusCode::CREATED);

    let conn = db::connect(&state.db_path).expect("connect");
    let full_name: String = conn
        .query_row(
            "SELECT t.full_name FROM teachers t
             JOIN accounts a ON a.id = t.account_id
             WHERE a.username = 'nameless'",
            [],
            |r| r.get(0),
        )
        .expect("teacher row");
    assert_eq!(full_name, "nameless");
}

#[test]
fn every_invalid_field_is_reported_at_once() {
    let state = test_state("classkey-register-allerrors");
    let (status, body) = send(&state, Method::POST, "/register/teacher", json!({}));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    for field in ["username", "email", "password", "password_confirm", "school"] {
        assert_eq!(
            body.get(field)
                .and_then(|v| v.get(0))
                .and_then(|v| v.as_str()),
            Some("This field is required."),
            "missing error for {field}: {body}"
        );
    }
}

#[test]
fn duplicate_username_and_email_are_both_reported() {
    let state = test_state("classkey-register-dups");
    let school_id = seed_school(&state, "Dup School");
    let (status, _) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("taken", "First", "Owner", &school_id),
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("taken", "Second", "Claimant", &school_id),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("username")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("A user with that username already exists.")
    );
    assert_eq!(
        body.get("email")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("This email address is already in use.")
    );

    // Only the first registration's rows exist.
    let conn = db::connect(&state.db_path).expect("connect");
    let accounts: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
        .expect("count accounts");
    let teachers: i64 = conn
        .query_row("SELECT COUNT(*) FROM teachers", [], |r| r.get(0))
        .expect("count teachers");
    assert_eq!((accounts, teachers), (1, 1));
}

#[test]
fn mismatched_passwords_are_rejected() {
    let state = test_state("classkey-register-mismatch");
    let school_id = seed_school(&state, "Mismatch School");
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        json!({
            "username": "mmatch",
            "email": "mmatch@example.com",
            "password": "longenough-pass",
            "password_confirm": "different-pass!",
            "first_name": "Mis",
            "last_name": "Match",
            "school": school_id
        }),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("password_confirm")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("Passwords don't match.")
    );
}

#[test]
fn short_password_is_rejected() {
    let state = test_state("classkey-register-short");
    let school_id = seed_school(&state, "Short School");
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        json!({
            "username": "shorty",
            "email": "shorty@example.com",
            "password": "seven77",
            "password_confirm": "seven77",
            "school": school_id
        }),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("password")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("This password is too short. It must contain at least 8 characters.")
    );
}

#[test]
fn invalid_username_characters_are_rejected() {
    let state = test_state("classkey-register-badchars");
    let school_id = seed_school(&state, "Chars School");
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("bad name!", "Bad", "Name", &school_id),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("username")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("Enter a valid username. 150 characters or fewer. Letters, digits and @/./+/-/_ only.")
    );
}

#[test]
fn unknown_school_is_rejected() {
    let state = test_state("classkey-register-noschool");
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("lost", "No", "School", "not-a-school-id"),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("school")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str()),
        Some("Select a valid choice. That choice is not one of the available choices.")
    );
}

#[test]
fn duplicate_teacher_name_at_school_is_rejected() {
    let state = test_state("classkey-register-dupname");
    let school_id = seed_school(&state, "One Name School");
    let (status, _) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("pat1", "Pat", "Lee", &school_id),
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("pat2", "Pat", "Lee", &school_id),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("A teacher with that name is already registered at this school.")
    );

    // Nothing from the refused registration sticks.
    let conn = db::connect(&state.db_path).expect("connect");
    let accounts: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
        .expect("count");
    assert_eq!(accounts, 1);
}

#[test]
fn same_teacher_name_is_fine_at_another_school() {
    let state = test_state("classkey-register-twoschools");
    let first = seed_school(&state, "North School");
    let second = seed_school(&state, "South School");
    let (status, _) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("north-pat", "Pat", "Lee", &first),
    );
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        registration_body("south-pat", "Pat", "Lee", &second),
    );
    assert_eq!(status, StatusCode::CREATED, "second school failed: {body}");
}

#[test]
fn form_encoded_body_is_accepted() {
    let state = test_state("classkey-register-form");
    let school_id = seed_school(&state, "Form School");
    let mut headers = HeaderMap::new();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    let body = format!(
        "username=formteacher&email=form%40example.com&password=longenough-pass\
         &password_confirm=longenough-pass&first_name=Form&last_name=Teacher&school={school_id}"
    );
    let (status, resp) = send_raw(
        &state,
        Method::POST,
        "/register/teacher",
        headers,
        body.as_bytes(),
    );
    assert_eq!(status, StatusCode::CREATED, "form registration failed: {resp}");
    assert_eq!(
        resp.get("message").and_then(|v| v.as_str()),
        Some("Account created for formteacher! You can now log in.")
    );
}
