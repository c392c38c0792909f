use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use http_body_util::BodyExt;
use hyper::{HeaderMap, Method, StatusCode};
use serde_json::{json, Value};

use classkeyd::auth::TokenIssuer;
use classkeyd::{db, dispatch, ApiRequest, AppState};

const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

fn temp_db(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "{}-{}.sqlite3",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ))
}

fn send_with_token(
    state: &AppState,
    method: Method,
    path: &str,
    body: Value,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let value = format!("Bearer {token}");
        headers.insert(
            hyper::header::AUTHORIZATION,
            value.parse().expect("header value"),
        );
    }
    let body_bytes = if body.is_null() {
        Vec::new()
    } else {
        body.to_string().into_bytes()
    };
    let req = ApiRequest {
        method: &method,
        path,
        headers: &headers,
        body: &body_bytes,
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
    send_with_token(state, method, path, body, None)
}

fn group_permissions(conn: &rusqlite::Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT gp.codename
             FROM group_permissions gp
             JOIN groups g ON g.id = gp.group_id
             WHERE g.name = 'Teachers'
             ORDER BY gp.codename",
        )
        .expect("prepare");
    stmt.query_map([], |r| r.get(0))
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows")
}

#[test]
fn seed_creates_group_with_fixed_permissions() {
    let path = temp_db("classkey-seed-create");
    let conn = db::open_db(&path).expect("open db");
    db::seed_teacher_group(&conn).expect("seed");

    let name: String = conn
        .query_row("SELECT name FROM groups", [], |r| r.get(0))
        .expect("group row");
    assert_eq!(name, "Teachers");
    assert_eq!(
        group_permissions(&conn),
        vec![
            "add_student",
            "change_student",
            "delete_student",
            "view_classroom",
            "view_runstatistics",
            "view_school",
            "view_student",
        ]
    );
}

#[test]
fn reseeding_is_idempotent_and_restores_the_grant_set() {
    let path = temp_db("classkey-seed-reseed");
    let conn = db::open_db(&path).expect("open db");
    db::seed_teacher_group(&conn).expect("seed");
    let group_id: String = conn
        .query_row("SELECT id FROM groups WHERE name = 'Teachers'", [], |r| {
            r.get(0)
        })
        .expect("group id");

    // A member hangs off the group before the reseed.
    conn.execute(
        "INSERT INTO accounts(id, username, email, password_hash) VALUES('a1', 'kept', 'kept@example.com', 'x')",
        [],
    )
    .expect("account");
    conn.execute(
        "INSERT INTO account_groups(account_id, group_id) VALUES('a1', ?)",
        [&group_id],
    )
    .expect("membership");

    // Drift: one grant lost, one bogus grant added.
    conn.execute(
        "DELETE FROM group_permissions WHERE codename = 'view_school'",
        [],
    )
    .expect("drop grant");
    conn.execute(
        "INSERT INTO group_permissions(group_id, codename) VALUES(?, 'delete_everything')",
        [&group_id],
    )
    .expect("bogus grant");

    db::seed_teacher_group(&conn).expect("reseed");

    let group_id_after: String = conn
        .query_row("SELECT id FROM groups WHERE name = 'Teachers'", [], |r| {
            r.get(0)
        })
        .expect("group id");
    assert_eq!(group_id_after, group_id);
    assert_eq!(
        group_permissions(&conn),
        vec![
            "add_student",
            "change_student",
            "delete_student",
            "view_classroom",
            "view_runstatistics",
            "view_school",
            "view_student",
        ]
    );
    let memberships: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM account_groups WHERE account_id = 'a1'",
            [],
            |r| r.get(0),
        )
        .expect("membership count");
    assert_eq!(memberships, 1);
}

#[test]
fn ensure_superuser_creates_exactly_once() {
    let path = temp_db("classkey-seed-super");
    let conn = db::open_db(&path).expect("open db");
    db::ensure_superuser(&conn, "admin", "admin-pass-123", Some("admin@example.com"))
        .expect("first ensure");
    let hash_before: String = conn
        .query_row(
            "SELECT password_hash FROM accounts WHERE username = 'admin'",
            [],
            |r| r.get(0),
        )
        .expect("hash");
    assert!(hash_before.starts_with("$argon2"));

    db::ensure_superuser(&conn, "admin", "different-pass-456", None).expect("second ensure");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
        .expect("count");
    assert_eq!(count, 1);
    let hash_after: String = conn
        .query_row(
            "SELECT password_hash FROM accounts WHERE username = 'admin'",
            [],
            |r| r.get(0),
        )
        .expect("hash");
    // An existing superuser is left untouched.
    assert_eq!(hash_after, hash_before);

    let (is_staff, is_superuser): (i64, i64) = conn
        .query_row(
            "SELECT is_staff, is_superuser FROM accounts WHERE username = 'admin'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("flags");
    assert_eq!(is_staff, 1);
    assert_eq!(is_superuser, 1);
}

#[test]
fn registration_without_the_seed_fails_cleanly() {
    let path = temp_db("classkey-seed-unseeded");
    let conn = db::open_db(&path).expect("open db");
    conn.execute(
        "INSERT INTO schools(id, name, municipality) VALUES('s1', 'Seedless School', 'Seedville')",
        [],
    )
    .expect("school");
    drop(conn);

    let state = AppState::new(path.clone(), TokenIssuer::new(TEST_SECRET, 3600));
    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        json!({
            "username": "hopeful",
            "email": "hopeful@example.com",
            "password": "longenough-pass",
            "password_confirm": "longenough-pass",
            "first_name": "Hope",
            "last_name": "Full",
            "school": "s1"
        }),
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("An internal server error occurred")
    );

    // Nothing half-registered sticks around.
    let conn = db::connect(&path).expect("connect");
    let accounts: i64 = conn
        .query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0))
        .expect("count");
    assert_eq!(accounts, 0);
}

#[test]
fn reopening_upgrades_older_tables() {
    let path = temp_db("classkey-seed-migrate");
    {
        let conn = rusqlite::Connection::open(&path).expect("open raw");
        conn.execute_batch(
            "CREATE TABLE classrooms (
                id TEXT PRIMARY KEY,
                classroom_key TEXT NOT NULL UNIQUE,
                teacher_id TEXT NOT NULL,
                created_at TEXT
            );
            CREATE TABLE run_statistics (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                player_won INTEGER NOT NULL
            );",
        )
        .expect("old schema");
    }
    let conn = db::open_db(&path).expect("open db");
    let has_column = |table: &str, column: &str| -> bool {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("pragma");
        let cols = stmt
            .query_map([], |r| r.get::<_, String>(1))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("columns");
        cols.iter().any(|c| c == column)
    };
    assert!(has_column("classrooms", "classroom_name"));
    assert!(has_column("run_statistics", "recorded_at"));
}

#[test]
fn provisioned_superuser_drives_the_admin_api() {
    let path = temp_db("classkey-seed-admin");
    let conn = db::open_db(&path).expect("open db");
    db::seed_teacher_group(&conn).expect("seed");
    db::ensure_superuser(&conn, "admin", "admin-pass-123", None).expect("superuser");
    drop(conn);
    let state = AppState::new(path, TokenIssuer::new(TEST_SECRET, 3600));

    let (status, body) = send(
        &state,
        Method::POST,
        "/auth/login",
        json!({ "username": "admin", "password": "admin-pass-123" }),
    );
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let token = body
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();

    let (status, body) = send_with_token(
        &state,
        Method::POST,
        "/admin/schools",
        json!({ "name": "Admin School", "municipality": "Adminville" }),
        Some(&token),
    );
    assert_eq!(status, StatusCode::CREATED, "school create failed: {body}");
    assert!(body
        .get("school")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .is_some());

    // The same name/municipality pair cannot be created twice.
    let (status, body) = send_with_token(
        &state,
        Method::POST,
        "/admin/schools",
        json!({ "name": "Admin School", "municipality": "Adminville" }),
        Some(&token),
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("A school with that name and municipality already exists.")
    );

    // The public picker list shows it, no token needed.
    let (status, body) = send(&state, Method::GET, "/schools", Value::Null);
    assert_eq!(status, StatusCode::OK);
    let schools = body
        .get("schools")
        .and_then(|v| v.as_array())
        .expect("schools array");
    assert_eq!(schools.len(), 1);
    assert_eq!(
        schools[0].get("name").and_then(|v| v.as_str()),
        Some("Admin School")
    );
}

#[test]
fn ordinary_teacher_cannot_create_schools() {
    let path = temp_db("classkey-seed-noadmin");
    let conn = db::open_db(&path).expect("open db");
    db::seed_teacher_group(&conn).expect("seed");
    conn.execute(
        "INSERT INTO schools(id, name, municipality) VALUES('s1', 'Base School', 'Baseville')",
        [],
    )
    .expect("school");
    drop(conn);
    let state = AppState::new(path, TokenIssuer::new(TEST_SECRET, 3600));

    let (status, body) = send(
        &state,
        Method::POST,
        "/register/teacher",
        json!({
            "username": "plainteach",
            "email": "plainteach@example.com",
            "password": "longenough-pass",
            "password_confirm": "longenough-pass",
            "first_name": "Plain",
            "last_name": "Teach",
            "school": "s1"
        }),
    );
    assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");
    let (status, body) = send(
        &state,
        Method::POST,
        "/auth/login",
        json!({ "username": "plainteach", "password": "longenough-pass" }),
    );
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    let token = body
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();

    let (status, body) = send_with_token(
        &state,
        Method::POST,
        "/admin/schools",
        json!({ "name": "Rogue School", "municipality": "Rogueville" }),
        Some(&token),
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body.get("error").and_then(|v| v.as_str()),
        Some("You do not have permission to perform this action.")
    );
}
