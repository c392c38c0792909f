use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::permissions::{TEACHERS_GROUP, TEACHER_GROUP_PERMISSIONS};

/// Open the database and make sure the schema is current. Called once at
/// startup and by `--init`; request handling uses `connect` instead.
pub fn open_db(db_path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = connect(db_path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Plain connection with pragmas only. Each request opens its own; the busy
/// timeout covers write contention between concurrent request connections.
pub fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            municipality TEXT NOT NULL,
            created_at TEXT,
            UNIQUE(name, municipality)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL DEFAULT '',
            is_staff INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_permissions(
            group_id TEXT NOT NULL,
            codename TEXT NOT NULL,
            PRIMARY KEY(group_id, codename),
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_groups(
            account_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            PRIMARY KEY(account_id, group_id),
            FOREIGN KEY(account_id) REFERENCES accounts(id),
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            account_id TEXT UNIQUE,
            full_name TEXT NOT NULL,
            school_id TEXT NOT NULL,
            created_at TEXT,
            UNIQUE(full_name, school_id),
            FOREIGN KEY(account_id) REFERENCES accounts(id),
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            classroom_key TEXT NOT NULL UNIQUE,
            classroom_name TEXT NOT NULL DEFAULT '',
            teacher_id TEXT NOT NULL,
            created_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_teacher ON classrooms(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            created_at TEXT,
            UNIQUE(full_name, classroom_id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_statistics(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            player_won INTEGER NOT NULL,
            recorded_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_statistics_student ON run_statistics(student_id)",
        [],
    )?;

    // Databases created before the classroom display name / run timestamps
    // existed need the columns added.
    ensure_classrooms_name(conn)?;
    ensure_run_statistics_recorded_at(conn)?;

    Ok(())
}

/// Idempotent provisioning of the "Teachers" group. Creates the group row if
/// absent and resets its permission set to exactly the fixed codename list,
/// dropping stale grants from older deployments. Run via `--init`, never
/// ambiently on process start.
pub fn seed_teacher_group(conn: &Connection) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM groups WHERE name = ?",
            [TEACHERS_GROUP],
            |r| r.get(0),
        )
        .optional()?;
    let group_id = match existing {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute("INSERT INTO groups(id, name) VALUES(?, ?)", (&id, TEACHERS_GROUP))?;
            id
        }
    };

    tx.execute("DELETE FROM group_permissions WHERE group_id = ?", [&group_id])?;
    for codename in TEACHER_GROUP_PERMISSIONS {
        tx.execute(
            "INSERT INTO group_permissions(group_id, codename) VALUES(?, ?)",
            (&group_id, codename),
        )?;
    }

    tx.commit()?;
    Ok(())
}

/// Create the named superuser account unless it already exists.
pub fn ensure_superuser(
    conn: &Connection,
    username: &str,
    password: &str,
    email: Option<&str>,
) -> anyhow::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM accounts WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }

    let hash = crate::auth::password::hash_password(password)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?;
    conn.execute(
        "INSERT INTO accounts(
           id, username, email, password_hash, is_staff, is_superuser, created_at
         ) VALUES(?, ?, ?, ?, 1, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            Uuid::new_v4().to_string(),
            username,
            email.unwrap_or(""),
            &hash,
        ),
    )?;
    Ok(())
}

fn ensure_classrooms_name(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classrooms", "classroom_name")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classrooms ADD COLUMN classroom_name TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn ensure_run_statistics_recorded_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "run_statistics", "recorded_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE run_statistics ADD COLUMN recorded_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
