//! Ownership-scoped row access for the teacher-facing API.
//!
//! Every list/detail/mutate operation works on the subset of rows
//! transitively owned by the requesting teacher: classrooms they teach,
//! students in those classrooms, run statistics of those students. A
//! superuser bypasses the filters and sees every row. A viewer with no
//! linked teacher profile gets empty subsets, never an error and never
//! another teacher's data.

use rusqlite::{Connection, OptionalExtension, Row};

/// The resolved requesting principal.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub account_id: String,
    pub is_superuser: bool,
    /// Linked teacher profile, if any.
    pub teacher_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassroomRow {
    pub id: String,
    pub classroom_key: String,
    pub classroom_name: String,
    pub teacher_id: String,
    pub student_count: i64,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub full_name: String,
    pub classroom_id: String,
}

#[derive(Debug, Clone)]
pub struct RunStatisticRow {
    pub id: String,
    pub student_id: String,
    pub player_won: bool,
    pub recorded_at: Option<String>,
}

/// Look up the account behind a verified token. `None` when the account no
/// longer exists.
pub fn resolve_viewer(conn: &Connection, account_id: &str) -> rusqlite::Result<Option<Viewer>> {
    let account: Option<(String, i64)> = conn
        .query_row(
            "SELECT id, is_superuser FROM accounts WHERE id = ?",
            [account_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((id, is_superuser)) = account else {
        return Ok(None);
    };

    let teacher_id: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE account_id = ?",
            [&id],
            |r| r.get(0),
        )
        .optional()?;

    Ok(Some(Viewer {
        account_id: id,
        is_superuser: is_superuser != 0,
        teacher_id,
    }))
}

fn map_classroom(row: &Row<'_>) -> rusqlite::Result<ClassroomRow> {
    Ok(ClassroomRow {
        id: row.get(0)?,
        classroom_key: row.get(1)?,
        classroom_name: row.get(2)?,
        teacher_id: row.get(3)?,
        student_count: row.get(4)?,
    })
}

fn map_student(row: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        classroom_id: row.get(2)?,
    })
}

fn map_run_statistic(row: &Row<'_>) -> rusqlite::Result<RunStatisticRow> {
    let won: i64 = row.get(2)?;
    Ok(RunStatisticRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        player_won: won != 0,
        recorded_at: row.get(3)?,
    })
}

pub fn classrooms_for(conn: &Connection, viewer: &Viewer) -> rusqlite::Result<Vec<ClassroomRow>> {
    if viewer.is_superuser {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.classroom_key, c.classroom_name, c.teacher_id,
                    (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id) AS student_count
             FROM classrooms c
             ORDER BY c.classroom_key",
        )?;
        let rows = stmt.query_map([], map_classroom)?;
        return rows.collect();
    }

    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(
        "SELECT c.id, c.classroom_key, c.classroom_name, c.teacher_id,
                (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id) AS student_count
         FROM classrooms c
         WHERE c.teacher_id = ?
         ORDER BY c.classroom_key",
    )?;
    let rows = stmt.query_map([teacher_id], map_classroom)?;
    rows.collect()
}

pub fn students_for(conn: &Connection, viewer: &Viewer) -> rusqlite::Result<Vec<StudentRow>> {
    if viewer.is_superuser {
        let mut stmt = conn.prepare(
            "SELECT s.id, s.full_name, s.classroom_id
             FROM students s
             ORDER BY s.full_name",
        )?;
        let rows = stmt.query_map([], map_student)?;
        return rows.collect();
    }

    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(
        "SELECT s.id, s.full_name, s.classroom_id
         FROM students s
         JOIN classrooms c ON c.id = s.classroom_id
         WHERE c.teacher_id = ?
         ORDER BY s.full_name",
    )?;
    let rows = stmt.query_map([teacher_id], map_student)?;
    rows.collect()
}

pub fn run_statistics_for(
    conn: &Connection,
    viewer: &Viewer,
) -> rusqlite::Result<Vec<RunStatisticRow>> {
    if viewer.is_superuser {
        let mut stmt = conn.prepare(
            "SELECT r.id, r.student_id, r.player_won, r.recorded_at
             FROM run_statistics r
             ORDER BY r.recorded_at",
        )?;
        let rows = stmt.query_map([], map_run_statistic)?;
        return rows.collect();
    }

    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(
        "SELECT r.id, r.student_id, r.player_won, r.recorded_at
         FROM run_statistics r
         JOIN students s ON s.id = r.student_id
         JOIN classrooms c ON c.id = s.classroom_id
         WHERE c.teacher_id = ?
         ORDER BY r.recorded_at",
    )?;
    let rows = stmt.query_map([teacher_id], map_run_statistic)?;
    rows.collect()
}

/// Fetch one classroom if it is inside the viewer's subset. Rows outside the
/// subset read as absent.
pub fn classroom_in_scope(
    conn: &Connection,
    viewer: &Viewer,
    classroom_id: &str,
) -> rusqlite::Result<Option<ClassroomRow>> {
    if viewer.is_superuser {
        return conn
            .query_row(
                "SELECT c.id, c.classroom_key, c.classroom_name, c.teacher_id,
                        (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id)
                 FROM classrooms c
                 WHERE c.id = ?",
                [classroom_id],
                map_classroom,
            )
            .optional();
    }

    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT c.id, c.classroom_key, c.classroom_name, c.teacher_id,
                (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id)
         FROM classrooms c
         WHERE c.id = ? AND c.teacher_id = ?",
        (classroom_id, teacher_id),
        map_classroom,
    )
    .optional()
}

/// Fetch one student if it is inside the viewer's subset.
pub fn student_in_scope(
    conn: &Connection,
    viewer: &Viewer,
    student_id: &str,
) -> rusqlite::Result<Option<StudentRow>> {
    if viewer.is_superuser {
        return conn
            .query_row(
                "SELECT s.id, s.full_name, s.classroom_id FROM students s WHERE s.id = ?",
                [student_id],
                map_student,
            )
            .optional();
    }

    let Some(teacher_id) = viewer.teacher_id.as_deref() else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT s.id, s.full_name, s.classroom_id
         FROM students s
         JOIN classrooms c ON c.id = s.classroom_id
         WHERE s.id = ? AND c.teacher_id = ?",
        (student_id, teacher_id),
        map_student,
    )
    .optional()
}
