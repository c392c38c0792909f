use rusqlite::{Connection, OptionalExtension};

/// Group whose members may use the teacher-scoped API.
pub const TEACHERS_GROUP: &str = "Teachers";

/// Model-level permissions the provisioning seed grants the group. Row-level
/// access is the scope module's job, not a permission.
pub const TEACHER_GROUP_PERMISSIONS: [&str; 7] = [
    "view_student",
    "add_student",
    "change_student",
    "delete_student",
    "view_classroom",
    "view_school",
    "view_runstatistics",
];

/// True iff the account is in the Teachers group. The teacher gate combines
/// this with the linked-profile check from the resolved viewer; superuser
/// bypass is the caller's decision, not part of the predicate.
pub fn is_teacher(conn: &Connection, account_id: &str) -> rusqlite::Result<bool> {
    let in_group: Option<i64> = conn
        .query_row(
            "SELECT 1
             FROM account_groups ag
             JOIN groups g ON g.id = ag.group_id
             WHERE ag.account_id = ? AND g.name = ?",
            (account_id, TEACHERS_GROUP),
            |r| r.get(0),
        )
        .optional()?;
    Ok(in_group.is_some())
}
