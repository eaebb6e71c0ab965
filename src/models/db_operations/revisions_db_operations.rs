use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::models::db_operations::{datetime_from_sql, datetime_to_sql, DbError};
use crate::models::{ResolveMode, Revision};

struct RevisionRow {
    id: i64,
    post_id: String,
    mode: String,
    snapshot: String,
    user_id: Option<i64>,
    created_at: String,
}

fn map_revision_row(row: &rusqlite::Row) -> rusqlite::Result<RevisionRow> {
    Ok(RevisionRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        mode: row.get(2)?,
        snapshot: row.get(3)?,
        user_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn decode_revision_row(row: RevisionRow) -> Result<Revision, DbError> {
    let mode = ResolveMode::parse(&row.mode).ok_or_else(|| {
        DbError::Inconsistent(format!("revision {} has unknown mode '{}'", row.id, row.mode))
    })?;
    Ok(Revision {
        id: row.id,
        post_id: row.post_id,
        mode,
        snapshot: serde_json::from_str(&row.snapshot)?,
        user_id: row.user_id,
        created_at: datetime_from_sql(&row.created_at)?,
    })
}

/// Pure append. Runs inside the caller's transaction so a failed write
/// rolls the whole staging operation back instead of silently vanishing.
pub fn record_revision(
    conn: &Connection,
    post_id: &str,
    mode: ResolveMode,
    snapshot: &Value,
    user_id: Option<i64>,
) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO revisions (post_id, mode, snapshot, user_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            post_id,
            mode.as_str(),
            serde_json::to_string(snapshot)?,
            user_id,
            datetime_to_sql(&Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first.
pub fn list_revisions(conn: &Connection, post_id: &str) -> Result<Vec<Revision>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT id, post_id, mode, snapshot, user_id, created_at \
         FROM revisions WHERE post_id = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt.query_map(params![post_id], map_revision_row)?;

    let mut revisions = Vec::new();
    for row in rows {
        revisions.push(decode_revision_row(row?)?);
    }
    Ok(revisions)
}

pub fn get_revision(
    conn: &Connection,
    post_id: &str,
    revision_id: i64,
) -> Result<Option<Revision>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, post_id, mode, snapshot, user_id, created_at \
             FROM revisions WHERE post_id = ?1 AND id = ?2",
            params![post_id, revision_id],
            map_revision_row,
        )
        .optional()?;
    row.map(decode_revision_row).transpose()
}
