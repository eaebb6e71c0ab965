use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::db_operations::{
    datetime_from_sql, datetime_to_sql, value_from_sql, value_to_sql, DbError,
};
use crate::models::{Post, PostFieldPatch, PostFields};

const POST_COLUMNS: &str = "id, post_type, locale, slug, title, excerpt, status, parent_id, \
     order_index, meta_title, meta_description, canonical_url, robots_json, jsonld_overrides, \
     featured_media_id, translation_of_id, review_draft, ai_review_draft, created_at, deleted_at";

// Raw row before JSON/timestamp columns are decoded. Decoding happens
// outside the rusqlite row closure so errors surface as DbError.
struct PostRow {
    id: String,
    post_type: String,
    locale: String,
    slug: String,
    title: String,
    excerpt: Option<String>,
    status: String,
    parent_id: Option<String>,
    order_index: i64,
    meta_title: Option<String>,
    meta_description: Option<String>,
    canonical_url: Option<String>,
    robots_json: Option<String>,
    jsonld_overrides: Option<String>,
    featured_media_id: Option<String>,
    translation_of_id: Option<String>,
    review_draft: Option<String>,
    ai_review_draft: Option<String>,
    created_at: String,
    deleted_at: Option<String>,
}

fn map_post_row(row: &rusqlite::Row) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        post_type: row.get(1)?,
        locale: row.get(2)?,
        slug: row.get(3)?,
        title: row.get(4)?,
        excerpt: row.get(5)?,
        status: row.get(6)?,
        parent_id: row.get(7)?,
        order_index: row.get(8)?,
        meta_title: row.get(9)?,
        meta_description: row.get(10)?,
        canonical_url: row.get(11)?,
        robots_json: row.get(12)?,
        jsonld_overrides: row.get(13)?,
        featured_media_id: row.get(14)?,
        translation_of_id: row.get(15)?,
        review_draft: row.get(16)?,
        ai_review_draft: row.get(17)?,
        created_at: row.get(18)?,
        deleted_at: row.get(19)?,
    })
}

fn decode_post_row(row: PostRow) -> Result<Post, DbError> {
    let fields = PostFields {
        post_type: row.post_type,
        locale: row.locale,
        slug: row.slug,
        title: row.title,
        excerpt: row.excerpt,
        status: row.status,
        parent_id: row.parent_id,
        order_index: row.order_index,
        meta_title: row.meta_title,
        meta_description: row.meta_description,
        canonical_url: row.canonical_url,
        robots_json: value_from_sql(row.robots_json)?,
        jsonld_overrides: value_from_sql(row.jsonld_overrides)?,
        featured_media_id: row.featured_media_id,
        translation_of_id: row.translation_of_id,
    };
    let review_draft: Option<PostFieldPatch> = row
        .review_draft
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let ai_review_draft: Option<PostFieldPatch> = row
        .ai_review_draft
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Post {
        id: row.id,
        fields,
        review_draft,
        ai_review_draft,
        created_at: datetime_from_sql(&row.created_at)?,
        deleted_at: row.deleted_at.as_deref().map(datetime_from_sql).transpose()?,
    })
}

pub fn create_post(conn: &Connection, fields: &PostFields) -> Result<Post, DbError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO posts (id, post_type, locale, slug, title, excerpt, status, parent_id, \
         order_index, meta_title, meta_description, canonical_url, robots_json, \
         jsonld_overrides, featured_media_id, translation_of_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            id,
            fields.post_type,
            fields.locale,
            fields.slug,
            fields.title,
            fields.excerpt,
            fields.status,
            fields.parent_id,
            fields.order_index,
            fields.meta_title,
            fields.meta_description,
            fields.canonical_url,
            value_to_sql(fields.robots_json.as_ref())?,
            value_to_sql(fields.jsonld_overrides.as_ref())?,
            fields.featured_media_id,
            fields.translation_of_id,
            datetime_to_sql(&created_at),
        ],
    )?;

    Ok(Post {
        id,
        fields: fields.clone(),
        review_draft: None,
        ai_review_draft: None,
        created_at,
        deleted_at: None,
    })
}

/// Reads a post by id. Soft-deleted posts are invisible to every caller.
pub fn read_post(conn: &Connection, post_id: &str) -> Result<Option<Post>, DbError> {
    let row = conn
        .query_row(
            &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1 AND deleted_at IS NULL"),
            params![post_id],
            map_post_row,
        )
        .optional()?;
    row.map(decode_post_row).transpose()
}

/// Writes the ai-review draft column. Approved columns and the review
/// draft are never touched by this path.
pub fn write_ai_review_draft(
    conn: &Connection,
    post_id: &str,
    draft: &PostFieldPatch,
) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE posts SET ai_review_draft = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![post_id, serde_json::to_string(draft)?],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post '{}'", post_id)));
    }
    Ok(())
}

/// Collapses the ai-review draft onto the review draft during promotion.
pub fn collapse_ai_review_draft(
    conn: &Connection,
    post_id: &str,
    merged: &PostFieldPatch,
) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE posts SET review_draft = ?2, ai_review_draft = NULL \
         WHERE id = ?1 AND deleted_at IS NULL",
        params![post_id, serde_json::to_string(merged)?],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post '{}'", post_id)));
    }
    Ok(())
}

pub fn soft_delete_post(conn: &Connection, post_id: &str) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE posts SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![post_id, datetime_to_sql(&Utc::now())],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post '{}'", post_id)));
    }
    Ok(())
}
