use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Creates the content schema. Safe to run repeatedly.
pub fn setup_content_db(conn: &mut Connection) -> Result<(), SetupError> {
    let tx = conn.transaction()?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            post_type TEXT NOT NULL,
            locale TEXT NOT NULL,
            slug TEXT NOT NULL,
            title TEXT NOT NULL,
            excerpt TEXT,
            status TEXT NOT NULL,
            parent_id TEXT,
            order_index INTEGER NOT NULL DEFAULT 0,
            meta_title TEXT,
            meta_description TEXT,
            canonical_url TEXT,
            robots_json TEXT,
            jsonld_overrides TEXT,
            featured_media_id TEXT,
            translation_of_id TEXT,
            review_draft TEXT,
            ai_review_draft TEXT,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS module_instances (
            id TEXT PRIMARY KEY,
            module_type TEXT NOT NULL,
            scope TEXT NOT NULL CHECK(scope IN ('local', 'global')),
            props TEXT NOT NULL,
            review_props TEXT,
            ai_review_props TEXT,
            global_slug TEXT UNIQUE,
            global_label TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS post_modules (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            order_index INTEGER NOT NULL DEFAULT 0,
            locked INTEGER NOT NULL DEFAULT 0,
            overrides TEXT,
            review_overrides TEXT,
            ai_review_overrides TEXT,
            review_added INTEGER NOT NULL DEFAULT 0,
            review_deleted INTEGER NOT NULL DEFAULT 0,
            ai_review_added INTEGER NOT NULL DEFAULT 0,
            ai_review_deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (post_id) REFERENCES posts(id),
            FOREIGN KEY (module_id) REFERENCES module_instances(id)
        )",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_post_modules_post_order \
         ON post_modules (post_id, order_index, created_at, id)",
        [],
    )?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id TEXT NOT NULL,
            mode TEXT NOT NULL CHECK(mode IN ('source', 'review', 'ai-review')),
            snapshot TEXT NOT NULL,
            user_id INTEGER,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_revisions_post ON revisions (post_id, id)",
        [],
    )?;

    tx.commit()?;
    Ok(())
}
