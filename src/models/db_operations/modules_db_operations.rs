use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::models::db_operations::{datetime_from_sql, datetime_to_sql, json_map_from_sql, DbError};
use crate::models::{JsonMap, ModuleInstance, ModuleScope, PostModule};

const INSTANCE_COLUMNS: &str =
    "id, module_type, scope, props, review_props, ai_review_props, global_slug, global_label, created_at";

const ASSOCIATION_COLUMNS: &str = "id, post_id, module_id, order_index, locked, overrides, \
     review_overrides, ai_review_overrides, review_added, review_deleted, ai_review_added, \
     ai_review_deleted, created_at";

struct InstanceRow {
    id: String,
    module_type: String,
    scope: String,
    props: String,
    review_props: Option<String>,
    ai_review_props: Option<String>,
    global_slug: Option<String>,
    global_label: Option<String>,
    created_at: String,
}

fn map_instance_row(row: &rusqlite::Row) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        module_type: row.get(1)?,
        scope: row.get(2)?,
        props: row.get(3)?,
        review_props: row.get(4)?,
        ai_review_props: row.get(5)?,
        global_slug: row.get(6)?,
        global_label: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn decode_instance_row(row: InstanceRow) -> Result<ModuleInstance, DbError> {
    let scope = match row.scope.as_str() {
        "local" => ModuleScope::Local,
        "global" => ModuleScope::Global {
            slug: row.global_slug.ok_or_else(|| {
                DbError::Inconsistent(format!("global module instance '{}' has no slug", row.id))
            })?,
            label: row.global_label.unwrap_or_default(),
        },
        other => {
            return Err(DbError::Inconsistent(format!(
                "module instance '{}' has unknown scope '{}'",
                row.id, other
            )))
        }
    };
    Ok(ModuleInstance {
        id: row.id,
        module_type: row.module_type,
        scope,
        props: serde_json::from_str(&row.props)?,
        review_props: json_map_from_sql(row.review_props)?,
        ai_review_props: json_map_from_sql(row.ai_review_props)?,
        created_at: datetime_from_sql(&row.created_at)?,
    })
}

struct AssociationRow {
    id: String,
    post_id: String,
    module_id: String,
    order_index: i64,
    locked: bool,
    overrides: Option<String>,
    review_overrides: Option<String>,
    ai_review_overrides: Option<String>,
    review_added: bool,
    review_deleted: bool,
    ai_review_added: bool,
    ai_review_deleted: bool,
    created_at: String,
}

fn map_association_row(row: &rusqlite::Row) -> rusqlite::Result<AssociationRow> {
    Ok(AssociationRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        module_id: row.get(2)?,
        order_index: row.get(3)?,
        locked: row.get(4)?,
        overrides: row.get(5)?,
        review_overrides: row.get(6)?,
        ai_review_overrides: row.get(7)?,
        review_added: row.get(8)?,
        review_deleted: row.get(9)?,
        ai_review_added: row.get(10)?,
        ai_review_deleted: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn decode_association_row(row: AssociationRow) -> Result<PostModule, DbError> {
    Ok(PostModule {
        id: row.id,
        post_id: row.post_id,
        module_id: row.module_id,
        order_index: row.order_index,
        locked: row.locked,
        overrides: json_map_from_sql(row.overrides)?,
        review_overrides: json_map_from_sql(row.review_overrides)?,
        ai_review_overrides: json_map_from_sql(row.ai_review_overrides)?,
        review_added: row.review_added,
        review_deleted: row.review_deleted,
        ai_review_added: row.ai_review_added,
        ai_review_deleted: row.ai_review_deleted,
        created_at: datetime_from_sql(&row.created_at)?,
    })
}

// ====================================================================
// =================== MODULE INSTANCE OPERATIONS =====================
// ====================================================================

pub fn create_instance(
    conn: &Connection,
    module_type: &str,
    scope: &ModuleScope,
    props: &JsonMap,
) -> Result<ModuleInstance, DbError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();
    let (global_slug, global_label) = match scope {
        ModuleScope::Local => (None, None),
        ModuleScope::Global { slug, label } => (Some(slug.as_str()), Some(label.as_str())),
    };

    conn.execute(
        "INSERT INTO module_instances \
         (id, module_type, scope, props, global_slug, global_label, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            module_type,
            scope.as_str(),
            serde_json::to_string(props)?,
            global_slug,
            global_label,
            datetime_to_sql(&created_at),
        ],
    )?;

    Ok(ModuleInstance {
        id,
        module_type: module_type.to_string(),
        scope: scope.clone(),
        props: props.clone(),
        review_props: None,
        ai_review_props: None,
        created_at,
    })
}

pub fn read_instance(conn: &Connection, instance_id: &str) -> Result<Option<ModuleInstance>, DbError> {
    let row = conn
        .query_row(
            &format!("SELECT {INSTANCE_COLUMNS} FROM module_instances WHERE id = ?1"),
            params![instance_id],
            map_instance_row,
        )
        .optional()?;
    row.map(decode_instance_row).transpose()
}

pub fn read_global_instance_by_slug(
    conn: &Connection,
    slug: &str,
) -> Result<Option<ModuleInstance>, DbError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {INSTANCE_COLUMNS} FROM module_instances \
                 WHERE scope = 'global' AND global_slug = ?1"
            ),
            params![slug],
            map_instance_row,
        )
        .optional()?;
    row.map(decode_instance_row).transpose()
}

/// Stages content on the instance's ai-review layer. Used for local
/// modules, whose content lives on the instance rather than on the
/// association override layer.
pub fn write_instance_ai_review_props(
    conn: &Connection,
    instance_id: &str,
    props: &JsonMap,
) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE module_instances SET ai_review_props = ?2 WHERE id = ?1",
        params![instance_id, serde_json::to_string(props)?],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("module instance '{}'", instance_id)));
    }
    Ok(())
}

// ====================================================================
// =================== ASSOCIATION OPERATIONS =========================
// ====================================================================

pub fn create_post_module(
    conn: &Connection,
    post_id: &str,
    module_id: &str,
    order_index: i64,
    locked: bool,
    ai_review_added: bool,
) -> Result<PostModule, DbError> {
    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO post_modules \
         (id, post_id, module_id, order_index, locked, ai_review_added, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            post_id,
            module_id,
            order_index,
            locked,
            ai_review_added,
            datetime_to_sql(&created_at),
        ],
    )?;

    Ok(PostModule {
        id,
        post_id: post_id.to_string(),
        module_id: module_id.to_string(),
        order_index,
        locked,
        overrides: None,
        review_overrides: None,
        ai_review_overrides: None,
        review_added: false,
        review_deleted: false,
        ai_review_added,
        ai_review_deleted: false,
        created_at,
    })
}

pub fn read_post_module(
    conn: &Connection,
    post_module_id: &str,
) -> Result<Option<PostModule>, DbError> {
    let row = conn
        .query_row(
            &format!("SELECT {ASSOCIATION_COLUMNS} FROM post_modules WHERE id = ?1"),
            params![post_module_id],
            map_association_row,
        )
        .optional()?;
    row.map(decode_association_row).transpose()
}

/// Loads every association of a post joined to its instance, in render
/// order. The `(order_index, created_at, id)` sort is the stable tie-break
/// the resolution engine depends on for deterministic output.
pub fn read_post_modules_with_instances(
    conn: &Connection,
    post_id: &str,
) -> Result<Vec<(PostModule, ModuleInstance)>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT pm.id, pm.post_id, pm.module_id, pm.order_index, pm.locked, pm.overrides, \
                pm.review_overrides, pm.ai_review_overrides, pm.review_added, pm.review_deleted, \
                pm.ai_review_added, pm.ai_review_deleted, pm.created_at, \
                mi.id, mi.module_type, mi.scope, mi.props, mi.review_props, mi.ai_review_props, \
                mi.global_slug, mi.global_label, mi.created_at \
         FROM post_modules pm \
         JOIN module_instances mi ON mi.id = pm.module_id \
         WHERE pm.post_id = ?1 \
         ORDER BY pm.order_index ASC, pm.created_at ASC, pm.id ASC",
    )?;
    let rows = stmt.query_map(params![post_id], |row| {
        let association = map_association_row(row)?;
        let instance = InstanceRow {
            id: row.get(13)?,
            module_type: row.get(14)?,
            scope: row.get(15)?,
            props: row.get(16)?,
            review_props: row.get(17)?,
            ai_review_props: row.get(18)?,
            global_slug: row.get(19)?,
            global_label: row.get(20)?,
            created_at: row.get(21)?,
        };
        Ok((association, instance))
    })?;

    let mut pairs = Vec::new();
    for row in rows {
        let (association, instance) = row?;
        pairs.push((decode_association_row(association)?, decode_instance_row(instance)?));
    }
    Ok(pairs)
}

pub fn write_association_ai_review_overrides(
    conn: &Connection,
    post_module_id: &str,
    overrides: &JsonMap,
) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE post_modules SET ai_review_overrides = ?2 WHERE id = ?1",
        params![post_module_id, serde_json::to_string(overrides)?],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post module '{}'", post_module_id)));
    }
    Ok(())
}

pub fn write_association_order_index(
    conn: &Connection,
    post_module_id: &str,
    order_index: i64,
) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE post_modules SET order_index = ?2 WHERE id = ?1",
        params![post_module_id, order_index],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post module '{}'", post_module_id)));
    }
    Ok(())
}

/// Stages a removal. The row itself is only deleted when the review tier
/// is promoted to approved, outside this crate.
pub fn mark_ai_review_deleted(conn: &Connection, post_module_id: &str) -> Result<(), DbError> {
    let updated = conn.execute(
        "UPDATE post_modules SET ai_review_deleted = 1 WHERE id = ?1",
        params![post_module_id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("post module '{}'", post_module_id)));
    }
    Ok(())
}

pub fn next_order_index(conn: &Connection, post_id: &str) -> Result<i64, DbError> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(order_index) + 1, 0) FROM post_modules WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

// ====================================================================
// =================== PROMOTION BULK UPDATES =========================
// ====================================================================
// The layered merge is expressed directly as SQL COALESCE here: first
// non-null wins, in ai-review -> review -> approved order. Run inside the
// promotion transaction only.

pub fn promote_instance_layers(conn: &Connection, post_id: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE module_instances \
         SET review_props = COALESCE(ai_review_props, review_props, props), \
             ai_review_props = NULL \
         WHERE id IN (SELECT module_id FROM post_modules WHERE post_id = ?1)",
        params![post_id],
    )?;
    Ok(())
}

pub fn promote_association_layers(conn: &Connection, post_id: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE post_modules \
         SET review_overrides = COALESCE(ai_review_overrides, review_overrides, overrides), \
             ai_review_overrides = NULL \
         WHERE post_id = ?1",
        params![post_id],
    )?;
    conn.execute(
        "UPDATE post_modules SET review_added = 1 WHERE post_id = ?1 AND ai_review_added = 1",
        params![post_id],
    )?;
    conn.execute(
        "UPDATE post_modules SET ai_review_added = 0 WHERE post_id = ?1",
        params![post_id],
    )?;
    conn.execute(
        "UPDATE post_modules SET review_deleted = 1 WHERE post_id = ?1 AND ai_review_deleted = 1",
        params![post_id],
    )?;
    conn.execute(
        "UPDATE post_modules SET ai_review_deleted = 0 WHERE post_id = ?1",
        params![post_id],
    )?;
    Ok(())
}
