use std::sync::Arc;

use thiserror::Error;

use crate::catalog::{ModuleCatalog, SchemaError};
use crate::models::db_operations::{revisions_db_operations, DbError};
use crate::models::{
    JsonMap, PostFieldPatch, PostModule, ResolveMode, ResolvedPost, Revision,
};
use crate::DbPool;

pub mod resolve;
pub mod staging;

pub use staging::{ModuleScopeSpec, StageModuleAdd, StageModuleUpdate};

/// Failure taxonomy of the staging and resolution engine. Every variant is
/// returned as a typed value so HTTP/MCP adapters can map them to caller
/// messages without inspecting text.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Post module '{0}' is locked and read-only to staging callers")]
    LockedModule(String),
    #[error("Restricted keys in override payload: {0:?}")]
    RestrictedField(Vec<String>),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("Global module '{slug}' is of type '{actual}', not '{requested}'")]
    ModuleTypeMismatch {
        slug: String,
        requested: String,
        actual: String,
    },
    #[error("Nothing to promote for post '{0}': no ai-review draft is staged")]
    NothingToPromote(String),
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => EngineError::NotFound(what),
            other => EngineError::Transaction(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Transaction(err.to_string())
    }
}

impl From<r2d2::Error> for EngineError {
    fn from(err: r2d2::Error) -> Self {
        EngineError::Transaction(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Transaction(err.to_string())
    }
}

/// The staging/resolution engine. Holds the connection pool and the
/// immutable module catalog; constructed once at boot and shared.
pub struct ContentEngine {
    pool: DbPool,
    catalog: Arc<ModuleCatalog>,
}

impl ContentEngine {
    pub fn new(pool: DbPool, catalog: Arc<ModuleCatalog>) -> Self {
        ContentEngine { pool, catalog }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    // --- Resolution (pure reads) ---

    pub fn resolve(&self, post_id: &str, mode: ResolveMode) -> Result<ResolvedPost, EngineError> {
        let conn = self.pool.get()?;
        resolve::resolve_post(&conn, post_id, mode)
    }

    // --- Staging mutations (each one transaction) ---

    pub fn stage_field_patch(
        &self,
        post_id: &str,
        patch: &PostFieldPatch,
        actor: Option<i64>,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;
        staging::stage_field_patch(&mut conn, post_id, patch, actor)
    }

    pub fn stage_module_add(&self, request: StageModuleAdd) -> Result<PostModule, EngineError> {
        let mut conn = self.pool.get()?;
        staging::stage_module_add(&mut conn, &self.catalog, request)
    }

    pub fn stage_module_update(
        &self,
        post_module_id: &str,
        request: StageModuleUpdate,
    ) -> Result<PostModule, EngineError> {
        let mut conn = self.pool.get()?;
        staging::stage_module_update(&mut conn, &self.catalog, post_module_id, request)
    }

    pub fn stage_module_remove(
        &self,
        post_module_id: &str,
        actor: Option<i64>,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;
        staging::stage_module_remove(&mut conn, post_module_id, actor)
    }

    pub fn promote_ai_review_to_review(
        &self,
        post_id: &str,
        actor: Option<i64>,
    ) -> Result<(), EngineError> {
        let mut conn = self.pool.get()?;
        staging::promote_ai_review_to_review(&mut conn, post_id, actor)
    }

    // --- Seeding (approved baseline, e.g. post-from-template) ---

    pub fn create_post(
        &self,
        fields: &crate::models::PostFields,
    ) -> Result<crate::models::Post, EngineError> {
        let conn = self.pool.get()?;
        Ok(crate::models::db_operations::posts_db_operations::create_post(&conn, fields)?)
    }

    pub fn seed_module(
        &self,
        post_id: &str,
        module_type: &str,
        scope: ModuleScopeSpec,
        props: JsonMap,
        order_index: Option<i64>,
        locked: bool,
    ) -> Result<PostModule, EngineError> {
        let mut conn = self.pool.get()?;
        staging::seed_module(
            &mut conn,
            &self.catalog,
            post_id,
            module_type,
            scope,
            props,
            order_index,
            locked,
        )
    }

    // --- Revision history (read-only) ---

    pub fn list_revisions(&self, post_id: &str) -> Result<Vec<Revision>, EngineError> {
        let conn = self.pool.get()?;
        Ok(revisions_db_operations::list_revisions(&conn, post_id)?)
    }

    pub fn get_revision(&self, post_id: &str, revision_id: i64) -> Result<Revision, EngineError> {
        let conn = self.pool.get()?;
        revisions_db_operations::get_revision(&conn, post_id, revision_id)?.ok_or_else(|| {
            EngineError::NotFound(format!("revision {} for post '{}'", revision_id, post_id))
        })
    }
}
