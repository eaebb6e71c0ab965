//! The staging/promotion engine. Every entry point here is agent-facing:
//! writes land on the ai-review tier only, locked associations are
//! read-only, and each operation runs as one transaction together with its
//! revision append.

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::catalog::{ModuleCatalog, SchemaError};
use crate::engine::resolve::coalesce;
use crate::engine::EngineError;
use crate::helper::{richtext_helpers, sanitization_helpers};
use crate::models::db_operations::{
    modules_db_operations, posts_db_operations, revisions_db_operations,
};
use crate::models::{
    shallow_merge, JsonMap, ModuleScope, PostFieldPatch, PostModule, ResolveMode,
};

/// Keys that identify a module rather than describe its content. They must
/// never be rewritten through the content-editing path.
const RESTRICTED_OVERRIDE_KEYS: [&str; 3] = ["scope", "type", "globalSlug"];

/// Caller-facing scope selector for module creation. The label is optional
/// on input; a new global instance without one is labeled by its slug.
#[derive(Debug, Clone)]
pub enum ModuleScopeSpec {
    Local,
    Global {
        slug: String,
        label: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct StageModuleAdd {
    pub post_id: String,
    pub module_type: String,
    pub scope: ModuleScopeSpec,
    pub props: JsonMap,
    pub order_index: Option<i64>,
    pub locked: bool,
    /// Markdown convenience input, converted into the schema's first
    /// richtext field (or placed raw into the first textarea field).
    pub text: Option<String>,
    pub actor: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StageModuleUpdate {
    pub overrides: Option<JsonMap>,
    pub order_index: Option<i64>,
    pub text: Option<String>,
    pub actor: Option<i64>,
}

fn apply_text_convenience(
    catalog: &ModuleCatalog,
    module_type: &str,
    props: &mut JsonMap,
    text: &str,
) -> Result<(), EngineError> {
    if let Some(field) = catalog.first_richtext_field(module_type) {
        let document = richtext_helpers::text_to_rich_document(text);
        props.insert(field.to_string(), serde_json::to_value(document)?);
        return Ok(());
    }
    if let Some(field) = catalog.first_textarea_field(module_type) {
        props.insert(field.to_string(), Value::String(text.to_string()));
        return Ok(());
    }
    // No destination field: reject instead of silently dropping content.
    Err(EngineError::Schema(SchemaError::UnknownProp {
        module_type: module_type.to_string(),
        key: "text".to_string(),
    }))
}

fn sanitize_patch(patch: &PostFieldPatch) -> PostFieldPatch {
    let mut clean = patch.clone();
    clean.title = clean
        .title
        .map(|v| sanitization_helpers::strip_all_html(&v));
    clean.excerpt = clean
        .excerpt
        .map(|v| sanitization_helpers::strip_all_html(&v));
    clean.meta_title = clean
        .meta_title
        .map(|v| sanitization_helpers::strip_all_html(&v));
    clean.meta_description = clean
        .meta_description
        .map(|v| sanitization_helpers::strip_all_html(&v));
    clean
}

/// Stages a post field patch on the ai-review tier. The base is the review
/// draft when one exists, otherwise a projection of the approved columns:
/// higher tiers are always drafted from the tier immediately below them.
pub fn stage_field_patch(
    conn: &mut Connection,
    post_id: &str,
    patch: &PostFieldPatch,
    actor: Option<i64>,
) -> Result<(), EngineError> {
    let tx = conn.transaction()?;

    let post = posts_db_operations::read_post(&tx, post_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post '{}'", post_id)))?;

    let clean = sanitize_patch(patch);
    let base = post
        .review_draft
        .clone()
        .unwrap_or_else(|| PostFieldPatch::projection(&post.fields));
    let mut merged = PostFieldPatch::overlay(&base, &clean);
    merged.saved_at = Some(Utc::now());
    merged.saved_by = actor;

    posts_db_operations::write_ai_review_draft(&tx, post_id, &merged)?;
    revisions_db_operations::record_revision(
        &tx,
        post_id,
        ResolveMode::AiReview,
        &serde_json::to_value(&merged)?,
        actor,
    )?;

    tx.commit()?;
    log::debug!("staged field patch on post {} (ai-review)", post_id);
    Ok(())
}

/// Stages a new module on the ai-review tier. For global scope the instance
/// found by slug is attached (its stored type must match the request); an
/// unknown slug creates a new global instance rather than failing, so
/// agents can introduce shared modules.
pub fn stage_module_add(
    conn: &mut Connection,
    catalog: &ModuleCatalog,
    request: StageModuleAdd,
) -> Result<PostModule, EngineError> {
    let tx = conn.transaction()?;

    posts_db_operations::read_post(&tx, &request.post_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post '{}'", request.post_id)))?;

    let mut props = request.props.clone();
    if let Some(text) = &request.text {
        apply_text_convenience(catalog, &request.module_type, &mut props, text)?;
    }
    // Validation runs before any write, so a schema failure never leaves
    // persisted state mutated.
    catalog.validate(&request.module_type, &props)?;

    let instance = match &request.scope {
        ModuleScopeSpec::Local => modules_db_operations::create_instance(
            &tx,
            &request.module_type,
            &ModuleScope::Local,
            &props,
        )?,
        ModuleScopeSpec::Global { slug, label } => {
            match modules_db_operations::read_global_instance_by_slug(&tx, slug)? {
                Some(existing) => {
                    // Attaching never retypes the shared instance.
                    if existing.module_type != request.module_type {
                        return Err(EngineError::ModuleTypeMismatch {
                            slug: slug.clone(),
                            requested: request.module_type.clone(),
                            actual: existing.module_type,
                        });
                    }
                    existing
                }
                None => {
                    log::info!("creating global module instance '{}' on first attach", slug);
                    modules_db_operations::create_instance(
                        &tx,
                        &request.module_type,
                        &ModuleScope::Global {
                            slug: slug.clone(),
                            label: label.clone().unwrap_or_else(|| slug.clone()),
                        },
                        &props,
                    )?
                }
            }
        }
    };

    let order_index = match request.order_index {
        Some(index) => index,
        None => modules_db_operations::next_order_index(&tx, &request.post_id)?,
    };
    let association = modules_db_operations::create_post_module(
        &tx,
        &request.post_id,
        &instance.id,
        order_index,
        request.locked,
        true, // ai_review_added: exists only in the staging tier until promoted
    )?;

    revisions_db_operations::record_revision(
        &tx,
        &request.post_id,
        ResolveMode::AiReview,
        &json!({
            "op": "module_add",
            "postModuleId": association.id,
            "moduleId": instance.id,
            "type": instance.module_type,
            // On a pure attach the shared instance keeps its stored props;
            // the snapshot records what actually renders, not the request.
            "props": instance.props,
        }),
        request.actor,
    )?;

    tx.commit()?;
    Ok(association)
}

/// Stages a content or positional update on the ai-review tier. Local
/// module content merges onto the instance's ai-review props; global module
/// content merges onto the association's ai-review override layer, so the
/// shared instance is never written from a per-post edit.
pub fn stage_module_update(
    conn: &mut Connection,
    catalog: &ModuleCatalog,
    post_module_id: &str,
    request: StageModuleUpdate,
) -> Result<PostModule, EngineError> {
    let tx = conn.transaction()?;

    let association = modules_db_operations::read_post_module(&tx, post_module_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post module '{}'", post_module_id)))?;
    if association.locked {
        return Err(EngineError::LockedModule(post_module_id.to_string()));
    }

    let mut patch = request.overrides.clone().unwrap_or_default();
    let restricted: Vec<String> = RESTRICTED_OVERRIDE_KEYS
        .iter()
        .filter(|key| patch.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !restricted.is_empty() {
        return Err(EngineError::RestrictedField(restricted));
    }

    let instance = modules_db_operations::read_instance(&tx, &association.module_id)?
        .ok_or_else(|| {
            EngineError::NotFound(format!("module instance '{}'", association.module_id))
        })?;

    if let Some(text) = &request.text {
        apply_text_convenience(catalog, &instance.module_type, &mut patch, text)?;
    }

    if !patch.is_empty() {
        match &instance.scope {
            ModuleScope::Local => {
                let base = coalesce(
                    instance.ai_review_props.as_ref(),
                    instance.review_props.as_ref(),
                    Some(&instance.props),
                );
                let merged = shallow_merge(base, &patch);
                catalog.validate(&instance.module_type, &merged)?;
                modules_db_operations::write_instance_ai_review_props(&tx, &instance.id, &merged)?;
            }
            ModuleScope::Global { .. } => {
                let base = coalesce(
                    association.ai_review_overrides.as_ref(),
                    association.review_overrides.as_ref(),
                    association.overrides.as_ref(),
                );
                let merged = shallow_merge(base, &patch);
                catalog.validate_partial(&instance.module_type, &merged)?;
                modules_db_operations::write_association_ai_review_overrides(
                    &tx,
                    &association.id,
                    &merged,
                )?;
            }
        }
    }

    if let Some(order_index) = request.order_index {
        modules_db_operations::write_association_order_index(&tx, &association.id, order_index)?;
    }

    revisions_db_operations::record_revision(
        &tx,
        &association.post_id,
        ResolveMode::AiReview,
        &json!({
            "op": "module_update",
            "postModuleId": association.id,
            "overrides": patch,
            "orderIndex": request.order_index,
        }),
        request.actor,
    )?;

    let updated = modules_db_operations::read_post_module(&tx, post_module_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post module '{}'", post_module_id)))?;
    tx.commit()?;
    Ok(updated)
}

/// Stages a removal on the ai-review tier. Nothing is deleted; the row goes
/// away only when the review tier is promoted to approved, outside this
/// crate.
pub fn stage_module_remove(
    conn: &mut Connection,
    post_module_id: &str,
    actor: Option<i64>,
) -> Result<(), EngineError> {
    let tx = conn.transaction()?;

    let association = modules_db_operations::read_post_module(&tx, post_module_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post module '{}'", post_module_id)))?;
    if association.locked {
        return Err(EngineError::LockedModule(post_module_id.to_string()));
    }

    modules_db_operations::mark_ai_review_deleted(&tx, post_module_id)?;
    revisions_db_operations::record_revision(
        &tx,
        &association.post_id,
        ResolveMode::AiReview,
        &json!({
            "op": "module_remove",
            "postModuleId": association.id,
            "moduleId": association.module_id,
        }),
        actor,
    )?;

    tx.commit()?;
    Ok(())
}

/// Collapses the ai-review tier onto the review tier for one post,
/// atomically. Module layers move via SQL COALESCE; the field draft merges
/// shallowly over the review draft. Rejects when no ai-review field draft
/// is staged, even if module-level ai-review changes exist (preserved
/// source behavior).
pub fn promote_ai_review_to_review(
    conn: &mut Connection,
    post_id: &str,
    actor: Option<i64>,
) -> Result<(), EngineError> {
    let tx = conn.transaction()?;

    let post = posts_db_operations::read_post(&tx, post_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post '{}'", post_id)))?;
    let ai_review_draft = post
        .ai_review_draft
        .clone()
        .ok_or_else(|| EngineError::NothingToPromote(post_id.to_string()))?;

    modules_db_operations::promote_instance_layers(&tx, post_id)?;
    modules_db_operations::promote_association_layers(&tx, post_id)?;

    let base = post.review_draft.clone().unwrap_or_default();
    let mut merged = PostFieldPatch::overlay(&base, &ai_review_draft);
    merged.saved_at = Some(Utc::now());
    posts_db_operations::collapse_ai_review_draft(&tx, post_id, &merged)?;

    revisions_db_operations::record_revision(
        &tx,
        post_id,
        ResolveMode::Review,
        &serde_json::to_value(&merged)?,
        actor,
    )?;

    tx.commit()?;
    log::info!("promoted ai-review tier to review for post {}", post_id);
    Ok(())
}

/// Creates an approved instance/association pair, used when a post is built
/// from a template. Not an agent-facing staging path: rows land directly in
/// the approved tier with no staging flags.
#[allow(clippy::too_many_arguments)]
pub fn seed_module(
    conn: &mut Connection,
    catalog: &ModuleCatalog,
    post_id: &str,
    module_type: &str,
    scope: ModuleScopeSpec,
    props: JsonMap,
    order_index: Option<i64>,
    locked: bool,
) -> Result<PostModule, EngineError> {
    let tx = conn.transaction()?;

    posts_db_operations::read_post(&tx, post_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post '{}'", post_id)))?;
    catalog.validate(module_type, &props)?;

    let instance = match &scope {
        ModuleScopeSpec::Local => {
            modules_db_operations::create_instance(&tx, module_type, &ModuleScope::Local, &props)?
        }
        ModuleScopeSpec::Global { slug, label } => {
            match modules_db_operations::read_global_instance_by_slug(&tx, slug)? {
                Some(existing) => {
                    if existing.module_type != module_type {
                        return Err(EngineError::ModuleTypeMismatch {
                            slug: slug.clone(),
                            requested: module_type.to_string(),
                            actual: existing.module_type,
                        });
                    }
                    existing
                }
                None => modules_db_operations::create_instance(
                    &tx,
                    module_type,
                    &ModuleScope::Global {
                        slug: slug.clone(),
                        label: label.clone().unwrap_or_else(|| slug.clone()),
                    },
                    &props,
                )?,
            }
        }
    };

    let order_index = match order_index {
        Some(index) => index,
        None => modules_db_operations::next_order_index(&tx, post_id)?,
    };
    let association = modules_db_operations::create_post_module(
        &tx,
        post_id,
        &instance.id,
        order_index,
        locked,
        false,
    )?;

    tx.commit()?;
    Ok(association)
}
