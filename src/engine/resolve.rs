//! The resolution/serialization engine: computes the effective view of a
//! post and its modules for one tier. Pure reads only; calling this twice
//! with no intervening write yields identical output.

use rusqlite::Connection;

use crate::engine::EngineError;
use crate::models::db_operations::{modules_db_operations, posts_db_operations};
use crate::models::{
    shallow_merge, JsonMap, ModuleInstance, PostModule, ResolveMode, ResolvedModule, ResolvedPost,
};

/// Application-level COALESCE: first non-null wins, in ai-review -> review ->
/// approved order. The promotion pass expresses the same contract as SQL
/// `COALESCE`; the two must never disagree.
pub(crate) fn coalesce<'a, T>(
    ai_review: Option<&'a T>,
    review: Option<&'a T>,
    approved: Option<&'a T>,
) -> Option<&'a T> {
    ai_review.or(review).or(approved)
}

/// Tier visibility for an association row. Deletions hide the row from the
/// staged tier and everything drafted above it; staged-added rows exist only
/// in their staging tier and are invisible beneath it.
fn visible_in_mode(association: &PostModule, mode: ResolveMode) -> bool {
    match mode {
        ResolveMode::Source => !association.review_added && !association.ai_review_added,
        ResolveMode::Review => !association.ai_review_added && !association.review_deleted,
        ResolveMode::AiReview => {
            !association.review_deleted && !association.ai_review_deleted
        }
    }
}

/// Effective rendered props for one module, truncated to the requested tier.
/// Local modules render from instance props alone; global modules shallow-
/// merge the per-association override layer on top of the shared base, so a
/// post-specific override never mutates the shared record.
pub(crate) fn effective_props(
    association: &PostModule,
    instance: &ModuleInstance,
    mode: ResolveMode,
) -> JsonMap {
    let base = match mode {
        ResolveMode::Source => &instance.props,
        ResolveMode::Review => instance.review_props.as_ref().unwrap_or(&instance.props),
        ResolveMode::AiReview => instance
            .ai_review_props
            .as_ref()
            .or(instance.review_props.as_ref())
            .unwrap_or(&instance.props),
    };

    if !instance.scope.is_global() {
        return base.clone();
    }

    let overrides = match mode {
        ResolveMode::Source => association.overrides.as_ref(),
        ResolveMode::Review => coalesce(
            None,
            association.review_overrides.as_ref(),
            association.overrides.as_ref(),
        ),
        ResolveMode::AiReview => coalesce(
            association.ai_review_overrides.as_ref(),
            association.review_overrides.as_ref(),
            association.overrides.as_ref(),
        ),
    };

    match overrides {
        Some(overrides) => shallow_merge(Some(base), overrides),
        None => base.clone(),
    }
}

pub fn resolve_post(
    conn: &Connection,
    post_id: &str,
    mode: ResolveMode,
) -> Result<ResolvedPost, EngineError> {
    let post = posts_db_operations::read_post(conn, post_id)?
        .ok_or_else(|| EngineError::NotFound(format!("post '{}'", post_id)))?;

    // Tiers above the requested mode are truncated away before merging.
    let review = match mode {
        ResolveMode::Source => None,
        _ => post.review_draft.as_ref(),
    };
    let ai_review = match mode {
        ResolveMode::AiReview => post.ai_review_draft.as_ref(),
        _ => None,
    };

    let mut fields = post.fields.clone();
    if let Some(patch) = review {
        fields = fields.with_patch(patch);
    }
    if let Some(patch) = ai_review {
        fields = fields.with_patch(patch);
    }

    let custom_fields = coalesce(
        ai_review.and_then(|p| p.custom_fields.as_ref()),
        review.and_then(|p| p.custom_fields.as_ref()),
        None,
    )
    .cloned()
    .unwrap_or_default();

    let taxonomy_term_ids = coalesce(
        ai_review.and_then(|p| p.taxonomy_term_ids.as_ref()),
        review.and_then(|p| p.taxonomy_term_ids.as_ref()),
        None,
    )
    .cloned()
    .unwrap_or_default();

    let pairs = modules_db_operations::read_post_modules_with_instances(conn, &post.id)?;
    let mut modules = Vec::with_capacity(pairs.len());
    for (association, instance) in pairs {
        if !visible_in_mode(&association, mode) {
            continue;
        }
        let props = effective_props(&association, &instance, mode);
        modules.push(ResolvedModule {
            id: association.id,
            module_id: instance.id,
            module_type: instance.module_type,
            scope: instance.scope,
            order_index: association.order_index,
            locked: association.locked,
            props,
        });
    }

    Ok(ResolvedPost {
        id: post.id,
        post: fields,
        modules,
        custom_fields,
        taxonomy_term_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::models::ModuleScope;

    fn map(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn instance(scope: ModuleScope) -> ModuleInstance {
        ModuleInstance {
            id: "mi-1".to_string(),
            module_type: "hero".to_string(),
            scope,
            props: map(json!({"title": "Approved"})),
            review_props: Some(map(json!({"title": "Review"}))),
            ai_review_props: Some(map(json!({"title": "Ai"}))),
            created_at: Utc::now(),
        }
    }

    fn association() -> PostModule {
        PostModule {
            id: "pm-1".to_string(),
            post_id: "p-1".to_string(),
            module_id: "mi-1".to_string(),
            order_index: 0,
            locked: false,
            overrides: None,
            review_overrides: None,
            ai_review_overrides: None,
            review_added: false,
            review_deleted: false,
            ai_review_added: false,
            ai_review_deleted: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn coalesce_prefers_highest_tier() {
        let (a, b, c) = (1, 2, 3);
        assert_eq!(coalesce(Some(&a), Some(&b), Some(&c)), Some(&1));
        assert_eq!(coalesce(None, Some(&b), Some(&c)), Some(&2));
        assert_eq!(coalesce::<i32>(None, None, Some(&c)), Some(&3));
    }

    #[test]
    fn props_truncate_to_requested_tier() {
        let inst = instance(ModuleScope::Local);
        let assoc = association();
        assert_eq!(effective_props(&assoc, &inst, ResolveMode::Source)["title"], json!("Approved"));
        assert_eq!(effective_props(&assoc, &inst, ResolveMode::Review)["title"], json!("Review"));
        assert_eq!(effective_props(&assoc, &inst, ResolveMode::AiReview)["title"], json!("Ai"));
    }

    #[test]
    fn global_overrides_merge_on_top_of_shared_base() {
        let inst = ModuleInstance {
            review_props: None,
            ai_review_props: None,
            ..instance(ModuleScope::Global {
                slug: "footer".to_string(),
                label: "Footer".to_string(),
            })
        };
        let mut assoc = association();
        assoc.ai_review_overrides = Some(map(json!({"title": "Per-post"})));

        let ai = effective_props(&assoc, &inst, ResolveMode::AiReview);
        assert_eq!(ai["title"], json!("Per-post"));
        // Lower tiers see the shared base untouched.
        let source = effective_props(&assoc, &inst, ResolveMode::Source);
        assert_eq!(source["title"], json!("Approved"));
    }

    #[test]
    fn staged_added_rows_are_invisible_beneath_their_tier() {
        let mut assoc = association();
        assoc.ai_review_added = true;
        assert!(!visible_in_mode(&assoc, ResolveMode::Source));
        assert!(!visible_in_mode(&assoc, ResolveMode::Review));
        assert!(visible_in_mode(&assoc, ResolveMode::AiReview));
    }

    #[test]
    fn staged_deletions_hide_their_tier_and_above() {
        let mut assoc = association();
        assoc.ai_review_deleted = true;
        assert!(visible_in_mode(&assoc, ResolveMode::Source));
        assert!(visible_in_mode(&assoc, ResolveMode::Review));
        assert!(!visible_in_mode(&assoc, ResolveMode::AiReview));

        let mut assoc = association();
        assoc.review_deleted = true;
        assert!(visible_in_mode(&assoc, ResolveMode::Source));
        assert!(!visible_in_mode(&assoc, ResolveMode::Review));
        assert!(!visible_in_mode(&assoc, ResolveMode::AiReview));
    }
}
