use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type JsonMap = serde_json::Map<String, Value>;

/// The three content tiers, ordered from most durable to most speculative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveMode {
    #[serde(rename = "source")]
    Source,
    #[serde(rename = "review")]
    Review,
    #[serde(rename = "ai-review")]
    AiReview,
}

impl ResolveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveMode::Source => "source",
            ResolveMode::Review => "review",
            ResolveMode::AiReview => "ai-review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(ResolveMode::Source),
            "review" => Some(ResolveMode::Review),
            "ai-review" => Some(ResolveMode::AiReview),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResolveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approved post fields. These columns are only ever written by the
/// publish/approve path; the staging engine reads them as the baseline
/// of the tier fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFields {
    #[serde(rename = "type")]
    pub post_type: String,
    pub locale: String,
    pub slug: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub status: String,
    pub parent_id: Option<String>,
    pub order_index: i64,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical_url: Option<String>,
    pub robots_json: Option<Value>,
    pub jsonld_overrides: Option<Value>,
    pub featured_media_id: Option<String>,
    pub translation_of_id: Option<String>,
}

/// A partial projection of [`PostFields`] plus the draft-only extras.
/// `None` means "not staged" (COALESCE semantics), so a patch can never
/// clear an approved field back to null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostFieldPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub post_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robots_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonld_overrides: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_media_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_of_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taxonomy_term_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_by: Option<i64>,
}

impl PostFieldPatch {
    /// Projects the approved columns into a full patch. Used as the base
    /// when a tier is drafted for the first time.
    pub fn projection(fields: &PostFields) -> Self {
        PostFieldPatch {
            post_type: Some(fields.post_type.clone()),
            locale: Some(fields.locale.clone()),
            slug: Some(fields.slug.clone()),
            title: Some(fields.title.clone()),
            excerpt: fields.excerpt.clone(),
            status: Some(fields.status.clone()),
            parent_id: fields.parent_id.clone(),
            order_index: Some(fields.order_index),
            meta_title: fields.meta_title.clone(),
            meta_description: fields.meta_description.clone(),
            canonical_url: fields.canonical_url.clone(),
            robots_json: fields.robots_json.clone(),
            jsonld_overrides: fields.jsonld_overrides.clone(),
            featured_media_id: fields.featured_media_id.clone(),
            translation_of_id: fields.translation_of_id.clone(),
            taxonomy_term_ids: None,
            custom_fields: None,
            saved_at: None,
            saved_by: None,
        }
    }

    /// Shallow merge: every staged field of `patch` wins over `base`.
    pub fn overlay(base: &PostFieldPatch, patch: &PostFieldPatch) -> Self {
        PostFieldPatch {
            post_type: patch.post_type.clone().or_else(|| base.post_type.clone()),
            locale: patch.locale.clone().or_else(|| base.locale.clone()),
            slug: patch.slug.clone().or_else(|| base.slug.clone()),
            title: patch.title.clone().or_else(|| base.title.clone()),
            excerpt: patch.excerpt.clone().or_else(|| base.excerpt.clone()),
            status: patch.status.clone().or_else(|| base.status.clone()),
            parent_id: patch.parent_id.clone().or_else(|| base.parent_id.clone()),
            order_index: patch.order_index.or(base.order_index),
            meta_title: patch.meta_title.clone().or_else(|| base.meta_title.clone()),
            meta_description: patch
                .meta_description
                .clone()
                .or_else(|| base.meta_description.clone()),
            canonical_url: patch
                .canonical_url
                .clone()
                .or_else(|| base.canonical_url.clone()),
            robots_json: patch.robots_json.clone().or_else(|| base.robots_json.clone()),
            jsonld_overrides: patch
                .jsonld_overrides
                .clone()
                .or_else(|| base.jsonld_overrides.clone()),
            featured_media_id: patch
                .featured_media_id
                .clone()
                .or_else(|| base.featured_media_id.clone()),
            translation_of_id: patch
                .translation_of_id
                .clone()
                .or_else(|| base.translation_of_id.clone()),
            taxonomy_term_ids: patch
                .taxonomy_term_ids
                .clone()
                .or_else(|| base.taxonomy_term_ids.clone()),
            custom_fields: patch.custom_fields.clone().or_else(|| base.custom_fields.clone()),
            saved_at: patch.saved_at.or(base.saved_at),
            saved_by: patch.saved_by.or(base.saved_by),
        }
    }
}

impl PostFields {
    /// Applies a patch on top of the approved fields. Staged (`Some`)
    /// values win; everything else keeps the approved value.
    pub fn with_patch(&self, patch: &PostFieldPatch) -> PostFields {
        let mut fields = self.clone();
        if let Some(v) = &patch.post_type {
            fields.post_type = v.clone();
        }
        if let Some(v) = &patch.locale {
            fields.locale = v.clone();
        }
        if let Some(v) = &patch.slug {
            fields.slug = v.clone();
        }
        if let Some(v) = &patch.title {
            fields.title = v.clone();
        }
        if patch.excerpt.is_some() {
            fields.excerpt = patch.excerpt.clone();
        }
        if let Some(v) = &patch.status {
            fields.status = v.clone();
        }
        if patch.parent_id.is_some() {
            fields.parent_id = patch.parent_id.clone();
        }
        if let Some(v) = patch.order_index {
            fields.order_index = v;
        }
        if patch.meta_title.is_some() {
            fields.meta_title = patch.meta_title.clone();
        }
        if patch.meta_description.is_some() {
            fields.meta_description = patch.meta_description.clone();
        }
        if patch.canonical_url.is_some() {
            fields.canonical_url = patch.canonical_url.clone();
        }
        if patch.robots_json.is_some() {
            fields.robots_json = patch.robots_json.clone();
        }
        if patch.jsonld_overrides.is_some() {
            fields.jsonld_overrides = patch.jsonld_overrides.clone();
        }
        if patch.featured_media_id.is_some() {
            fields.featured_media_id = patch.featured_media_id.clone();
        }
        if patch.translation_of_id.is_some() {
            fields.translation_of_id = patch.translation_of_id.clone();
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(flatten)]
    pub fields: PostFields,
    pub review_draft: Option<PostFieldPatch>,
    pub ai_review_draft: Option<PostFieldPatch>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Local instances belong to exactly one post; global instances are shared
/// by reference and carry a unique, human-referenceable slug. Only global
/// instances accept per-association overrides; local content is staged on
/// the instance itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum ModuleScope {
    Local,
    Global {
        #[serde(rename = "globalSlug")]
        slug: String,
        #[serde(rename = "globalLabel")]
        label: String,
    },
}

impl ModuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleScope::Local => "local",
            ModuleScope::Global { .. } => "global",
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, ModuleScope::Global { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(flatten)]
    pub scope: ModuleScope,
    pub props: JsonMap,
    pub review_props: Option<JsonMap>,
    pub ai_review_props: Option<JsonMap>,
    pub created_at: DateTime<Utc>,
}

/// The association row binding a post to a module instance. Carries the
/// positional state, the lock flag, the override layers (meaningful for
/// global instances) and the add/delete staging flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostModule {
    pub id: String,
    pub post_id: String,
    pub module_id: String,
    pub order_index: i64,
    pub locked: bool,
    pub overrides: Option<JsonMap>,
    pub review_overrides: Option<JsonMap>,
    pub ai_review_overrides: Option<JsonMap>,
    pub review_added: bool,
    pub review_deleted: bool,
    pub ai_review_added: bool,
    pub ai_review_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit record written alongside every tier write.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    pub id: i64,
    pub post_id: String,
    pub mode: ResolveMode,
    pub snapshot: Value,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModule {
    /// Association id, not the instance id.
    pub id: String,
    pub module_id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(flatten)]
    pub scope: ModuleScope,
    pub order_index: i64,
    pub locked: bool,
    pub props: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPost {
    pub id: String,
    pub post: PostFields,
    pub modules: Vec<ResolvedModule>,
    pub custom_fields: JsonMap,
    pub taxonomy_term_ids: Vec<String>,
}

/// Shallow JSON merge: keys of `patch` win over `base`. Used for module
/// override layering; never recurses, so nested objects are replaced whole.
pub fn shallow_merge(base: Option<&JsonMap>, patch: &JsonMap) -> JsonMap {
    let mut merged = base.cloned().unwrap_or_default();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

pub mod db_operations;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> PostFields {
        PostFields {
            post_type: "page".to_string(),
            locale: "en".to_string(),
            slug: "home".to_string(),
            title: "Home".to_string(),
            excerpt: None,
            status: "published".to_string(),
            parent_id: None,
            order_index: 0,
            meta_title: Some("Home | Site".to_string()),
            meta_description: None,
            canonical_url: None,
            robots_json: None,
            jsonld_overrides: None,
            featured_media_id: None,
            translation_of_id: None,
        }
    }

    #[test]
    fn patch_overlay_prefers_staged_values() {
        let base = PostFieldPatch {
            title: Some("Base".to_string()),
            excerpt: Some("base excerpt".to_string()),
            ..Default::default()
        };
        let patch = PostFieldPatch {
            title: Some("Patched".to_string()),
            ..Default::default()
        };
        let merged = PostFieldPatch::overlay(&base, &patch);
        assert_eq!(merged.title.as_deref(), Some("Patched"));
        assert_eq!(merged.excerpt.as_deref(), Some("base excerpt"));
    }

    #[test]
    fn with_patch_keeps_unstaged_fields() {
        let patch = PostFieldPatch {
            title: Some("Draft title".to_string()),
            ..Default::default()
        };
        let effective = fields().with_patch(&patch);
        assert_eq!(effective.title, "Draft title");
        assert_eq!(effective.slug, "home");
        assert_eq!(effective.meta_title.as_deref(), Some("Home | Site"));
    }

    #[test]
    fn projection_carries_approved_values_only() {
        let projected = PostFieldPatch::projection(&fields());
        assert_eq!(projected.title.as_deref(), Some("Home"));
        assert!(projected.saved_at.is_none());
        assert!(projected.custom_fields.is_none());
    }

    #[test]
    fn shallow_merge_replaces_whole_keys() {
        let base: JsonMap = json!({"title": "A", "cta": {"label": "Go"}})
            .as_object()
            .cloned()
            .unwrap();
        let patch: JsonMap = json!({"cta": {"url": "/x"}}).as_object().cloned().unwrap();
        let merged = shallow_merge(Some(&base), &patch);
        assert_eq!(merged["title"], json!("A"));
        // Not a deep merge: the nested object is replaced outright.
        assert_eq!(merged["cta"], json!({"url": "/x"}));
    }

    #[test]
    fn post_serializes_in_one_naming_convention() {
        let post = Post {
            id: "p1".to_string(),
            fields: fields(),
            review_draft: None,
            ai_review_draft: Some(PostFieldPatch {
                title: Some("Draft".to_string()),
                ..Default::default()
            }),
            created_at: Utc::now(),
            deleted_at: None,
        };
        let value = serde_json::to_value(&post).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for key in ["reviewDraft", "aiReviewDraft", "createdAt", "deletedAt", "metaTitle"] {
            assert!(keys.contains(&key), "missing key {key} in {keys:?}");
        }
        assert!(keys.iter().all(|k| !k.contains('_')), "snake_case key in {keys:?}");
    }

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in [ResolveMode::Source, ResolveMode::Review, ResolveMode::AiReview] {
            assert_eq!(ResolveMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ResolveMode::parse("draft"), None);
    }
}
