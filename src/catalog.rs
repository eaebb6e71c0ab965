use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::JsonMap;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown module type '{0}'")]
    UnknownType(String),
    #[error("Missing required prop '{key}' for module type '{module_type}'")]
    MissingRequired { module_type: String, key: String },
    #[error("Prop '{key}' is not declared on module type '{module_type}'")]
    UnknownProp { module_type: String, key: String },
    #[error("Prop '{key}' on module type '{module_type}' has wrong shape: expected {expected}")]
    WrongShape {
        module_type: String,
        key: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Richtext,
    Number,
    Boolean,
    Media,
    List,
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text | FieldKind::Textarea => "a string",
            FieldKind::Richtext => "a richtext document object",
            FieldKind::Number => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::Media => "a media id string",
            FieldKind::List => "an array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Text | FieldKind::Textarea | FieldKind::Media => value.is_string(),
            FieldKind::Richtext => value.is_object(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::List => value.is_array(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub key: String,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSchema {
    pub fields: Vec<FieldDef>,
    pub default_values: JsonMap,
}

impl ModuleSchema {
    pub fn field(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }
}

/// Process-wide registry mapping a module type to its schema. Built once at
/// startup through the builder, then shared read-only (typically behind an
/// `Arc`) across concurrent staging calls. Never a module-level singleton,
/// so tests can hand the engine a fake catalog.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    schemas: HashMap<String, ModuleSchema>,
}

impl ModuleCatalog {
    pub fn builder() -> ModuleCatalogBuilder {
        ModuleCatalogBuilder {
            schemas: HashMap::new(),
        }
    }

    pub fn get_schema(&self, module_type: &str) -> Option<&ModuleSchema> {
        self.schemas.get(module_type)
    }

    /// Validates a full props payload against the declared schema. Runs
    /// before any write, so a failure never leaves persisted state mutated.
    pub fn validate(&self, module_type: &str, props: &JsonMap) -> Result<(), SchemaError> {
        let schema = self
            .schemas
            .get(module_type)
            .ok_or_else(|| SchemaError::UnknownType(module_type.to_string()))?;

        for field in &schema.fields {
            match props.get(&field.key) {
                Some(Value::Null) | None => {
                    let has_default = schema.default_values.contains_key(&field.key);
                    if field.required && !has_default {
                        return Err(SchemaError::MissingRequired {
                            module_type: module_type.to_string(),
                            key: field.key.clone(),
                        });
                    }
                }
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(SchemaError::WrongShape {
                            module_type: module_type.to_string(),
                            key: field.key.clone(),
                            expected: field.kind.expected(),
                        });
                    }
                }
            }
        }

        for key in props.keys() {
            if schema.field(key).is_none() {
                return Err(SchemaError::UnknownProp {
                    module_type: module_type.to_string(),
                    key: key.clone(),
                });
            }
        }

        Ok(())
    }

    /// Validates an override payload: shape checks only, since an override
    /// is partial by nature and required keys are satisfied by the base.
    pub fn validate_partial(&self, module_type: &str, props: &JsonMap) -> Result<(), SchemaError> {
        let schema = self
            .schemas
            .get(module_type)
            .ok_or_else(|| SchemaError::UnknownType(module_type.to_string()))?;

        for (key, value) in props {
            match schema.field(key) {
                None => {
                    return Err(SchemaError::UnknownProp {
                        module_type: module_type.to_string(),
                        key: key.clone(),
                    })
                }
                Some(field) => {
                    if !value.is_null() && !field.kind.matches(value) {
                        return Err(SchemaError::WrongShape {
                            module_type: module_type.to_string(),
                            key: key.clone(),
                            expected: field.kind.expected(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Target field for the markdown convenience path.
    pub fn first_richtext_field(&self, module_type: &str) -> Option<&str> {
        self.first_field_of_kind(module_type, FieldKind::Richtext)
    }

    pub fn first_textarea_field(&self, module_type: &str) -> Option<&str> {
        self.first_field_of_kind(module_type, FieldKind::Textarea)
    }

    fn first_field_of_kind(&self, module_type: &str, kind: FieldKind) -> Option<&str> {
        self.schemas
            .get(module_type)?
            .fields
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| f.key.as_str())
    }
}

pub struct ModuleCatalogBuilder {
    schemas: HashMap<String, ModuleSchema>,
}

impl ModuleCatalogBuilder {
    pub fn register(mut self, module_type: &str, schema: ModuleSchema) -> Self {
        self.schemas.insert(module_type.to_string(), schema);
        self
    }

    pub fn build(self) -> ModuleCatalog {
        ModuleCatalog {
            schemas: self.schemas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::builder()
            .register(
                "hero",
                ModuleSchema {
                    fields: vec![
                        FieldDef {
                            key: "title".to_string(),
                            kind: FieldKind::Text,
                            required: true,
                        },
                        FieldDef {
                            key: "body".to_string(),
                            kind: FieldKind::Richtext,
                            required: false,
                        },
                        FieldDef {
                            key: "show_cta".to_string(),
                            kind: FieldKind::Boolean,
                            required: false,
                        },
                    ],
                    default_values: JsonMap::new(),
                },
            )
            .build()
    }

    fn props(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_well_shaped_props() {
        let result = catalog().validate(
            "hero",
            &props(json!({"title": "Hi", "body": {"type": "doc", "content": []}})),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_missing_required_key() {
        let err = catalog().validate("hero", &props(json!({"show_cta": true}))).unwrap_err();
        assert!(matches!(err, SchemaError::MissingRequired { ref key, .. } if key == "title"));
    }

    #[test]
    fn rejects_wrong_shape_and_unknown_keys() {
        let cat = catalog();
        let err = cat.validate("hero", &props(json!({"title": 7}))).unwrap_err();
        assert!(matches!(err, SchemaError::WrongShape { ref key, .. } if key == "title"));

        let err = cat
            .validate("hero", &props(json!({"title": "x", "zap": 1})))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownProp { ref key, .. } if key == "zap"));
    }

    #[test]
    fn rejects_unknown_module_type() {
        let err = catalog().validate("carousel", &JsonMap::new()).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType(t) if t == "carousel"));
    }

    #[test]
    fn partial_validation_skips_required_checks() {
        let cat = catalog();
        assert!(cat.validate_partial("hero", &props(json!({"show_cta": false}))).is_ok());
        assert!(cat.validate_partial("hero", &props(json!({"show_cta": "yes"}))).is_err());
    }

    #[test]
    fn finds_first_richtext_field() {
        let cat = catalog();
        assert_eq!(cat.first_richtext_field("hero"), Some("body"));
        assert_eq!(cat.first_textarea_field("hero"), None);
    }
}
