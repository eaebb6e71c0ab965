use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::models::JsonMap;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("Item not found in database: {0}")]
    NotFound(String),
    #[error("Inconsistent row in database: {0}")]
    Inconsistent(String),
}

// --- Column conversion helpers shared by the operation modules ---
// JSON layers are stored as TEXT; timestamps as RFC 3339 TEXT, which keeps
// lexicographic and chronological order identical for the tie-break sort.

pub(crate) fn json_map_from_sql(text: Option<String>) -> Result<Option<JsonMap>, DbError> {
    text.as_deref().map(serde_json::from_str).transpose().map_err(Into::into)
}

pub(crate) fn value_to_sql(value: Option<&Value>) -> Result<Option<String>, DbError> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

pub(crate) fn value_from_sql(text: Option<String>) -> Result<Option<Value>, DbError> {
    text.as_deref().map(serde_json::from_str).transpose().map_err(Into::into)
}

pub(crate) fn datetime_to_sql(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}

pub(crate) fn datetime_from_sql(text: &str) -> Result<DateTime<Utc>, DbError> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

pub mod modules_db_operations;
pub mod posts_db_operations;
pub mod revisions_db_operations;
