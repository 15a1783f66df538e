//! Thread metadata
//!
//! Metadata is a flat map of string keys to scalar values. Edits are
//! expressed as patches: `Some(value)` sets a key, `None` removes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Free-form string
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Thread metadata, ordered by key so serialization is deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Partial metadata update. A `None` value deletes the key.
pub type MetadataPatch = BTreeMap<String, Option<MetadataValue>>;

/// Shallow-merge `patch` into `metadata`, returning the merged map.
pub fn apply_metadata_patch(metadata: &Metadata, patch: &MetadataPatch) -> Metadata {
    let mut merged = metadata.clone();
    for (key, value) in patch {
        match value {
            Some(value) => {
                merged.insert(key.clone(), value.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }
    merged
}

/// Whether every pair of `filter` is present in `metadata` with an equal value.
pub fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}
