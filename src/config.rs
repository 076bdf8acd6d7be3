//! Catalog configuration.
//!
//! Every section has defaults, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};

use crate::storage::BackendConfig;
use crate::Result;

/// Top-level configuration for [`crate::Catalog::open`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub backend: BackendConfig,
    pub history: HistoryConfig,
    pub validation: ValidationConfig,
}

/// History engine switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append an UPDATE record even when nothing changed (`changes = []`).
    pub record_noop_updates: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { record_noop_updates: true }
    }
}

/// Limits applied by validators and the tree materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Maximum nesting depth of an ObjectValue tree.
    pub max_tree_depth: usize,
    /// Validate scalars against the aspect base type.
    pub check_base_types: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_tree_depth: 64, check_base_types: true }
    }
}

impl CatalogConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
