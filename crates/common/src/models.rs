use serde::{Deserialize, Serialize};
use validator::Validate;

// --- Config Constants (Defaults) ---

fn default_instances() -> usize {
    1
}

fn default_has_header() -> bool {
    true
}

/// A model groups tables that are served by the same connector binding.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct ModelConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub binding: String,

    /// Tables routed to this model.
    #[serde(default)]
    pub tables: Vec<String>,
}

/// A named connector configuration; the gateway creates `instances` connectors from it.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct BindingConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub connector_type: String, // e.g., memory, file

    #[serde(default = "default_instances")]
    #[validate(range(min = 1))]
    pub instances: usize,

    #[serde(default)]
    #[validate(nested)]
    pub tables: Vec<TableSourceConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    Parquet,
    Json,
}

/// A table a file connector registers at startup.
#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct TableSourceConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[validate(length(min = 1))]
    pub path: String,

    #[serde(default)]
    pub format: FileFormat,

    #[serde(default = "default_has_header")]
    pub has_header: bool,
}
