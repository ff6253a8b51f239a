//! # Error Contexts
//!
//! Structured metadata attached to errors so callers can react without parsing messages.

use serde::{Deserialize, Serialize};

/// Structured context for an error.
///
/// Each variant provides the fields relevant to that error type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for FERRY-2002 (FieldNotFound)
    FieldNotFound {
        field: String,
        table: Option<String>,
        available_fields: Vec<String>,
    },

    /// Context for FERRY-2003 (TableNotFound)
    TableNotFound {
        table: String,
        available_tables: Vec<String>,
    },

    /// Context for FERRY-2001 (ModelNotFound) and FERRY-1001 (BindingNotFound)
    ModelNotFound {
        model: String,
        available_models: Vec<String>,
    },

    /// Context for connector failures (FERRY-1002..1005)
    Connector {
        model: String,
        binding: String,
        /// Sub-request that observed the failure, rendered as `request.node`
        sub_request: Option<String>,
    },

    /// Context for code table errors (FERRY-5006, 6001, 6002)
    CodeTable {
        table: String,
        key_column: String,
        return_column: String,
    },

    /// Context for admission errors
    Capacity { limit: usize, in_use: usize },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}
