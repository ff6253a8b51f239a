//! Routing metadata: which model serves a table, and which binding serves a model.
use std::collections::HashMap;

use ferry_common::config::ModelConfig;
use ferry_error::{closest_match, ErrorCode, ErrorContext, FerryError, Result};

/// The only catalog questions the runtime asks.
pub trait MetadataResolver: Send + Sync {
    /// Maps a table (or column owner) name to the model that serves it.
    fn resolve_model(&self, table: &str) -> Result<String>;

    /// Maps a model to its connector binding name.
    fn binding_for_model(&self, model: &str) -> Result<String>;
}

/// A [`MetadataResolver`] built once from the `models:` configuration section.
///
/// Table names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: HashMap<String, String>,
    models: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn from_config(models: &[ModelConfig]) -> Result<Self> {
        let mut catalog = Self::default();
        for model in models {
            if catalog
                .models
                .insert(model.name.clone(), model.binding.clone())
                .is_some()
            {
                return Err(FerryError::new(
                    ErrorCode::InvalidConfig,
                    format!("Model '{}' is declared twice", model.name),
                ));
            }
            for table in &model.tables {
                if let Some(previous) = catalog
                    .tables
                    .insert(table.to_lowercase(), model.name.clone())
                {
                    return Err(FerryError::new(
                        ErrorCode::InvalidConfig,
                        format!(
                            "Table '{}' is routed to both '{}' and '{}'",
                            table, previous, model.name
                        ),
                    ));
                }
            }
        }
        Ok(catalog)
    }
}

impl MetadataResolver for StaticCatalog {
    fn resolve_model(&self, table: &str) -> Result<String> {
        if let Some(model) = self.tables.get(&table.to_lowercase()) {
            return Ok(model.clone());
        }

        let available: Vec<String> = self.tables.keys().cloned().collect();
        let mut err = FerryError::new(
            ErrorCode::TableNotFound,
            format!("Table '{}' is not routed to any model", table),
        );
        if let Some(closest) = closest_match(&table.to_lowercase(), &available) {
            err = err.with_hint(format!("Did you mean '{}'?", closest));
        }
        Err(err.with_context(ErrorContext::TableNotFound {
            table: table.to_string(),
            available_tables: available,
        }))
    }

    fn binding_for_model(&self, model: &str) -> Result<String> {
        if let Some(binding) = self.models.get(model) {
            return Ok(binding.clone());
        }

        let available: Vec<String> = self.models.keys().cloned().collect();
        let mut err = FerryError::new(
            ErrorCode::ModelNotFound,
            format!("Model '{}' not found", model),
        );
        if let Some(closest) = closest_match(model, &available) {
            err = err.with_hint(format!("Did you mean '{}'?", closest));
        }
        Err(err.with_context(ErrorContext::ModelNotFound {
            model: model.to_string(),
            available_models: available,
        }))
    }
}
