//! Connector abstractions and implementations.
//!
//! Every connector implements the [`Connector`] trait: it executes one
//! [`Command`] and yields a DataFusion record batch stream. The [`LocalGateway`]
//! takes care of paging that stream into fetch-sized batches.
//!
//! # Supported Connector Types
//!
//! | Type     | Implementation | Description |
//! |----------|----------------|-------------|
//! | `memory` | `MemoryConnectorProvider` | Tables registered programmatically from Arrow batches |
//! | `file`   | `FileConnectorProvider` | CSV, Parquet or newline-delimited JSON files |
//!
//! # Adding a New Connector Type
//!
//! 1. Implement `Connector` for the new source.
//! 2. Implement `ConnectorProvider` to build it from a `BindingConfig`.
//! 3. Register the provider in `default_registry` in this module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::execution::SendableRecordBatchStream;
use ferry_common::config::BindingConfig;
use ferry_common::Command;
use ferry_error::{closest_match, ErrorCode, ErrorContext, FerryError, Result};

use crate::local::LocalGateway;

pub mod file;
pub mod memory;

pub use memory::DataFusionConnector;

/// A data source that can execute sub-commands.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Executes `command`, returning its full result as a stream.
    async fn execute(&self, command: &Command) -> Result<SendableRecordBatchStream>;

    /// Whether the connector releases a sub-request on its own once the final batch
    /// was produced, making an explicit close unnecessary.
    fn supports_implicit_close(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait ConnectorProvider: Send + Sync {
    /// Returns the connector type this provider handles (e.g., "memory", "file")
    fn type_name(&self) -> &'static str;

    /// Builds the connector described by `config`.
    async fn create(&self, config: &BindingConfig) -> Result<Arc<dyn Connector>>;
}

#[derive(Default)]
pub struct ConnectorRegistry {
    providers: HashMap<&'static str, Box<dyn ConnectorProvider>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, provider: Box<dyn ConnectorProvider>) {
        self.providers.insert(provider.type_name(), provider);
    }

    /// Creates the connector for one binding.
    pub async fn create(&self, config: &BindingConfig) -> Result<Arc<dyn Connector>> {
        let type_name = match config.connector_type.as_str() {
            "csv" | "parquet" | "json" => "file",
            other => other,
        };

        match self.providers.get(type_name) {
            Some(provider) => provider.create(config).await,
            None => {
                let known: Vec<String> = self.providers.keys().map(|k| k.to_string()).collect();
                let mut err = FerryError::new(
                    ErrorCode::UnsupportedCommand,
                    format!("No provider found for connector type: {}", type_name),
                )
                .with_context(ErrorContext::Connector {
                    model: String::new(),
                    binding: config.name.clone(),
                    sub_request: None,
                });
                if let Some(closest) = closest_match(type_name, &known) {
                    err = err.with_hint(format!("Did you mean '{}'?", closest));
                }
                Err(err)
            }
        }
    }

    /// Builds an in-process gateway serving every configured binding.
    ///
    /// A binding with `instances: n` is registered `n` times; the instances share the
    /// same underlying connector and only spread selection.
    pub async fn build_gateway(&self, bindings: &[BindingConfig]) -> Result<LocalGateway> {
        let mut gateway = LocalGateway::new()?;
        for binding in bindings {
            let connector = self.create(binding).await?;
            for _ in 0..binding.instances {
                gateway.register(&binding.name, connector.clone());
            }
            tracing::info!(
                target: "gateway",
                binding = %binding.name,
                connector_type = %binding.connector_type,
                instances = binding.instances,
                "Registered connector binding"
            );
        }
        Ok(gateway)
    }
}

pub fn default_registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register_provider(Box::new(memory::MemoryConnectorProvider));
    registry.register_provider(Box::new(file::FileConnectorProvider));
    registry
}
