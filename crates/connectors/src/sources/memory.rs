//! DataFusion-backed connector over in-process tables.
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::execution::SendableRecordBatchStream;
use datafusion::prelude::SessionContext;
use ferry_common::config::BindingConfig;
use ferry_common::Command;
use ferry_error::{ErrorCode, ErrorContext, FerryError, Result};

use crate::sources::{file, Connector, ConnectorProvider};

/// Executes commands against tables registered in its own `SessionContext`.
///
/// `Select` commands are answered with the DataFrame API, `Native` commands are
/// treated as DataFusion SQL.
#[derive(Clone)]
pub struct DataFusionConnector {
    name: String,
    context: SessionContext,
    implicit_close: bool,
}

impl std::fmt::Debug for DataFusionConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionConnector")
            .field("name", &self.name)
            .field("implicit_close", &self.implicit_close)
            .finish_non_exhaustive()
    }
}

impl DataFusionConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: SessionContext::new(),
            implicit_close: false,
        }
    }

    pub fn with_implicit_close(mut self, implicit_close: bool) -> Self {
        self.implicit_close = implicit_close;
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Registers `batches` as table `table`.
    pub fn register_batches(
        &self,
        table: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        let provider = MemTable::try_new(schema, vec![batches])?;
        self.context.register_table(table, Arc::new(provider))?;
        Ok(())
    }

    fn table_missing(&self, table: &str) -> FerryError {
        let available: Vec<String> = self
            .context
            .catalog("datafusion")
            .and_then(|catalog| catalog.schema("public"))
            .map(|schema| schema.table_names())
            .unwrap_or_default();

        let mut err = FerryError::new(
            ErrorCode::TableNotFound,
            format!("Table '{}' not found in connector '{}'", table, self.name),
        );
        if let Some(closest) = ferry_error::closest_match(table, &available) {
            err = err.with_hint(format!("Did you mean '{}'?", closest));
        }
        err.with_context(ErrorContext::TableNotFound {
            table: table.to_string(),
            available_tables: available,
        })
    }
}

#[async_trait]
impl Connector for DataFusionConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, command: &Command) -> Result<SendableRecordBatchStream> {
        tracing::debug!(target: "gateway", connector = %self.name, command = %command, "Executing command");
        match command {
            Command::Select { table, columns } => {
                if !self.context.table_exist(table.as_str())? {
                    return Err(self.table_missing(table));
                }
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                let frame = self
                    .context
                    .table(table.as_str())
                    .await?
                    .select_columns(&columns)?;
                Ok(frame.execute_stream().await?)
            }
            Command::Native { text } => {
                let frame = self.context.sql(text).await?;
                Ok(frame.execute_stream().await?)
            }
        }
    }

    fn supports_implicit_close(&self) -> bool {
        self.implicit_close
    }
}

/// Builds an empty DataFusion connector; any file tables listed on the binding are
/// registered as well, further tables can be created with native DDL.
pub struct MemoryConnectorProvider;

#[async_trait]
impl ConnectorProvider for MemoryConnectorProvider {
    fn type_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, config: &BindingConfig) -> Result<Arc<dyn Connector>> {
        let connector = DataFusionConnector::new(&config.name);
        for table in &config.tables {
            file::register_table_source(connector.context(), table).await?;
        }
        Ok(Arc::new(connector))
    }
}
