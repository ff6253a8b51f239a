//! File-based data sources (CSV, Parquet, JSON).
//!
//! Each configured table is registered as a DataFusion `ListingTable` inside the
//! connector's own session context.
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::datasource::file_format::csv::CsvFormat;
use datafusion::datasource::file_format::json::JsonFormat;
use datafusion::datasource::file_format::parquet::ParquetFormat;
use datafusion::datasource::file_format::FileFormat as ListingFormat;
use datafusion::datasource::listing::{
    ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl,
};
use datafusion::prelude::SessionContext;
use ferry_common::config::{BindingConfig, FileFormat, TableSourceConfig};
use ferry_error::{ErrorCode, FerryError, Result};

use crate::sources::{Connector, ConnectorProvider, DataFusionConnector};

pub struct FileConnectorProvider;

#[async_trait]
impl ConnectorProvider for FileConnectorProvider {
    fn type_name(&self) -> &'static str {
        "file"
    }

    async fn create(&self, config: &BindingConfig) -> Result<Arc<dyn Connector>> {
        if config.tables.is_empty() {
            return Err(FerryError::new(
                ErrorCode::MissingRequiredField,
                format!("File binding '{}' declares no tables", config.name),
            )
            .with_hint("Add at least one entry under 'tables' with a name and a path"));
        }

        let connector = DataFusionConnector::new(&config.name);
        for table in &config.tables {
            register_table_source(connector.context(), table).await?;
        }
        Ok(Arc::new(connector))
    }
}

/// Registers one file table, inferring its schema from the data.
pub async fn register_table_source(
    context: &SessionContext,
    table: &TableSourceConfig,
) -> Result<()> {
    let file_format: Arc<dyn ListingFormat> = match table.format {
        FileFormat::Csv => Arc::new(CsvFormat::default().with_has_header(table.has_header)),
        FileFormat::Parquet => Arc::new(ParquetFormat::default()),
        FileFormat::Json => Arc::new(JsonFormat::default()),
    };

    let listing_options = ListingOptions::new(file_format);
    let start_url = ListingTableUrl::parse(&table.path)?;
    let resolved_schema = listing_options
        .infer_schema(&context.state(), &start_url)
        .await?;

    let config = ListingTableConfig::new(start_url)
        .with_listing_options(listing_options)
        .with_schema(resolved_schema);
    let provider = ListingTable::try_new(config)?;
    context.register_table(table.name.as_str(), Arc::new(provider))?;

    tracing::debug!(
        target: "gateway",
        table = %table.name,
        path = %table.path,
        format = ?table.format,
        "Registered file table"
    );
    Ok(())
}
