pub use crate::models::{BindingConfig, FileFormat, ModelConfig, TableSourceConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

// Default constants
pub const DEFAULT_FETCH_SIZE: usize = 2048;
pub const DEFAULT_PARTIAL_RESULTS: bool = false;

pub const DEFAULT_MAX_CODE_TABLES: usize = 200;
pub const DEFAULT_MAX_CODE_TABLE_RECORDS: usize = 10_000;
pub const DEFAULT_FAILURE_RETRY_WINDOW_MS: u64 = 5_000;

pub const DEFAULT_SERVICE_NAME: &str = "ferry";
pub const DEFAULT_TELEMETRY_ENABLED: bool = false;
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const ENV_PREFIX: &str = "FERRY";

#[derive(Debug, Deserialize, Default, Clone, Validate)]
pub struct AppConfig {
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    #[validate(nested)]
    pub code_tables: CodeTableSettings,
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    #[validate(nested)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub bindings: Vec<BindingConfig>,
}

/// Per-request defaults applied when the submitter does not override them.
#[derive(Debug, Deserialize, Clone, Copy, Validate)]
pub struct ExecutionSettings {
    #[serde(default = "default_fetch_size")]
    #[validate(range(min = 1))]
    pub default_fetch_size: usize,
    #[serde(default = "default_partial_results")]
    pub partial_results: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            default_fetch_size: default_fetch_size(),
            partial_results: default_partial_results(),
        }
    }
}

fn default_fetch_size() -> usize {
    DEFAULT_FETCH_SIZE
}

fn default_partial_results() -> bool {
    DEFAULT_PARTIAL_RESULTS
}

/// Bounds for the process-wide code table cache.
#[derive(Debug, Deserialize, Clone, Copy, Validate)]
pub struct CodeTableSettings {
    /// Upper bound on resident plus loading code tables.
    #[serde(default = "default_max_code_tables")]
    #[validate(range(min = 1))]
    pub max_code_tables: usize,
    /// Rows a single load may deliver before it is aborted.
    #[serde(default = "default_max_code_table_records")]
    #[validate(range(min = 1))]
    pub max_code_table_records: usize,
    /// How long a failed load is re-raised instead of retried. `0` retries on the next
    /// lookup; requests that waited on the failed load still receive its error once.
    #[serde(default = "default_failure_retry_window_ms")]
    pub failure_retry_window_ms: u64,
}

impl CodeTableSettings {
    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.failure_retry_window_ms)
    }
}

impl Default for CodeTableSettings {
    fn default() -> Self {
        Self {
            max_code_tables: default_max_code_tables(),
            max_code_table_records: default_max_code_table_records(),
            failure_retry_window_ms: default_failure_retry_window_ms(),
        }
    }
}

fn default_max_code_tables() -> usize {
    DEFAULT_MAX_CODE_TABLES
}

fn default_max_code_table_records() -> usize {
    DEFAULT_MAX_CODE_TABLE_RECORDS
}

fn default_failure_retry_window_ms() -> u64 {
    DEFAULT_FAILURE_RETRY_WINDOW_MS
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

fn default_telemetry_enabled() -> bool {
    DEFAULT_TELEMETRY_ENABLED
}

fn default_otlp_endpoint() -> String {
    DEFAULT_OTLP_ENDPOINT.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl AppConfig {
    /// Loads configuration from `path` (if it exists) and `FERRY_`-prefixed environment
    /// variables, then validates it.
    ///
    /// Nested keys use `__`, e.g. `FERRY_CODE_TABLES__MAX_CODE_TABLES=50`.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = config::Config::builder();

        let builder = if std::path::Path::new(path).exists() {
            builder.add_source(config::File::from(std::path::Path::new(path)))
        } else {
            builder
        };

        let builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().context("Failed to build configuration")?;

        let app_config: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {:?}", e))?;

        Ok(app_config)
    }
}
