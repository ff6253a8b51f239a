//! Common building blocks shared across ferry crates.
//!
//! - **Identifiers**: request, node and sub-request ids, connector handles (`ids`).
//! - **Data model**: row batches (`batch`) and sub-commands (`command`).
//! - **Configuration**: Strongly typed application configuration (`config`, `models`).
//! - **Telemetry**: Logging and OTLP setup (`telemetry`).
//! - **Warnings**: Per-request source failure notes (`warnings`).
pub mod batch;
pub mod command;
pub mod config;
pub mod ids;
pub mod models;
pub mod telemetry;
pub mod warnings;

pub use batch::{Batch, Row};
pub use command::{Command, SubRequest};
pub use ids::{ConnectorHandle, NodeId, RequestId, SubRequestId, TransactionHandle};
