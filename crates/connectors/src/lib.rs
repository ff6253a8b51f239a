//! # Ferry Connectors
//!
//! The boundary between the query runtime and the data sources.
//!
//! - [`ConnectorGateway`]: the non-blocking interface the runtime drives sub-requests
//!   through.
//! - [`ResponseSender`] / [`ResponseReceiver`]: the per-sub-request channel batches and
//!   failures travel back on.
//! - [`LocalGateway`]: an in-process gateway that runs [`Connector`]s on tokio tasks.
//! - [`sources`]: DataFusion-backed connectors (in-memory tables and files).
pub mod gateway;
pub mod local;
pub mod response;
pub mod sources;

pub use gateway::ConnectorGateway;
pub use local::LocalGateway;
pub use response::{
    response_channel, ConnectorResponse, ResponseReceiver, ResponseSender, WorkSignal,
};
pub use sources::{default_registry, Connector, ConnectorProvider, ConnectorRegistry};
