//! Ferry Runtime: non-blocking execution of federated sub-requests.
//!
//! This crate turns plan nodes into row streams pulled from remote connectors and
//! serves scalar lookups from a shared cache of small code tables.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   open / lookup    ┌──────────────┐
//! │ Query executor├───────────────────►│  Dispatcher  │
//! └───────┬───────┘                    └──┬────────┬──┘
//!         │ next / close / cancel         │        │ probe / load
//!  ┌──────▼──────┐  execute / next batch  │  ┌─────▼──────────┐
//!  │ TupleStream ├────────────────────────┘  │ CodeTableCache │
//!  └──────▲──────┘                           └────────────────┘
//!         │ batches / failures (response channel)
//!  ┌──────┴────────────┐
//!  │ Connector gateway │
//!  └───────────────────┘
//! ```
//!
//! Nothing here blocks a thread. Operations that would have to wait return
//! [`Pull::WouldBlock`] or [`Lookup::WouldBlock`]; the request's [`WorkSignal`] fires
//! once the awaited batch or code table arrives.
//!
//! [`WorkSignal`]: ferry_connectors::WorkSignal

pub mod dispatcher;
pub mod metadata;
pub mod query;
pub mod request;

pub use dispatcher::{Dispatcher, DispatcherOptions, Lookup};
pub use metadata::{MetadataResolver, StaticCatalog};
pub use query::code_table::{CacheKey, CacheState, CodeTableCache, CodeTableStats, WaitingSet};
pub use query::tuple_stream::{StreamStatus, TupleStream};
pub use query::Pull;
pub use request::{RequestContext, RequestOptions};
