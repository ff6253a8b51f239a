//! Routes plan nodes to connectors and serves code table lookups.
//!
//! The dispatcher is the only component that talks to both the query executor and
//! the connector gateway. It is stateless apart from the shared [`CodeTableCache`]
//! and the registry of requests waiting on a load, so any number of requests may
//! call into it concurrently.
//!
//! # Code table loads
//!
//! A lookup against a cold table makes its caller the load's primary driver. The
//! dispatcher opens an internal [`TupleStream`] over `(key column, return column)` of
//! the table and hands it to a spawned task that feeds every batch into the cache.
//! When the load completes or fails, every request in its waiting set has its work
//! signal raised exactly once; on their next lookup they find the table resident or
//! receive the load's failure. Each waiter receives that failure once, even when the
//! retry window has already passed or is zero, so a waiting lookup never restarts a
//! load it has not heard the outcome of.
use std::collections::HashMap;
use std::sync::Arc;

use datafusion::common::ScalarValue;
use ferry_common::config::CodeTableSettings;
use ferry_common::warnings::SourceWarnings;
use ferry_common::{Command, ConnectorHandle, NodeId, RequestId, SubRequest, SubRequestId};
use ferry_connectors::{ConnectorGateway, ResponseSender, WorkSignal};
use ferry_error::{ErrorCode, ErrorContext, FerryError, Result};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::metadata::MetadataResolver;
use crate::query::code_table::{
    pairs_from_batch, CacheKey, CacheState, CodeTableCache, CodeTableStats, WaitingSet,
};
use crate::query::tuple_stream::{StreamOptions, TupleStream};
use crate::query::Pull;
use crate::request::RequestContext;

/// Outcome of a non-blocking code table lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// The table is resident. `None` if it has no row for the key value.
    Value(Option<ScalarValue>),
    /// The table is loading; retry once the request's work signal fires.
    WouldBlock,
}

pub struct DispatcherOptions {
    pub gateway: Arc<dyn ConnectorGateway>,
    pub metadata: Arc<dyn MetadataResolver>,
    pub code_tables: CodeTableSettings,
}

pub struct Dispatcher {
    gateway: Arc<dyn ConnectorGateway>,
    metadata: Arc<dyn MetadataResolver>,
    cache: CodeTableCache,
    waiters: Mutex<HashMap<RequestId, WorkSignal>>,
    runtime: Handle,
}

impl Dispatcher {
    /// Creates a dispatcher whose code table loads run on the current tokio runtime.
    pub fn new(options: DispatcherOptions) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|e| {
            FerryError::new(
                ErrorCode::RuntimeUnavailable,
                format!("Dispatcher requires a tokio runtime: {}", e),
            )
        })?;
        Ok(Self::with_runtime(options, runtime))
    }

    pub fn with_runtime(options: DispatcherOptions, runtime: Handle) -> Arc<Self> {
        tracing::info!(
            target: "dispatch",
            max_code_tables = options.code_tables.max_code_tables,
            max_code_table_records = options.code_tables.max_code_table_records,
            "Dispatcher initialized"
        );
        Arc::new(Self {
            gateway: options.gateway,
            metadata: options.metadata,
            cache: CodeTableCache::new(options.code_tables),
            waiters: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    pub fn code_tables(&self) -> &CodeTableCache {
        &self.cache
    }

    /// Routes `command` for plan node `node` to a connector of `model` and opens a
    /// stream over its output.
    pub fn open(
        self: &Arc<Self>,
        ctx: &RequestContext,
        command: Command,
        model: &str,
        node: NodeId,
    ) -> Result<TupleStream> {
        let binding = self.metadata.binding_for_model(model)?;
        let handle = self.gateway.select_connector(&binding)?;
        let request = SubRequest {
            id: SubRequestId::new(ctx.request_id, node),
            model: model.to_string(),
            binding,
            command,
            fetch_size: ctx.fetch_size,
            transaction: ctx.transaction.clone(),
        };
        tracing::debug!(
            target: "dispatch",
            sub_request = %request.id,
            model = %request.model,
            connector = %handle,
            "Dispatching sub-request"
        );

        let stream = TupleStream::new(
            self.clone(),
            request,
            handle,
            StreamOptions {
                partial_results: ctx.partial_results,
                signal: ctx.signal.clone(),
                warnings: ctx.warnings.clone(),
            },
        );
        stream.open()?;
        Ok(stream)
    }

    /// Looks `key_value` up in code table `table` without waiting.
    ///
    /// A cold table starts loading in the background and the call returns
    /// `WouldBlock`; so does a table another request is loading. Capacity exhaustion
    /// is a hard error.
    pub fn lookup_cached_value(
        self: &Arc<Self>,
        ctx: &RequestContext,
        table: &str,
        return_column: &str,
        key_column: &str,
        key_value: &ScalarValue,
    ) -> Result<Lookup> {
        let key = CacheKey::new(
            table,
            return_column,
            key_column,
            &ctx.database,
            &ctx.database_version,
        );

        match self.cache.probe(&key, ctx.request_id)? {
            CacheState::Exists => Ok(Lookup::Value(self.cache.get(&key, key_value)?)),
            CacheState::Loading => {
                self.register_waiter(ctx, &key);
                Ok(Lookup::WouldBlock)
            }
            CacheState::NotExist => {
                self.register_waiter(ctx, &key);
                self.start_load(ctx, key)?;
                Ok(Lookup::WouldBlock)
            }
            CacheState::Overload => {
                let stats = self.cache.stats();
                Err(FerryError::new(
                    ErrorCode::CodeTableOverload,
                    format!(
                        "Cannot load code table {}: {} code tables already resident or loading",
                        key,
                        stats.resident + stats.loading
                    ),
                )
                .with_hint("Raise code_tables.max_code_tables or invalidate the code table cache")
                .with_context(ErrorContext::Capacity {
                    limit: stats.capacity,
                    in_use: stats.resident + stats.loading,
                }))
            }
        }
    }

    /// Waiting form of [`lookup_cached_value`](Self::lookup_cached_value).
    pub async fn lookup(
        self: &Arc<Self>,
        ctx: &RequestContext,
        table: &str,
        return_column: &str,
        key_column: &str,
        key_value: &ScalarValue,
    ) -> Result<Option<ScalarValue>> {
        ctx.signal
            .until_ready(|| -> Result<Option<Option<ScalarValue>>> {
                let lookup =
                    self.lookup_cached_value(ctx, table, return_column, key_column, key_value)?;
                match lookup {
                    Lookup::Value(value) => Ok(Some(value)),
                    Lookup::WouldBlock => Ok(None),
                }
            })
            .await
    }

    pub fn execute(
        &self,
        request: SubRequest,
        handle: &ConnectorHandle,
        responses: ResponseSender,
    ) -> Result<()> {
        self.gateway.execute(request, handle, responses)
    }

    pub fn request_next_batch(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()> {
        self.gateway.request_next_batch(id, handle)
    }

    pub fn close_sub_request(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()> {
        self.gateway.close(id, handle)
    }

    pub fn cancel_sub_request(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()> {
        self.gateway.cancel(id, handle)
    }

    /// Drops every resident code table, e.g. after a catalog reload.
    pub fn invalidate_code_tables(&self) {
        self.cache.invalidate_all();
    }

    pub fn code_table_stats(&self) -> CodeTableStats {
        self.cache.stats()
    }

    /// Number of requests currently registered to be woken by a code table load.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Forgets everything kept on behalf of a finished request: its wake registration
    /// and any load failure it has not looked up yet.
    pub fn release_request(&self, ctx: &RequestContext) {
        self.waiters.lock().remove(&ctx.request_id);
        self.cache.forget_requester(ctx.request_id);
    }

    /// Remembers whom to wake for `ctx`. If the load already finished in the meantime
    /// the request is woken right away.
    fn register_waiter(&self, ctx: &RequestContext, key: &CacheKey) {
        let mut registry = self.waiters.lock();
        registry.insert(ctx.request_id, ctx.signal.clone());
        if !self.cache.is_loading(key) {
            registry.remove(&ctx.request_id);
            ctx.signal.notify();
        }
    }

    fn wake(&self, waiters: WaitingSet) {
        let mut registry = self.waiters.lock();
        for requester in waiters.iter() {
            if let Some(signal) = registry.remove(&requester) {
                signal.notify();
            }
        }
    }

    fn fail_load(&self, load: &SubRequestId, cause: FerryError) {
        let waiters = self.cache.fail_load(load, cause);
        self.wake(waiters);
    }

    fn start_load(self: &Arc<Self>, ctx: &RequestContext, key: CacheKey) -> Result<()> {
        let load = self.cache.begin_load(&key, ctx.request_id)?;
        let signal = WorkSignal::new();

        let stream = match self.open_load_stream(ctx, &key, load, signal.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                self.fail_load(&load, e);
                return Ok(());
            }
        };

        let span = tracing::debug_span!(target: "code_table", "code_table_load", load = %load, key = %key);
        let dispatcher = self.clone();
        self.runtime
            .spawn(async move { dispatcher.drive_load(load, stream, signal).await }.instrument(span));
        Ok(())
    }

    fn open_load_stream(
        self: &Arc<Self>,
        ctx: &RequestContext,
        key: &CacheKey,
        load: SubRequestId,
        signal: WorkSignal,
    ) -> Result<TupleStream> {
        let model = self.metadata.resolve_model(&key.table)?;
        let binding = self.metadata.binding_for_model(&model)?;
        let handle = self.gateway.select_connector(&binding)?;
        let request = SubRequest {
            id: load,
            model,
            binding,
            command: Command::select(
                key.table.as_str(),
                &[key.key_column.as_str(), key.return_column.as_str()],
            ),
            fetch_size: ctx.fetch_size,
            transaction: ctx.transaction.clone(),
        };

        // A partially loaded table would answer lookups wrongly, so loads never
        // tolerate partial results.
        let stream = TupleStream::new(
            self.clone(),
            request,
            handle,
            StreamOptions {
                partial_results: false,
                signal,
                warnings: SourceWarnings::new(),
            },
        );
        stream.open()?;
        Ok(stream)
    }

    async fn drive_load(&self, load: SubRequestId, stream: TupleStream, signal: WorkSignal) {
        loop {
            let step = signal
                .until_ready(|| -> Result<Option<Pull<()>>> {
                    match stream.next_batch()? {
                        Pull::Ready(batch) => {
                            let pairs = pairs_from_batch(&batch)?;
                            self.cache.append_rows(&load, pairs)?;
                            Ok(Some(Pull::Ready(())))
                        }
                        Pull::WouldBlock => Ok(None),
                        Pull::EndOfStream => Ok(Some(Pull::EndOfStream)),
                    }
                })
                .await;

            match step {
                Ok(Pull::Ready(())) | Ok(Pull::WouldBlock) => {}
                Ok(Pull::EndOfStream) => {
                    if let Err(e) = stream.close() {
                        tracing::debug!(target: "code_table", error = %e, "Close after load failed");
                    }
                    let waiters = self.cache.complete_load(&load);
                    self.wake(waiters);
                    return;
                }
                Err(e) => {
                    stream.cancel();
                    self.fail_load(&load, e);
                    return;
                }
            }
        }
    }
}
