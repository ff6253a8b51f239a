//! In-process [`ConnectorGateway`] backed by [`Connector`] implementations.
//!
//! Every executed sub-request gets a driver task on the captured tokio runtime. The
//! driver pulls the connector's record batch stream, re-chunks it to the requested
//! fetch size and sends exactly one batch per request it received (the execute call
//! counts as the first). Control messages (`next`, `close`, `cancel`) reach the driver
//! over an unbounded channel, so every gateway method returns immediately.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::execution::SendableRecordBatchStream;
use ferry_common::{Batch, ConnectorHandle, SubRequest, SubRequestId};
use ferry_error::{closest_match, ErrorCode, ErrorContext, FerryError, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::gateway::ConnectorGateway;
use crate::response::ResponseSender;
use crate::sources::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Next,
    Close,
    Cancel,
}

struct BindingInstances {
    connectors: Vec<Arc<dyn Connector>>,
    next: AtomicUsize,
}

struct ActiveSubRequest {
    control: mpsc::UnboundedSender<Control>,
    handle: ConnectorHandle,
}

type ActiveMap = Arc<Mutex<HashMap<SubRequestId, ActiveSubRequest>>>;

pub struct LocalGateway {
    bindings: HashMap<String, BindingInstances>,
    active: ActiveMap,
    runtime: Handle,
}

impl LocalGateway {
    /// Creates a gateway whose drivers run on the current tokio runtime.
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            FerryError::new(
                ErrorCode::RuntimeUnavailable,
                format!("LocalGateway requires a tokio runtime: {}", e),
            )
        })?;
        Ok(Self::with_runtime(runtime))
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            bindings: HashMap::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            runtime,
        }
    }

    /// Adds one connector instance to `binding`.
    pub fn register(&mut self, binding: &str, connector: Arc<dyn Connector>) {
        self.bindings
            .entry(binding.to_string())
            .or_insert_with(|| BindingInstances {
                connectors: Vec::new(),
                next: AtomicUsize::new(0),
            })
            .connectors
            .push(connector);
    }

    /// Number of sub-requests whose driver is still running.
    pub fn active_sub_requests(&self) -> usize {
        self.active.lock().len()
    }

    fn instances(&self, binding: &str) -> Result<&BindingInstances> {
        match self.bindings.get(binding) {
            Some(instances) if !instances.connectors.is_empty() => Ok(instances),
            Some(_) => Err(FerryError::new(
                ErrorCode::NoConnectorAvailable,
                format!("Binding '{}' has no connector instances", binding),
            )),
            None => {
                let known: Vec<String> = self.bindings.keys().cloned().collect();
                let mut err = FerryError::new(
                    ErrorCode::BindingNotFound,
                    format!("Binding '{}' not found", binding),
                )
                .with_context(ErrorContext::Connector {
                    model: String::new(),
                    binding: binding.to_string(),
                    sub_request: None,
                });
                if let Some(closest) = closest_match(binding, &known) {
                    err = err.with_hint(format!("Did you mean '{}'?", closest));
                }
                Err(err)
            }
        }
    }

    fn connector(&self, handle: &ConnectorHandle) -> Result<Arc<dyn Connector>> {
        let instances = self.instances(&handle.binding)?;
        instances
            .connectors
            .get(handle.instance)
            .cloned()
            .ok_or_else(|| {
                FerryError::new(
                    ErrorCode::NoConnectorAvailable,
                    format!("Connector instance {} does not exist", handle),
                )
            })
    }

    fn send_control(&self, id: &SubRequestId, control: Control) {
        let mut active = self.active.lock();
        let delivered = match active.get(id) {
            Some(entry) => entry.control.send(control).is_ok(),
            None => false,
        };
        if control == Control::Cancel {
            active.remove(id);
        }
        if !delivered {
            tracing::trace!(
                target: "gateway",
                sub_request = %id,
                control = ?control,
                "Ignoring control for unknown sub-request"
            );
        }
    }
}

impl ConnectorGateway for LocalGateway {
    fn select_connector(&self, binding: &str) -> Result<ConnectorHandle> {
        let instances = self.instances(binding)?;
        let instance =
            instances.next.fetch_add(1, Ordering::Relaxed) % instances.connectors.len();
        Ok(ConnectorHandle {
            binding: binding.to_string(),
            instance,
        })
    }

    fn execute(
        &self,
        request: SubRequest,
        handle: &ConnectorHandle,
        responses: ResponseSender,
    ) -> Result<()> {
        let connector = self.connector(handle)?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        {
            let mut active = self.active.lock();
            if active.contains_key(&request.id) {
                return Err(FerryError::new(
                    ErrorCode::ConnectorRejected,
                    format!("Sub-request {} is already executing", request.id),
                )
                .with_context(ErrorContext::Connector {
                    model: request.model.clone(),
                    binding: request.binding.clone(),
                    sub_request: Some(request.id.to_string()),
                }));
            }
            active.insert(
                request.id,
                ActiveSubRequest {
                    control: control_tx,
                    handle: handle.clone(),
                },
            );
        }

        let span = tracing::debug_span!(
            target: "gateway",
            "sub_request",
            id = %request.id,
            connector = %handle,
            fetch_size = request.fetch_size
        );
        let active = self.active.clone();
        self.runtime.spawn(
            async move {
                let id = request.id;
                drive(connector, request, responses, control_rx).await;
                let mut active = active.lock();
                if let Some(entry) = active.remove(&id) {
                    tracing::trace!(target: "gateway", connector = %entry.handle, "Driver finished");
                }
            }
            .instrument(span),
        );
        Ok(())
    }

    fn request_next_batch(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        self.send_control(id, Control::Next);
        Ok(())
    }

    fn close(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        self.send_control(id, Control::Close);
        Ok(())
    }

    fn cancel(&self, id: &SubRequestId, _handle: &ConnectorHandle) -> Result<()> {
        self.send_control(id, Control::Cancel);
        Ok(())
    }
}

async fn drive(
    connector: Arc<dyn Connector>,
    request: SubRequest,
    responses: ResponseSender,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut wanted = 1usize;
    let mut finished = false;
    let mut rows_sent = 0usize;
    let mut chunker: Option<Chunker> = None;

    loop {
        if responses.is_closed() {
            return;
        }

        if finished || wanted == 0 {
            match control.recv().await {
                Some(Control::Next) if !finished => wanted += 1,
                Some(Control::Next) => {}
                Some(Control::Close) => {
                    responses.send_batch(Batch::closed());
                    return;
                }
                Some(Control::Cancel) | None => return,
            }
            continue;
        }

        tokio::select! {
            biased;
            received = control.recv() => match received {
                Some(Control::Next) => wanted += 1,
                Some(Control::Close) => {
                    responses.send_batch(Batch::closed());
                    return;
                }
                Some(Control::Cancel) | None => return,
            },
            step = produce(connector.as_ref(), &request, &mut chunker) => {
                wanted -= 1;
                let delivered = match step {
                    Ok((data, true)) => {
                        finished = true;
                        rows_sent += data.num_rows();
                        responses.send_batch(
                            Batch::last(data, rows_sent)
                                .with_implicit_close(connector.supports_implicit_close()),
                        )
                    }
                    Ok((data, false)) => {
                        rows_sent += data.num_rows();
                        responses.send_batch(Batch::new(data))
                    }
                    Err(e) => {
                        tracing::warn!(target: "gateway", error = %e, "Connector failed");
                        finished = true;
                        responses.fail(e)
                    }
                };
                if !delivered {
                    return;
                }
                if finished && connector.supports_implicit_close() {
                    return;
                }
            }
        }
    }
}

/// Produces the next fetch-sized chunk, starting the connector on first use.
///
/// Cancel safe: everything pulled so far is kept in the chunker.
async fn produce(
    connector: &dyn Connector,
    request: &SubRequest,
    chunker: &mut Option<Chunker>,
) -> Result<(RecordBatch, bool)> {
    if chunker.is_none() {
        let stream = connector.execute(&request.command).await?;
        *chunker = Some(Chunker::new(stream, request.fetch_size));
    }
    match chunker.as_mut() {
        Some(chunker) => chunker.next_chunk().await,
        None => Err(FerryError::internal("chunker missing after start")),
    }
}

/// Re-slices a record batch stream into chunks of exactly `fetch_size` rows (the
/// last chunk may be shorter).
struct Chunker {
    stream: SendableRecordBatchStream,
    schema: SchemaRef,
    fetch_size: usize,
    pending: VecDeque<RecordBatch>,
    buffered: usize,
    exhausted: bool,
}

impl Chunker {
    fn new(stream: SendableRecordBatchStream, fetch_size: usize) -> Self {
        let schema = stream.schema();
        Self {
            stream,
            schema,
            fetch_size: fetch_size.max(1),
            pending: VecDeque::new(),
            buffered: 0,
            exhausted: false,
        }
    }

    /// Returns the next chunk and whether it is the last one.
    async fn next_chunk(&mut self) -> Result<(RecordBatch, bool)> {
        // One row beyond the fetch size tells whether this chunk is the last.
        while !self.exhausted && self.buffered <= self.fetch_size {
            match self.stream.next().await {
                Some(Ok(batch)) => {
                    if batch.num_rows() > 0 {
                        self.buffered += batch.num_rows();
                        self.pending.push_back(batch);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => self.exhausted = true,
            }
        }

        let chunk = self.take(self.fetch_size.min(self.buffered))?;
        Ok((chunk, self.exhausted && self.buffered == 0))
    }

    fn take(&mut self, rows: usize) -> Result<RecordBatch> {
        let mut parts = Vec::new();
        let mut needed = rows;
        while needed > 0 {
            let Some(front) = self.pending.pop_front() else {
                break;
            };
            if front.num_rows() <= needed {
                needed -= front.num_rows();
                parts.push(front);
            } else {
                parts.push(front.slice(0, needed));
                self.pending
                    .push_front(front.slice(needed, front.num_rows() - needed));
                needed = 0;
            }
        }
        self.buffered -= rows - needed;
        Ok(concat_batches(&self.schema, &parts)?)
    }
}
