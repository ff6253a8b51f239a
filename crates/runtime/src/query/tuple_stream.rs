//! Pull cursor over one sub-request's connector output.
//!
//! A [`TupleStream`] keeps at most one batch request outstanding and prefetches one
//! batch ahead of the consumer: whenever a non-final batch becomes current, the batch
//! after it is requested immediately. Batches and failures delivered by the gateway
//! sit in the sub-request's response channel until the next call into the stream
//! applies them under the stream's lock.
//!
//! ```text
//! Unopened -> AwaitingFirst -> Ready <-> AwaitingNext -> Drained
//!                  (any non-terminal) -> Closed | Failed
//! ```
use std::sync::Arc;

use datafusion::arrow::datatypes::Schema;
use ferry_common::warnings::{SourceWarning, SourceWarnings};
use ferry_common::{Batch, ConnectorHandle, Row, SubRequest, SubRequestId};
use ferry_connectors::{response_channel, ConnectorResponse, ResponseReceiver, WorkSignal};
use ferry_error::{ErrorCode, ErrorContext, FerryError, Result};
use futures::Stream;
use parking_lot::Mutex;

use crate::dispatcher::Dispatcher;
use crate::query::Pull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Unopened,
    AwaitingFirst,
    Ready,
    AwaitingNext,
    Drained,
    Closed,
    Failed,
}

/// How a stream reacts to failures and whom it wakes.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub partial_results: bool,
    pub signal: WorkSignal,
    pub warnings: SourceWarnings,
}

#[derive(Debug)]
struct Cursor {
    batch: Batch,
    position: usize,
}

impl Cursor {
    fn remaining(&self) -> usize {
        self.batch.num_rows() - self.position
    }
}

#[derive(Debug)]
struct StreamState {
    status: StreamStatus,
    request: Option<SubRequest>,
    responses: Option<ResponseReceiver>,
    current: Option<Cursor>,
    next: Option<Batch>,
    outstanding: bool,
    rows_delivered: usize,
    rows_received: usize,
    error: Option<FerryError>,
    implicit_close: bool,
    gateway_closed: bool,
    cancelled: bool,
}

impl StreamState {
    fn final_received(&self) -> bool {
        self.next.as_ref().is_some_and(Batch::is_final)
            || self.current.as_ref().is_some_and(|c| c.batch.is_final())
    }
}

pub struct TupleStream {
    id: SubRequestId,
    model: String,
    binding: String,
    handle: ConnectorHandle,
    dispatcher: Arc<Dispatcher>,
    partial_results: bool,
    signal: WorkSignal,
    warnings: SourceWarnings,
    state: Mutex<StreamState>,
}

impl std::fmt::Debug for TupleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleStream")
            .field("id", &self.id)
            .field("connector", &self.handle)
            .field("status", &self.status())
            .finish()
    }
}

impl TupleStream {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        request: SubRequest,
        handle: ConnectorHandle,
        options: StreamOptions,
    ) -> Self {
        Self {
            id: request.id,
            model: request.model.clone(),
            binding: request.binding.clone(),
            handle,
            dispatcher,
            partial_results: options.partial_results,
            signal: options.signal,
            warnings: options.warnings,
            state: Mutex::new(StreamState {
                status: StreamStatus::Unopened,
                request: Some(request),
                responses: None,
                current: None,
                next: None,
                outstanding: false,
                rows_delivered: 0,
                rows_received: 0,
                error: None,
                implicit_close: false,
                gateway_closed: false,
                cancelled: false,
            }),
        }
    }

    pub fn id(&self) -> SubRequestId {
        self.id
    }

    pub fn connector(&self) -> &ConnectorHandle {
        &self.handle
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    /// Rows handed to the consumer so far. Never decreases.
    pub fn rows_delivered(&self) -> usize {
        self.state.lock().rows_delivered
    }

    /// Issues the execute call, which also requests the first batch.
    pub fn open(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let request = match (state.status, state.request.take()) {
            (StreamStatus::Unopened, Some(request)) => request,
            (status, _) => {
                return Err(FerryError::new(
                    ErrorCode::InvalidStreamState,
                    format!("Stream {} cannot be opened in state {:?}", self.id, status),
                ))
            }
        };

        let (sender, receiver) = response_channel(self.id, self.signal.clone());
        state.responses = Some(receiver);
        state.outstanding = true;
        state.status = StreamStatus::AwaitingFirst;

        tracing::debug!(
            target: "stream",
            sub_request = %self.id,
            connector = %self.handle,
            command = %request.command,
            "Opening stream"
        );

        if let Err(e) = self.dispatcher.execute(request, &self.handle, sender) {
            state.outstanding = false;
            state.status = StreamStatus::Failed;
            if let Some(mut receiver) = state.responses.take() {
                receiver.close();
            }
            return Err(match e.context {
                Some(_) => e,
                None => e.with_context(self.error_context()),
            });
        }
        Ok(())
    }

    /// Returns the next row without waiting.
    pub fn next(&self) -> Result<Pull<Row>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match self.advance(state)? {
            Pull::Ready(()) => {
                let Some(cursor) = state.current.as_mut() else {
                    return Err(FerryError::internal("ready stream without a current batch"));
                };
                let row = cursor.batch.row(cursor.position)?;
                cursor.position += 1;
                state.rows_delivered += 1;
                Ok(Pull::Ready(row))
            }
            Pull::WouldBlock => Ok(Pull::WouldBlock),
            Pull::EndOfStream => Ok(Pull::EndOfStream),
        }
    }

    /// Returns every unread row of the current batch at once, with the same prefetch
    /// behavior as [`next`](Self::next). The returned batch keeps its final marker.
    pub fn next_batch(&self) -> Result<Pull<Batch>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match self.advance(state)? {
            Pull::Ready(()) => {
                let Some(cursor) = state.current.as_mut() else {
                    return Err(FerryError::internal("ready stream without a current batch"));
                };
                let remaining = cursor.remaining();
                let batch = cursor.batch.slice(cursor.position, remaining);
                cursor.position += remaining;
                state.rows_delivered += remaining;
                Ok(Pull::Ready(batch))
            }
            Pull::WouldBlock => Ok(Pull::WouldBlock),
            Pull::EndOfStream => Ok(Pull::EndOfStream),
        }
    }

    /// Waits for the next row. `None` at end of stream.
    pub async fn next_row(&self) -> Result<Option<Row>> {
        self.signal
            .until_ready(|| -> Result<Option<Option<Row>>> {
                match self.next()? {
                    Pull::Ready(row) => Ok(Some(Some(row))),
                    Pull::EndOfStream => Ok(Some(None)),
                    Pull::WouldBlock => Ok(None),
                }
            })
            .await
    }

    /// Consumes the stream as an async stream of rows. Ends after the first error.
    pub fn into_rows(self) -> impl Stream<Item = Result<Row>> + Send {
        futures::stream::unfold((self, false), |(stream, failed)| async move {
            if failed {
                return None;
            }
            match stream.next_row().await {
                Ok(Some(row)) => Some((Ok(row), (stream, false))),
                Ok(None) => None,
                Err(e) => Some((Err(e), (stream, true))),
            }
        })
    }

    /// Orderly teardown. The explicit close is skipped when the connector already
    /// closed the sub-request on its own after the final batch.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.status {
            StreamStatus::Closed => return Ok(()),
            StreamStatus::Unopened => {
                state.status = StreamStatus::Closed;
                return Ok(());
            }
            _ => {}
        }

        self.drain(state);
        let result = if state.gateway_closed || state.implicit_close {
            Ok(())
        } else {
            state.gateway_closed = true;
            self.dispatcher.close_sub_request(&self.id, &self.handle)
        };
        Self::teardown(state);
        tracing::debug!(
            target: "stream",
            sub_request = %self.id,
            rows = state.rows_delivered,
            "Stream closed"
        );
        result
    }

    /// Advisory cancel. Local state is torn down immediately and anything the
    /// connector delivers afterwards is discarded.
    pub fn cancel(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.status == StreamStatus::Closed {
            return;
        }
        let opened = state.status != StreamStatus::Unopened;
        state.cancelled = true;
        Self::teardown(state);

        if opened && !state.gateway_closed && !state.implicit_close {
            state.gateway_closed = true;
            if let Err(e) = self.dispatcher.cancel_sub_request(&self.id, &self.handle) {
                tracing::debug!(target: "stream", sub_request = %self.id, error = %e, "Cancel not delivered");
            }
        }
        tracing::debug!(target: "stream", sub_request = %self.id, "Stream cancelled");
    }

    fn teardown(state: &mut StreamState) {
        state.status = StreamStatus::Closed;
        state.outstanding = false;
        state.current = None;
        state.next = None;
        if let Some(mut receiver) = state.responses.take() {
            receiver.close();
        }
    }

    fn ensure_usable(&self, state: &StreamState) -> Result<()> {
        match state.status {
            StreamStatus::Unopened => Err(FerryError::new(
                ErrorCode::InvalidStreamState,
                format!("Stream {} was not opened", self.id),
            )),
            StreamStatus::Closed if state.cancelled => Err(FerryError::new(
                ErrorCode::QueryCancelled,
                format!("Stream {} was cancelled", self.id),
            )),
            StreamStatus::Closed => Err(FerryError::new(
                ErrorCode::StreamClosed,
                format!("Stream {} is closed", self.id),
            )),
            _ => Ok(()),
        }
    }

    /// Makes unread rows current if possible. Buffered rows always come before a
    /// stored failure.
    fn advance(&self, state: &mut StreamState) -> Result<Pull<()>> {
        self.ensure_usable(state)?;
        self.drain(state);

        loop {
            if let Some(cursor) = &state.current {
                if cursor.remaining() > 0 {
                    state.status = StreamStatus::Ready;
                    return Ok(Pull::Ready(()));
                }
                if cursor.batch.is_final() {
                    state.status = StreamStatus::Drained;
                    return Ok(Pull::EndOfStream);
                }
            }

            if let Some(batch) = state.next.take() {
                let is_final = batch.is_final();
                state.current = Some(Cursor { batch, position: 0 });
                if !is_final {
                    self.request_next(state);
                }
                continue;
            }

            if let Some(cause) = &state.error {
                state.status = StreamStatus::Failed;
                return Err(cause.clone());
            }

            if !state.outstanding {
                if state.gateway_closed {
                    state.error = Some(FerryError::new(
                        ErrorCode::StreamClosed,
                        format!("Stream {} ended without a final batch", self.id),
                    ));
                    continue;
                }
                self.request_next(state);
                // A refused request ends the stream one way or the other.
                if !state.outstanding {
                    continue;
                }
            }
            if state.status != StreamStatus::AwaitingFirst {
                state.status = StreamStatus::AwaitingNext;
            }
            tracing::trace!(target: "stream", sub_request = %self.id, "Waiting for batch");
            return Ok(Pull::WouldBlock);
        }
    }

    fn request_next(&self, state: &mut StreamState) {
        if state.outstanding || state.gateway_closed {
            return;
        }
        state.outstanding = true;
        if let Err(e) = self.dispatcher.request_next_batch(&self.id, &self.handle) {
            self.receive_failure(state, e);
        }
    }

    /// Applies everything the gateway delivered since the last call.
    fn drain(&self, state: &mut StreamState) {
        loop {
            let Some(receiver) = state.responses.as_mut() else {
                return;
            };
            let Some(response) = receiver.try_next() else {
                return;
            };
            match response {
                ConnectorResponse::Batch(batch) => self.receive_batch(state, batch),
                ConnectorResponse::Failed(cause) => self.receive_failure(state, cause),
            }
        }
    }

    fn receive_batch(&self, state: &mut StreamState, batch: Batch) {
        if batch.is_request_closed() {
            tracing::debug!(target: "stream", sub_request = %self.id, "Connector closed sub-request");
            state.gateway_closed = true;
            if let Some(mut receiver) = state.responses.take() {
                receiver.close();
            }
            if !state.final_received() && state.error.is_none() {
                self.receive_failure(
                    state,
                    FerryError::new(
                        ErrorCode::StreamClosed,
                        format!("Connector closed {} before its final batch", self.id),
                    ),
                );
            }
            return;
        }

        if state.next.is_some() {
            self.receive_failure(
                state,
                FerryError::new(
                    ErrorCode::InvalidStreamState,
                    format!("Connector delivered an unrequested batch for {}", self.id),
                ),
            );
            return;
        }

        state.outstanding = false;
        state.rows_received += batch.num_rows();
        if let Some(last_row) = batch.last_row() {
            state.implicit_close = batch.supports_implicit_close();
            if last_row != state.rows_received {
                tracing::warn!(
                    target: "stream",
                    sub_request = %self.id,
                    last_row,
                    received = state.rows_received,
                    "Final row index does not match rows received"
                );
            }
        }
        state.next = Some(batch);
    }

    fn receive_failure(&self, state: &mut StreamState, cause: FerryError) {
        state.outstanding = false;
        if state.final_received() {
            tracing::debug!(target: "stream", sub_request = %self.id, error = %cause, "Ignoring failure after final batch");
            return;
        }

        if self.partial_results {
            tracing::warn!(
                target: "stream",
                sub_request = %self.id,
                model = %self.model,
                binding = %self.binding,
                error = %cause,
                "Source failed, continuing with partial results"
            );
            let rows = state.rows_received;
            state.next = Some(match state.next.take() {
                Some(batch) => batch.with_last_row(rows),
                None => {
                    let schema = state
                        .current
                        .as_ref()
                        .map(|c| c.batch.schema())
                        .unwrap_or_else(|| Arc::new(Schema::empty()));
                    Batch::empty_final(schema, rows)
                }
            });
            self.warnings.add(SourceWarning {
                sub_request: self.id,
                model: self.model.clone(),
                binding: self.binding.clone(),
                cause,
            });
        } else {
            tracing::warn!(
                target: "stream",
                sub_request = %self.id,
                error = %cause,
                "Source failed"
            );
            state.error = Some(cause.with_trace_id(self.id.to_string()));
        }

        if !state.gateway_closed {
            state.gateway_closed = true;
            if let Err(e) = self.dispatcher.close_sub_request(&self.id, &self.handle) {
                tracing::debug!(target: "stream", sub_request = %self.id, error = %e, "Close after failure not delivered");
            }
        }
    }

    fn error_context(&self) -> ErrorContext {
        ErrorContext::Connector {
            model: self.model.clone(),
            binding: self.binding.clone(),
            sub_request: Some(self.id.to_string()),
        }
    }
}

impl Drop for TupleStream {
    fn drop(&mut self) {
        let open = !matches!(
            self.state.lock().status,
            StreamStatus::Unopened | StreamStatus::Closed
        );
        if open {
            if let Err(e) = self.close() {
                tracing::debug!(target: "stream", sub_request = %self.id, error = %e, "Close on drop failed");
            }
        }
    }
}
