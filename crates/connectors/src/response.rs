//! Per-sub-request delivery channel from the gateway back to the runtime.
//!
//! The gateway never calls into runtime objects. It pushes [`ConnectorResponse`]s into
//! a [`ResponseSender`]; the owning stream drains them under its own lock. Every
//! successful push raises the owner's [`WorkSignal`] so a suspended unit of work is
//! rescheduled. Once the receiving side is closed, pushes are dropped on the floor.
use std::sync::Arc;

use ferry_common::{Batch, SubRequestId};
use ferry_error::FerryError;
use tokio::sync::{mpsc, Notify};

/// "More work is available" notification for one unit of work.
///
/// A notification wakes every task currently waiting and also stores a permit, so one
/// raised before anyone waits is not lost. Waiters must tolerate spurious wake-ups.
#[derive(Debug, Clone, Default)]
pub struct WorkSignal(Arc<Notify>);

impl WorkSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_waiters();
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await
    }

    /// Runs `attempt` until it yields a value, sleeping on the signal in between.
    ///
    /// The wait is registered before each attempt, so a notification raised while the
    /// attempt runs wakes this task even if other tasks share the signal.
    pub async fn until_ready<T, E>(
        &self,
        mut attempt: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<T, E> {
        loop {
            let mut notified = std::pin::pin!(self.0.notified());
            notified.as_mut().enable();
            if let Some(value) = attempt()? {
                return Ok(value);
            }
            notified.await;
        }
    }

    pub fn same_as(&self, other: &WorkSignal) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What a connector can deliver for a sub-request.
#[derive(Debug)]
pub enum ConnectorResponse {
    Batch(Batch),
    Failed(FerryError),
}

#[derive(Debug, Clone)]
pub struct ResponseSender {
    sub_request: SubRequestId,
    tx: mpsc::UnboundedSender<ConnectorResponse>,
    signal: WorkSignal,
}

impl ResponseSender {
    pub fn sub_request(&self) -> SubRequestId {
        self.sub_request
    }

    /// Delivers a batch. Returns `false` if the receiver is gone (closed or cancelled).
    pub fn send_batch(&self, batch: Batch) -> bool {
        self.send(ConnectorResponse::Batch(batch))
    }

    /// Delivers a terminal failure. Returns `false` if the receiver is gone.
    pub fn fail(&self, cause: FerryError) -> bool {
        self.send(ConnectorResponse::Failed(cause))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, response: ConnectorResponse) -> bool {
        match self.tx.send(response) {
            Ok(()) => {
                self.signal.notify();
                true
            }
            Err(_) => {
                tracing::trace!(
                    target: "gateway",
                    sub_request = %self.sub_request,
                    "Discarding response for closed sub-request"
                );
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<ConnectorResponse>,
}

impl ResponseReceiver {
    /// Next delivered response, if any. Never waits.
    pub fn try_next(&mut self) -> Option<ConnectorResponse> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting deliveries and discards anything already queued.
    pub fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

pub fn response_channel(
    sub_request: SubRequestId,
    signal: WorkSignal,
) -> (ResponseSender, ResponseReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ResponseSender {
            sub_request,
            tx,
            signal,
        },
        ResponseReceiver { rx },
    )
}
