//! The downstream interface the runtime uses to reach connectors.
use ferry_common::{ConnectorHandle, SubRequest, SubRequestId};
use ferry_error::Result;

use crate::response::ResponseSender;

/// Executes, pages, closes and cancels sub-requests on connector instances.
///
/// Every method must return promptly: results arrive later through the
/// [`ResponseSender`] handed to [`execute`](ConnectorGateway::execute), possibly from
/// another thread. Implementations must tolerate `close`, `cancel` and
/// `request_next_batch` for sub-requests they no longer track.
pub trait ConnectorGateway: Send + Sync {
    /// Picks a connector instance for `binding`. May return a different instance on
    /// every call.
    fn select_connector(&self, binding: &str) -> Result<ConnectorHandle>;

    /// Starts the sub-request. Acts as the request for the first batch.
    fn execute(
        &self,
        request: SubRequest,
        handle: &ConnectorHandle,
        responses: ResponseSender,
    ) -> Result<()>;

    /// Asks for the batch after the last one delivered.
    fn request_next_batch(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()>;

    /// Orderly close; acknowledged with a request-closed batch.
    fn close(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()>;

    /// Advisory cancel; nothing further is delivered for `id`.
    fn cancel(&self, id: &SubRequestId, handle: &ConnectorHandle) -> Result<()>;
}
