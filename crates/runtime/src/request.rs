//! Per-request execution context.
use ferry_common::config::ExecutionSettings;
use ferry_common::warnings::SourceWarnings;
use ferry_common::{RequestId, TransactionHandle};
use ferry_connectors::WorkSignal;

/// Submission-time choices for one request. Defaults come from [`ExecutionSettings`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub session_id: String,
    pub database: String,
    pub database_version: String,
    pub fetch_size: usize,
    /// Decided once here; never re-evaluated per connector error.
    pub partial_results: bool,
    pub transaction: Option<TransactionHandle>,
}

impl RequestOptions {
    pub fn from_settings(settings: &ExecutionSettings) -> Self {
        Self {
            session_id: String::new(),
            database: String::new(),
            database_version: String::new(),
            fetch_size: settings.default_fetch_size,
            partial_results: settings.partial_results,
            transaction: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_database(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.database = name.into();
        self.database_version = version.into();
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn with_partial_results(mut self, partial_results: bool) -> Self {
        self.partial_results = partial_results;
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionHandle) -> Self {
        self.transaction = Some(transaction);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_settings(&ExecutionSettings::default())
    }
}

/// One top-level query execution as seen by the dispatcher.
///
/// `signal` is raised whenever something this request waits on (a batch, a code table
/// load) makes progress. `warnings` collects source failures tolerated in
/// partial-results mode. Both are shared by every clone.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub session_id: String,
    pub database: String,
    pub database_version: String,
    pub fetch_size: usize,
    pub partial_results: bool,
    pub transaction: Option<TransactionHandle>,
    pub signal: WorkSignal,
    pub warnings: SourceWarnings,
}

impl RequestContext {
    pub fn new(request_id: RequestId, options: RequestOptions) -> Self {
        Self {
            request_id,
            session_id: options.session_id,
            database: options.database,
            database_version: options.database_version,
            fetch_size: options.fetch_size.max(1),
            partial_results: options.partial_results,
            transaction: options.transaction,
            signal: WorkSignal::new(),
            warnings: SourceWarnings::new(),
        }
    }

    /// Waits until something this request depends on made progress.
    pub async fn work_available(&self) {
        self.signal.notified().await
    }
}
