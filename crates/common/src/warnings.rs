//! # Source Warnings
//!
//! Per-request collection of non-fatal source failures.
//!
//! When a request tolerates partial results, a connector failure does not fail the
//! request. The failing stream ends early and a [`SourceWarning`] is recorded here so
//! the submitter can see which sources are missing from the result.

use std::sync::Arc;

use ferry_error::FerryError;
use parking_lot::Mutex;
use serde::Serialize;

use crate::ids::SubRequestId;

/// A source that failed while its request was running in partial-results mode.
#[derive(Debug, Clone, Serialize)]
pub struct SourceWarning {
    pub sub_request: SubRequestId,
    pub model: String,
    pub binding: String,
    pub cause: FerryError,
}

impl std::fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source {} (binding {}) failed for {}: {}",
            self.model, self.binding, self.sub_request, self.cause
        )
    }
}

/// Shared, append-only list of warnings for one request.
#[derive(Debug, Clone, Default)]
pub struct SourceWarnings {
    inner: Arc<Mutex<Vec<SourceWarning>>>,
}

impl SourceWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, warning: SourceWarning) {
        self.inner.lock().push(warning);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<SourceWarning> {
        self.inner.lock().clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn drain(&self) -> Vec<SourceWarning> {
        std::mem::take(&mut *self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{NodeId, RequestId};

    #[test]
    fn test_clones_share_storage() {
        let warnings = SourceWarnings::new();
        let handle = warnings.clone();
        handle.add(SourceWarning {
            sub_request: SubRequestId::new(RequestId(1), NodeId::Plan(0)),
            model: "sales".to_string(),
            binding: "pg".to_string(),
            cause: FerryError::connector("timeout"),
        });

        assert_eq!(warnings.len(), 1);
        assert!(warnings.snapshot()[0].to_string().contains("binding pg"));
        assert_eq!(warnings.drain().len(), 1);
        assert!(handle.is_empty());
    }
}
