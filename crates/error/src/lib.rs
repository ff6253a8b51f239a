//! # ferry-error
//!
//! Unified error types for the ferry dispatch runtime.
//!
//! Every failure that crosses a crate boundary is a [`FerryError`] carrying:
//! - A stable numeric code (FERRY-XXXX)
//! - Structured JSON context
//! - An optional hint for the operator
//!
//! Errors are `Clone` so that a recorded failure (for example a failed code table load)
//! can be re-raised verbatim to every later caller.

mod code;
mod context;
mod convert;

pub use code::{ErrorCategory, ErrorCode};
pub use context::ErrorContext;
pub use convert::closest_match;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The unified error type for all ferry operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FerryError {
    /// Numeric error code (e.g., "FERRY-1003")
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Structured context for programmatic handling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,

    /// Suggestion for the caller or operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Correlation ID, usually the request id that observed the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl FerryError {
    /// Create a new error with code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            hint: None,
            trace_id: None,
        }
    }

    /// Add structured context
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Add a hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Add trace ID for correlation
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Shorthand for an invariant violation inside the runtime.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalPanic, message)
    }

    /// Shorthand for a failure reported by a connector while executing a sub-request.
    pub fn connector(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectorFailure, message)
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Serialize to JSON for API responses
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize FerryError: {}", e);
            format!(
                r#"{{"code":"{}","message":"Serialization failed"}}"#,
                self.code
            )
        })
    }

    /// Serialize to pretty JSON for logging
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_json())
    }
}

impl fmt::Display for FerryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (Hint: {})", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for FerryError {}

/// Result type alias for ferry operations
pub type Result<T> = std::result::Result<T, FerryError>;
