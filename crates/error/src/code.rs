use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following FERRY-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Connector and routing errors
/// - **2000-2999**: Query and stream errors
/// - **3000-3999**: Configuration errors
/// - **5000-5999**: Internal/System errors
/// - **6000-6999**: Code table cache admission errors
///
/// Codes are stable across versions (semver contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Connector Errors (1000-1999) ===
    /// FERRY-1001: Connector binding not configured
    BindingNotFound = 1001,
    /// FERRY-1002: Binding exists but has no usable connector instance
    NoConnectorAvailable = 1002,
    /// FERRY-1003: Connector failed while executing a sub-request
    ConnectorFailure = 1003,
    /// FERRY-1004: Gateway refused to accept a sub-request
    ConnectorRejected = 1004,
    /// FERRY-1005: Connector cannot execute this kind of command
    UnsupportedCommand = 1005,

    // === Query Errors (2000-2999) ===
    /// FERRY-2001: Model not found in catalog
    ModelNotFound = 2001,
    /// FERRY-2002: Field/column not found
    FieldNotFound = 2002,
    /// FERRY-2003: Table not found
    TableNotFound = 2003,
    /// FERRY-2004: Type mismatch in expression
    TypeMismatch = 2004,
    /// FERRY-2005: Plan could not be executed as given
    InvalidPlan = 2005,
    /// FERRY-2008: Query cancelled by user
    QueryCancelled = 2008,
    /// FERRY-2009: Stream read after it was closed
    StreamClosed = 2009,
    /// FERRY-2010: Stream operation not valid in its current state
    InvalidStreamState = 2010,

    // === Configuration Errors (3000-3999) ===
    /// FERRY-3001: Configuration file could not be read or parsed
    InvalidConfig = 3001,
    /// FERRY-3002: Configuration validation failed
    SchemaViolation = 3002,
    /// FERRY-3003: Missing required field in config
    MissingRequiredField = 3003,

    // === Internal Errors (5000-5999) ===
    /// FERRY-5001: Internal DataFusion error
    DataFusionInternal = 5001,
    /// FERRY-5002: Serialization/deserialization failed
    SerializationFailed = 5002,
    /// FERRY-5003: Unexpected internal state
    InternalPanic = 5003,
    /// FERRY-5004: Feature not implemented
    NotImplemented = 5004,
    /// FERRY-5005: No async runtime available to drive background work
    RuntimeUnavailable = 5005,
    /// FERRY-5006: Lookup against a code table that was never loaded
    CodeTableUnknown = 5006,

    // === Code Table Errors (6000-6999) ===
    /// FERRY-6001: Admitting another code table would exceed capacity
    CodeTableOverload = 6001,
    /// FERRY-6002: Code table has more rows than a single table may hold
    CodeTableTooLarge = 6002,

    /// FERRY-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "FERRY-2003")
    pub fn as_str(&self) -> String {
        format!("FERRY-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Connector,
            2000..=2999 => ErrorCategory::Query,
            3000..=3999 => ErrorCategory::Config,
            6000..=6999 => ErrorCategory::Capacity,
            _ => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("FERRY-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::BindingNotFound),
            1002 => Ok(Self::NoConnectorAvailable),
            1003 => Ok(Self::ConnectorFailure),
            1004 => Ok(Self::ConnectorRejected),
            1005 => Ok(Self::UnsupportedCommand),
            2001 => Ok(Self::ModelNotFound),
            2002 => Ok(Self::FieldNotFound),
            2003 => Ok(Self::TableNotFound),
            2004 => Ok(Self::TypeMismatch),
            2005 => Ok(Self::InvalidPlan),
            2008 => Ok(Self::QueryCancelled),
            2009 => Ok(Self::StreamClosed),
            2010 => Ok(Self::InvalidStreamState),
            3001 => Ok(Self::InvalidConfig),
            3002 => Ok(Self::SchemaViolation),
            3003 => Ok(Self::MissingRequiredField),
            5001 => Ok(Self::DataFusionInternal),
            5002 => Ok(Self::SerializationFailed),
            5003 => Ok(Self::InternalPanic),
            5004 => Ok(Self::NotImplemented),
            5005 => Ok(Self::RuntimeUnavailable),
            5006 => Ok(Self::CodeTableUnknown),
            6001 => Ok(Self::CodeTableOverload),
            6002 => Ok(Self::CodeTableTooLarge),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Connector,
    Query,
    Config,
    Capacity,
    Internal,
}
