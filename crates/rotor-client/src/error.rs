//! Error types for the execution engine.

use std::fmt;
use thiserror::Error;

/// Opaque failure reported by the driver session.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid configuration: bad slot index, non-positive shard range,
    /// statement table not matching the rotation.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The requested execution mode cannot serve this query.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// More than one row matched an at-most-one query across shards.
    #[error("too many results from {query}: {count} rows across shards")]
    CardinalityViolation {
        /// The query text.
        query: String,
        /// Number of decoded rows.
        count: usize,
    },

    /// The driver session failed.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),

    /// The binder was mutated after execution started.
    #[error("query already executed; bindings are frozen")]
    AlreadyExecuted,

    /// A worker task panicked or was dropped by runtime shutdown.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ClientError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Configuration(_) => ErrorCode::Configuration,
            ClientError::Unsupported(_) => ErrorCode::Unsupported,
            ClientError::CardinalityViolation { .. } => ErrorCode::CardinalityViolation,
            ClientError::Backend(_) => ErrorCode::Backend,
            ClientError::AlreadyExecuted => ErrorCode::AlreadyExecuted,
            ClientError::Worker(_) => ErrorCode::Worker,
        }
    }

    /// Returns true if an outer collaborator may retry the call.
    ///
    /// The engine itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Backend(_))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        ClientError::Configuration(message.into())
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error codes for programmatic handling. Stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Usage errors (0x0100 - 0x01FF)
    /// Invalid configuration.
    Configuration = 0x0100,
    /// Unsupported execution mode.
    Unsupported = 0x0101,
    /// Binder mutated after execution.
    AlreadyExecuted = 0x0102,

    // Data errors (0x0200 - 0x02FF)
    /// Cardinality violation across shards.
    CardinalityViolation = 0x0200,

    // Runtime errors (0x0300 - 0x03FF)
    /// Driver failure.
    Backend = 0x0300,
    /// Worker task failure.
    Worker = 0x0301,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x01 => "Usage",
            0x02 => "Data",
            0x03 => "Runtime",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
