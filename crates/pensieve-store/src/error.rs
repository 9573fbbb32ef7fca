//! Error types for the storage layer.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing or querying events.
#[derive(Error, Debug)]
pub enum Error {
    /// ClickHouse error.
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// Event or filter error from the core crate.
    #[error(transparent)]
    Core(#[from] pensieve_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A statement could not be built from a plan.
    #[error("Preparation error: {0}")]
    Preparation(String),

    /// A store call failed.
    #[error("{operation} on {table} failed: {source}")]
    Execution {
        /// Table or view the call targeted.
        table: String,
        /// Operation name (e.g. "query", "insert").
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation name.
        operation: &'static str,
    },

    /// The operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The batch ingestor has shut down.
    #[error("Ingestor is closed")]
    IngestorClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend failure without a more specific type.
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    /// Wrap a store failure with the table and operation it happened on.
    ///
    /// Errors that already carry call context, and preparation errors, are
    /// returned unchanged.
    pub fn execution(table: impl Into<String>, operation: &'static str, source: Error) -> Self {
        match source {
            Error::Execution { .. }
            | Error::Cancelled { .. }
            | Error::Timeout { .. }
            | Error::Preparation(_) => source,
            source => Error::Execution {
                table: table.into(),
                operation,
                source: Box::new(source),
            },
        }
    }
}
