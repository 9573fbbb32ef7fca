//! Error types shared by the Pensieve store crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling events and filters.
#[derive(Error, Debug)]
pub enum Error {
    /// Event has an invalid field format (e.g., wrong hex length).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Filter could not be turned into a query.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nostr library error (id or signature verification).
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr::event::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
