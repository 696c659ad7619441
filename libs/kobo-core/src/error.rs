//! Error types for kobo-core.

use thiserror::Error;

/// Result type alias using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core parsing rules.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid part pattern '{pattern}': {reason}")]
    InvalidPartPattern { pattern: String, reason: String },

    #[error("unknown content type: {0}")]
    UnknownContentType(String),
}
