//! Error types shared across Rowpipe crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidSetting {
        key: String,
        value: String,
        reason: String,
    },
}
