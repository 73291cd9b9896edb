//! Error types for the Rowpipe CLI
//!
//! Messages are shown to the user as they are, so each one says what to
//! look at next.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Definition could not be loaded or failed validation
    #[error("Invalid transformation: {0}")]
    Engine(#[from] rowpipe_engine::EngineError),

    /// Stored result document could not be parsed
    #[error("Invalid result document: {0}")]
    ResultXml(#[from] rowpipe_engine::ResultXmlError),

    /// Catalog file has invalid format or content
    #[error("Invalid catalog file '{path}': {message}. Expected a list of tables with their columns.")]
    InvalidCatalog { path: String, message: String },

    /// Some checks reported errors
    #[error("{0} check(s) failed")]
    CheckFailed(usize),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
