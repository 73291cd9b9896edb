//! Error types for the execution engine
//!
//! Errors are layered the same way the runtime is:
//!
//! - [`RowSetError`]: a blocking queue operation could not complete
//! - [`RowFormatError`]: a row does not match the schema it travels with
//! - [`StepError`]: anything a step reports from `init` or a batch
//! - [`EngineError`]: graph and lifecycle problems raised by the engine itself

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of a blocked `put`/`get` on a row set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowSetError {
    /// Shutdown was requested while the caller was waiting
    #[error("interrupted while waiting on row set '{0}'")]
    Interrupted(String),

    /// The producer already marked the row set done
    #[error("row set '{0}' is done and accepts no more rows")]
    Done(String),
}

/// Schema mismatch between a row and the fields it is read or written with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowFormatError {
    #[error("row has {actual} values but its schema declares {expected} fields")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("rows on '{rowset}' changed layout from [{expected}] to [{actual}]")]
    SchemaChanged {
        rowset: String,
        expected: String,
        actual: String,
    },

    #[error("field '{0}' not found in input row")]
    MissingField(String),

    #[error("field '{field}' holds {actual} where {expected} was expected")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },
}

/// Error reported by a step
#[derive(Error, Debug)]
pub enum StepError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("row format error: {0}")]
    RowFormat(#[from] RowFormatError),

    /// The external loader finished with a warning exit code
    #[error("loader '{program}' finished with warning exit code {code}")]
    ExternalProcessWarning { program: String, code: i32 },

    #[error("loader '{program}' failed: {message}")]
    ExternalProcessError { program: String, message: String },

    /// Cooperative stop observed mid-operation
    #[error("interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error("{0}")]
    Internal(String),
}

impl StepError {
    /// Fatal errors end the step and escalate to the engine.
    ///
    /// Warnings are recorded and processing continues; an interruption ends
    /// the step as stopped, not failed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StepError::ExternalProcessWarning { .. } | StepError::Interrupted
        )
    }

    /// Turn a tolerated warning into a fatal loader error.
    pub fn promote(self) -> Self {
        match self {
            StepError::ExternalProcessWarning { program, code } => {
                StepError::ExternalProcessError {
                    program,
                    message: format!("warning exit code {code} treated as failure"),
                }
            },
            other => other,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        StepError::Internal(msg.into())
    }
}

impl From<RowSetError> for StepError {
    fn from(e: RowSetError) -> Self {
        match e {
            RowSetError::Interrupted(_) => StepError::Interrupted,
            RowSetError::Done(name) => {
                StepError::Internal(format!("write to finished row set '{name}'"))
            },
        }
    }
}

/// Error raised by the transformation engine or while loading definitions
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad graph or wiring, always raised before any worker starts
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("engine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("failed to read transformation definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] rowpipe_common::CommonError),

    #[error("step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_is_not_fatal_until_promoted() {
        let warning = StepError::ExternalProcessWarning {
            program: "sqlldr".into(),
            code: 2,
        };
        assert!(!warning.is_fatal());

        let promoted = warning.promote();
        assert!(promoted.is_fatal());
        assert!(matches!(promoted, StepError::ExternalProcessError { .. }));
    }

    #[test]
    fn test_interrupted_rowset_maps_to_interrupted_step() {
        let err: StepError = RowSetError::Interrupted("a -> b".into()).into();
        assert!(matches!(err, StepError::Interrupted));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_row_format_errors_are_fatal() {
        let err: StepError = RowFormatError::MissingField("id".into()).into();
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "row format error: field 'id' not found in input row"
        );
    }
}
