//! Built-in step types
//!
//! Each variant of [`StepKind`] carries the typed options of one step type
//! and knows how to build the [`Step`] that runs it.

pub mod bulk_loader;
pub mod filter;
pub mod generator;
pub mod sink;

pub use bulk_loader::{BulkLoaderConfig, BulkLoaderStep};
pub use filter::{FilterConfig, FilterOperator, FilterStep};
pub use generator::{GeneratorConfig, GeneratorField, GeneratorStep};
pub use sink::{RowsToResultStep, SinkStep};

use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step type and its options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Generator(GeneratorConfig),
    Filter(FilterConfig),
    Sink,
    RowsToResult,
    BulkLoader(BulkLoaderConfig),
}

/// Hop counts a step type accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min_inputs: usize,
    pub max_inputs: Option<usize>,
    pub allows_outputs: bool,
}

impl Arity {
    pub fn accepts_inputs(&self, count: usize) -> bool {
        count >= self.min_inputs && self.max_inputs.is_none_or(|max| count <= max)
    }
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Generator(_) => "generator",
            StepKind::Filter(_) => "filter",
            StepKind::Sink => "sink",
            StepKind::RowsToResult => "rows_to_result",
            StepKind::BulkLoader(_) => "bulk_loader",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            StepKind::Generator(_) => Arity {
                min_inputs: 0,
                max_inputs: Some(0),
                allows_outputs: true,
            },
            StepKind::Filter(_) => Arity {
                min_inputs: 1,
                max_inputs: None,
                allows_outputs: true,
            },
            StepKind::Sink | StepKind::RowsToResult | StepKind::BulkLoader(_) => Arity {
                min_inputs: 1,
                max_inputs: None,
                allows_outputs: false,
            },
        }
    }

    /// Fresh step instance for one copy.
    pub fn build(&self) -> Box<dyn Step> {
        match self {
            StepKind::Generator(config) => Box::new(GeneratorStep::new(config.clone())),
            StepKind::Filter(config) => Box::new(FilterStep::new(config.clone())),
            StepKind::Sink => Box::new(SinkStep),
            StepKind::RowsToResult => Box::new(RowsToResultStep),
            StepKind::BulkLoader(config) => Box::new(BulkLoaderStep::new(config.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warning => "WARNING",
            CheckStatus::Error => "ERROR",
        })
    }
}

/// One finding of a definition check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRemark {
    pub status: CheckStatus,
    pub step: String,
    pub message: String,
}

impl CheckRemark {
    pub fn new(status: CheckStatus, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            step: step.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CheckRemark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.step, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_tagged_by_type() {
        let kind: StepKind = serde_yaml::from_str("type: sink").unwrap();
        assert_eq!(kind, StepKind::Sink);

        let kind: StepKind =
            serde_yaml::from_str("type: generator\nlimit: 5\nsequence_field: id\n").unwrap();
        assert!(matches!(kind, StepKind::Generator(ref g) if g.limit == 5));
        assert_eq!(kind.name(), "generator");
    }

    #[test]
    fn test_arity() {
        let generator = StepKind::Generator(GeneratorConfig::default()).arity();
        assert!(generator.accepts_inputs(0));
        assert!(!generator.accepts_inputs(1));

        let sink = StepKind::Sink.arity();
        assert!(!sink.accepts_inputs(0));
        assert!(sink.accepts_inputs(3));
        assert!(!sink.allows_outputs);
    }
}
