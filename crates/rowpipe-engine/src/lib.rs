//! Rowpipe Engine Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Row exchange and execution engine for ETL transformations.
//!
//! # Overview
//!
//! A transformation is a graph of steps connected by hops. Every step runs
//! one or more copies, each on its own tokio task, and rows travel between
//! copies over bounded [`RowSet`] queues:
//!
//! - **Rows**: typed values with a shared layout ([`row`])
//! - **Row sets**: bounded FIFO queues with end-of-stream and cooperative
//!   interruption ([`rowset`])
//! - **Steps**: the [`Step`] trait, the per-copy [`StepContext`] and the
//!   worker loop ([`step`]); built-in step types live in [`steps`]
//! - **Engine**: graph validation, wiring and supervision
//!   ([`TransformationEngine`])
//! - **Results**: mergeable [`ExecutionResult`] counters with an XML
//!   exchange format ([`result`])
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_engine::{EngineSettings, TransformationConfig, TransformationEngine};
//!
//! # async fn example() -> rowpipe_engine::Result<()> {
//! let config = TransformationConfig::from_path("orders.yaml")?;
//! let mut engine = TransformationEngine::new(config, EngineSettings::from_env()?);
//! let result = engine.run().await?;
//! println!("{}", result.to_xml());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod result;
pub mod row;
pub mod rowset;
pub mod step;
pub mod steps;

pub use catalog::{InMemoryCatalog, TableCatalog};
pub use config::{EngineSettings, HopConfig, StepConfig, TransformationConfig};
pub use engine::{EngineState, StopHandle, TransformationEngine};
pub use error::{EngineError, Result, RowFormatError, RowSetError, StepError};
pub use result::{ExecutionResult, ResultFile, ResultFileType, ResultXmlError};
pub use row::{Row, RowMeta, Value, ValueMeta, ValueType};
pub use rowset::{RowSet, StepCopy};
pub use step::{BatchOutcome, Distribution, Step, StepContext, StepReport, StepStatus};
pub use steps::{CheckRemark, CheckStatus, StepKind};
