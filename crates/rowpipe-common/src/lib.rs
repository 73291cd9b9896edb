//! Rowpipe Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing used by every Rowpipe workspace member:
//!
//! - **Error Handling**: the [`CommonError`] type and its result alias
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Environment**: typed lookups of `ROWPIPE_*` settings
//!
//! # Example
//!
//! ```no_run
//! use rowpipe_common::env::env_or;
//! use rowpipe_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let rowset_size: usize = env_or("ROWPIPE_ROWSET_SIZE", 10_000)?;
//!     tracing::info!(rowset_size, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
