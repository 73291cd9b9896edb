//! Rowpipe CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line interface for running and inspecting transformations.
//!
//! - **Run**: execute a transformation file and emit its result (`rowpipe run`)
//! - **Validate**: check a definition's graph without running it (`rowpipe validate`)
//! - **Check**: validate bulk loaders against a table catalog (`rowpipe check`)
//! - **Result**: summarise a stored result XML document (`rowpipe result`)

pub mod catalog;
pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Rowpipe - ETL transformation runner
#[derive(Parser, Debug)]
#[command(name = "rowpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print the CLI reference as markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Output format of a transformation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Result XML document
    #[default]
    Xml,
    /// Counters as JSON
    Json,
    /// One-line summary
    Summary,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a transformation and print its result
    Run {
        /// Transformation definition (.yaml, .yml or .json)
        file: PathBuf,

        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Result format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Xml)]
        format: OutputFormat,

        /// Rows buffered per row set
        #[arg(long, env = "ROWPIPE_ROWSET_SIZE")]
        rowset_size: Option<usize>,

        /// Rows per batch
        #[arg(long, env = "ROWPIPE_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Seconds workers get to stop before they are aborted
        #[arg(long, env = "ROWPIPE_GRACE_PERIOD_SECS")]
        grace_period: Option<u64>,
    },

    /// Validate a transformation definition without running it
    Validate {
        /// Transformation definition (.yaml, .yml or .json)
        file: PathBuf,
    },

    /// Check bulk loaders against target tables
    Check {
        /// Transformation definition (.yaml, .yml or .json)
        file: PathBuf,

        /// YAML or JSON file describing the existing tables
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Also print the DDL the targets need
        #[arg(long)]
        sql: bool,
    },

    /// Summarise a result XML document
    Result {
        /// Result XML file
        file: PathBuf,

        /// Print the counters as JSON
        #[arg(long)]
        json: bool,
    },
}
