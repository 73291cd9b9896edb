//! Execution outcome of one unit of work (step copy, transformation)
//!
//! An [`ExecutionResult`] is owned and mutated by exactly one worker while
//! it runs. Parents build their own result by folding finished children
//! with [`ExecutionResult::add`].

mod file;
pub mod xml;

pub use file::{ResultFile, ResultFileType, TIMESTAMP_FORMAT};
pub use xml::ResultXmlError;

use crate::row::Row;
use std::collections::BTreeMap;
use std::fmt;

/// Counters, outcome flags, result rows and files of one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub lines_input: u64,
    pub lines_output: u64,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_updated: u64,
    pub lines_deleted: u64,
    pub lines_rejected: u64,
    pub nr_errors: u64,
    pub nr_files_retrieved: u64,
    pub entry_nr: u64,

    /// Overall success flag; callers inspect this rather than relying on errors
    pub result: bool,
    pub exit_status: i32,
    pub stopped: bool,

    pub log_channel_id: Option<String>,
    pub log_text: Option<String>,

    pub rows: Vec<Row>,
    /// Keyed by resolved path; a later insert under the same path wins
    pub result_files: BTreeMap<String, ResultFile>,
}

impl ExecutionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_nr(entry_nr: u64) -> Self {
        Self {
            entry_nr,
            ..Self::default()
        }
    }

    /// Fold `other` into `self`.
    ///
    /// Counters are summed, files merged, rows appended. `log_channel_id`
    /// and `log_text` are replaced by `other`'s values, so unlike the rest
    /// of the fold they depend on the order of additions. The outcome flags
    /// (`result`, `exit_status`, `stopped`, `entry_nr`) are left untouched.
    pub fn add(&mut self, other: &ExecutionResult) {
        self.lines_input += other.lines_input;
        self.lines_output += other.lines_output;
        self.lines_read += other.lines_read;
        self.lines_written += other.lines_written;
        self.lines_updated += other.lines_updated;
        self.lines_rejected += other.lines_rejected;
        self.lines_deleted += other.lines_deleted;
        self.nr_errors += other.nr_errors;
        self.nr_files_retrieved += other.nr_files_retrieved;
        self.result_files.extend(
            other
                .result_files
                .iter()
                .map(|(key, file)| (key.clone(), file.clone())),
        );
        self.log_channel_id = other.log_channel_id.clone();
        self.log_text = other.log_text.clone();
        self.rows.extend(other.rows.iter().cloned());
    }

    /// Reset the counters and the log text.
    pub fn clear(&mut self) {
        self.lines_input = 0;
        self.lines_output = 0;
        self.lines_read = 0;
        self.lines_written = 0;
        self.lines_updated = 0;
        self.lines_rejected = 0;
        self.lines_deleted = 0;
        self.nr_errors = 0;
        self.nr_files_retrieved = 0;
        self.log_text = None;
    }

    pub fn add_result_file(&mut self, file: ResultFile) {
        self.result_files.insert(file.key().to_string(), file);
    }

    pub fn result_files_list(&self) -> Vec<&ResultFile> {
        self.result_files.values().collect()
    }

    /// Append one line to the log text.
    pub fn append_log(&mut self, line: impl AsRef<str>) {
        match self.log_text {
            Some(ref mut text) => {
                text.push('\n');
                text.push_str(line.as_ref());
            },
            None => self.log_text = Some(line.as_ref().to_string()),
        }
    }

    /// Human-readable read/write throughput, `None` when nothing moved or
    /// `seconds` is zero.
    pub fn read_write_throughput(&self, seconds: u64) -> Option<String> {
        if seconds == 0 {
            return None;
        }
        let read = (self.lines_read > 0).then(|| {
            format!(
                "lines read: {} ( {} lines/s)",
                self.lines_read,
                self.lines_read / seconds
            )
        });
        let written = (self.lines_written > 0).then(|| {
            format!(
                "lines written: {} ( {} lines/s)",
                self.lines_written,
                self.lines_written / seconds
            )
        });
        match (read, written) {
            (None, None) => None,
            (Some(r), None) => Some(format!("Transformation {r}")),
            (None, Some(w)) => Some(format!("Transformation {w}")),
            (Some(r), Some(w)) => Some(format!("Transformation {r}; {w}")),
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nr={}, errors={}, exit_status={}",
            self.entry_nr, self.nr_errors, self.exit_status
        )?;
        if self.stopped {
            write!(f, " (Stopped)")
        } else {
            write!(f, ", result={}", self.result)
        }
    }
}
