//! Bulk loader settings

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Defaults
// ============================================================================

/// Loader executable invoked when none is configured.
pub const DEFAULT_LOADER: &str = "sqlldr";

/// Control file name; `${copy_nr}` is replaced by the step copy number.
pub const DEFAULT_CONTROL_FILE: &str = "control${copy_nr}.cfg";

/// Data file name; `${copy_nr}` is replaced by the step copy number.
pub const DEFAULT_DATA_FILE: &str = "load${copy_nr}.dat";

/// Rows per commit.
pub const DEFAULT_COMMIT_SIZE: u64 = 100_000;

/// Rejected rows tolerated by the loader before it gives up.
pub const DEFAULT_MAX_ERRORS: u64 = 50;

/// Placeholder substituted in file names
pub const COPY_NR_PLACEHOLDER: &str = "${copy_nr}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadMethod {
    /// Loader runs while rows arrive, reading them from stdin
    AutoConcurrent,
    /// Rows go to the data file; the loader runs once input ends
    #[default]
    AutoEnd,
    /// Control and data files are written, the loader is not run
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadAction {
    #[default]
    Append,
    Insert,
    Replace,
    Truncate,
}

impl LoadAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadAction::Append => "APPEND",
            LoadAction::Insert => "INSERT",
            LoadAction::Replace => "REPLACE",
            LoadAction::Truncate => "TRUNCATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateMask {
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "DATETIME")]
    DateTime,
}

impl DateMask {
    /// Layout used when writing date values to the data file
    pub fn data_format(&self) -> &'static str {
        match self {
            DateMask::Date => "%Y-%m-%d",
            DateMask::DateTime => "%Y-%m-%d %H:%M:%S%.3f",
        }
    }

    /// Column clause in the control file
    pub fn control_clause(&self) -> &'static str {
        match self {
            DateMask::Date => "DATE 'yyyy-mm-dd'",
            DateMask::DateTime => "TIMESTAMP 'yyyy-mm-dd hh24:mi:ss.ff'",
        }
    }
}

/// Stream field to table column pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub stream_field: String,
    #[serde(default)]
    pub table_field: Option<String>,
    #[serde(default)]
    pub date_mask: Option<DateMask>,
}

impl FieldMapping {
    pub fn new(stream_field: impl Into<String>) -> Self {
        Self {
            stream_field: stream_field.into(),
            table_field: None,
            date_mask: None,
        }
    }

    /// Target column; the stream field name unless renamed
    pub fn table_field(&self) -> &str {
        self.table_field.as_deref().unwrap_or(&self.stream_field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConnection {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

/// How the loader's exit code is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCodes {
    #[serde(default = "default_ok_codes")]
    pub ok: Vec<i32>,
    #[serde(default = "default_warning_codes")]
    pub warning: Vec<i32>,
}

fn default_ok_codes() -> Vec<i32> {
    vec![0]
}

fn default_warning_codes() -> Vec<i32> {
    vec![2]
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            ok: default_ok_codes(),
            warning: default_warning_codes(),
        }
    }
}

impl ExitCodes {
    pub fn classify(&self, code: i32) -> ExitClass {
        if self.ok.contains(&code) {
            ExitClass::Ok
        } else if self.warning.contains(&code) {
            ExitClass::Warning
        } else {
            ExitClass::Error
        }
    }
}

fn default_loader() -> String {
    DEFAULT_LOADER.to_string()
}

fn default_control_file() -> String {
    DEFAULT_CONTROL_FILE.to_string()
}

fn default_data_file() -> String {
    DEFAULT_DATA_FILE.to_string()
}

fn default_commit_size() -> u64 {
    DEFAULT_COMMIT_SIZE
}

fn default_max_errors() -> u64 {
    DEFAULT_MAX_ERRORS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkLoaderConfig {
    #[serde(default)]
    pub schema: String,
    pub table: String,

    #[serde(default = "default_loader")]
    pub loader: String,
    /// Passed to the loader ahead of the generated arguments
    #[serde(default)]
    pub loader_args: Vec<String>,

    #[serde(default = "default_control_file")]
    pub control_file: String,
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub bad_file: Option<String>,
    #[serde(default)]
    pub discard_file: Option<String>,

    #[serde(default)]
    pub load_method: LoadMethod,
    #[serde(default)]
    pub load_action: LoadAction,

    #[serde(default = "default_commit_size")]
    pub commit_size: u64,
    #[serde(default)]
    pub bind_size: u64,
    #[serde(default)]
    pub read_size: u64,
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,

    #[serde(default)]
    pub direct_path: bool,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_true")]
    pub erase_files: bool,
    #[serde(default)]
    pub fail_on_warning: bool,

    /// Encoding of the data file; only UTF-8 is written
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub character_set: Option<String>,
    #[serde(default)]
    pub db_name_override: Option<String>,
    /// Record terminator in place of the newline
    #[serde(default)]
    pub alt_record_term: Option<String>,

    #[serde(default)]
    pub connection: LoaderConnection,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub exit_codes: ExitCodes,
}

impl BulkLoaderConfig {
    /// Configuration with defaults for everything but the target table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            schema: String::new(),
            table: table.into(),
            loader: default_loader(),
            loader_args: Vec::new(),
            control_file: default_control_file(),
            data_file: default_data_file(),
            log_file: None,
            bad_file: None,
            discard_file: None,
            load_method: LoadMethod::default(),
            load_action: LoadAction::default(),
            commit_size: DEFAULT_COMMIT_SIZE,
            bind_size: 0,
            read_size: 0,
            max_errors: DEFAULT_MAX_ERRORS,
            direct_path: false,
            parallel: false,
            erase_files: true,
            fail_on_warning: false,
            encoding: None,
            character_set: None,
            db_name_override: None,
            alt_record_term: None,
            connection: LoaderConnection::default(),
            mappings: Vec::new(),
            exit_codes: ExitCodes::default(),
        }
    }

    pub fn validate(&self) -> Result<(), StepError> {
        if self.table.trim().is_empty() {
            return Err(StepError::Configuration(
                "bulk loader needs a target table".into(),
            ));
        }
        if self.mappings.is_empty() {
            return Err(StepError::Configuration(format!(
                "bulk loader for '{}' maps no fields",
                self.table
            )));
        }
        if self.load_method != LoadMethod::Manual && self.loader.trim().is_empty() {
            return Err(StepError::Configuration(
                "bulk loader needs a loader command".into(),
            ));
        }
        if let Some(encoding) = self.encoding.as_deref().filter(|e| !e.is_empty()) {
            let normalized = encoding.to_ascii_uppercase().replace('-', "");
            if normalized != "UTF8" {
                return Err(StepError::Configuration(format!(
                    "data files are written as UTF-8, not '{encoding}'"
                )));
            }
        }
        if self.control_file.trim().is_empty() {
            return Err(StepError::Configuration(
                "bulk loader needs a control file name".into(),
            ));
        }
        if self.load_method != LoadMethod::AutoConcurrent && self.data_file.trim().is_empty() {
            return Err(StepError::Configuration(
                "bulk loader needs a data file name".into(),
            ));
        }
        Ok(())
    }

    pub fn control_path(&self, copy_nr: usize) -> PathBuf {
        PathBuf::from(substitute_copy_nr(&self.control_file, copy_nr))
    }

    pub fn data_path(&self, copy_nr: usize) -> PathBuf {
        PathBuf::from(substitute_copy_nr(&self.data_file, copy_nr))
    }

    pub fn log_path(&self, copy_nr: usize) -> Option<PathBuf> {
        optional_path(&self.log_file, copy_nr)
    }

    pub fn bad_path(&self, copy_nr: usize) -> Option<PathBuf> {
        optional_path(&self.bad_file, copy_nr)
    }

    pub fn discard_path(&self, copy_nr: usize) -> Option<PathBuf> {
        optional_path(&self.discard_file, copy_nr)
    }
}

fn optional_path(name: &Option<String>, copy_nr: usize) -> Option<PathBuf> {
    name.as_deref()
        .filter(|n| !n.trim().is_empty())
        .map(|n| PathBuf::from(substitute_copy_nr(n, copy_nr)))
}

/// Replace every `${copy_nr}` in `name`.
pub fn substitute_copy_nr(name: &str, copy_nr: usize) -> String {
    name.replace(COPY_NR_PLACEHOLDER, &copy_nr.to_string())
}
