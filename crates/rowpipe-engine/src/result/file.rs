//! Files produced or consumed by a step

use chrono::{NaiveDateTime, SubsecRound, Utc};
use std::fmt;
use std::path::Path;

/// Timestamp layout used when a result file is exchanged as XML
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultFileType {
    General,
    Log,
    ErrorLine,
    Error,
    Warning,
}

impl ResultFileType {
    pub fn code(&self) -> &'static str {
        match self {
            ResultFileType::General => "GENERAL",
            ResultFileType::Log => "LOG",
            ResultFileType::ErrorLine => "ERRORLINE",
            ResultFileType::Error => "ERROR",
            ResultFileType::Warning => "WARNING",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "GENERAL" => Some(ResultFileType::General),
            "LOG" => Some(ResultFileType::Log),
            "ERRORLINE" => Some(ResultFileType::ErrorLine),
            "ERROR" => Some(ResultFileType::Error),
            "WARNING" => Some(ResultFileType::Warning),
            _ => None,
        }
    }
}

impl fmt::Display for ResultFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One file touched during execution, keyed by its resolved path
#[derive(Debug, Clone, PartialEq)]
pub struct ResultFile {
    pub file_type: ResultFileType,
    pub path: String,
    /// Name of the transformation the step belongs to
    pub parent_origin: Option<String>,
    /// Name of the step that produced the file
    pub origin: Option<String>,
    pub comment: Option<String>,
    /// Millisecond precision, matching the XML form
    pub timestamp: NaiveDateTime,
}

impl ResultFile {
    /// Register `path`, resolving relative paths against the working directory.
    pub fn new(
        file_type: ResultFileType,
        path: impl AsRef<Path>,
        parent_origin: Option<String>,
        origin: Option<String>,
    ) -> Self {
        let path = path.as_ref();
        let resolved = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            file_type,
            path: resolved.display().to_string(),
            parent_origin,
            origin,
            comment: None,
            timestamp: Utc::now().naive_utc().trunc_subsecs(3),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Key under which the file is stored in a result
    pub fn key(&self) -> &str {
        &self.path
    }
}
