//! Loader control file and data record encoding

use super::config::{BulkLoaderConfig, DateMask, FieldMapping, LoadMethod};
use crate::catalog::qualified_name;
use crate::error::{RowFormatError, StepError};
use crate::row::{Row, RowMeta, Value};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Text of the control file describing one load.
pub fn control_file_contents(
    config: &BulkLoaderConfig,
    data_file: &Path,
    bad_file: Option<&Path>,
    discard_file: Option<&Path>,
) -> String {
    let mut out = String::new();

    out.push_str("OPTIONS(\n");
    let _ = writeln!(out, "  ERRORS='{}'", config.max_errors);
    if config.commit_size > 0 {
        let _ = writeln!(out, "  , ROWS='{}'", config.commit_size);
    }
    if config.bind_size > 0 {
        let _ = writeln!(out, "  , BINDSIZE='{}'", config.bind_size);
    }
    if config.read_size > 0 {
        let _ = writeln!(out, "  , READSIZE='{}'", config.read_size);
    }
    if config.direct_path {
        out.push_str("  , DIRECT=TRUE\n");
    }
    if config.parallel {
        out.push_str("  , PARALLEL=TRUE\n");
    }
    out.push_str(")\n");

    out.push_str("LOAD DATA\n");
    if let Some(charset) = config.character_set.as_deref().filter(|c| !c.is_empty()) {
        let _ = writeln!(out, "CHARACTERSET {charset}");
    }

    let infile = match config.load_method {
        LoadMethod::AutoConcurrent => "-".to_string(),
        LoadMethod::AutoEnd | LoadMethod::Manual => data_file.display().to_string(),
    };
    let _ = write!(out, "INFILE '{infile}'");
    if let Some(term) = config.alt_record_term.as_deref().filter(|t| !t.is_empty()) {
        let _ = write!(out, " \"STR x'{}'\"", hex::encode(term.as_bytes()));
    }
    out.push('\n');

    if let Some(bad) = bad_file {
        let _ = writeln!(out, "BADFILE '{}'", bad.display());
    }
    if let Some(discard) = discard_file {
        let _ = writeln!(out, "DISCARDFILE '{}'", discard.display());
    }

    let _ = writeln!(
        out,
        "INTO TABLE {}",
        qualified_name(&config.schema, &config.table)
    );
    out.push_str(config.load_action.as_str());
    out.push('\n');
    out.push_str("FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"'\n");

    out.push_str("(\n");
    let columns = config
        .mappings
        .iter()
        .map(column_clause)
        .collect::<Vec<_>>()
        .join(",\n");
    out.push_str(&columns);
    out.push_str("\n)\n");
    out
}

fn column_clause(mapping: &FieldMapping) -> String {
    match mapping.date_mask {
        Some(mask) => format!("{} {}", mapping.table_field(), mask.control_clause()),
        None => mapping.table_field().to_string(),
    }
}

/// Turns rows into delimited data records for the loader
pub struct RecordEncoder {
    mappings: Vec<FieldMapping>,
    terminator: String,
    layout: Option<(Arc<RowMeta>, Vec<usize>)>,
}

impl RecordEncoder {
    pub fn new(config: &BulkLoaderConfig) -> Self {
        let terminator = config
            .alt_record_term
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "\n".to_string());
        Self {
            mappings: config.mappings.clone(),
            terminator,
            layout: None,
        }
    }

    /// Positions of the mapped stream fields in `meta`
    fn indexes(&mut self, meta: &Arc<RowMeta>) -> Result<&[usize], RowFormatError> {
        let stale = self
            .layout
            .as_ref()
            .is_none_or(|(known, _)| !Arc::ptr_eq(known, meta) && known != meta);
        if stale {
            let indexes = self
                .mappings
                .iter()
                .map(|m| {
                    meta.index_of(&m.stream_field)
                        .ok_or_else(|| RowFormatError::MissingField(m.stream_field.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.layout = Some((meta.clone(), indexes));
        }
        Ok(self
            .layout
            .as_ref()
            .map(|(_, indexes)| indexes.as_slice())
            .unwrap_or_default())
    }

    /// One record, terminator included.
    pub fn encode(&mut self, row: &Row) -> Result<Vec<u8>, StepError> {
        let indexes = self.indexes(row.meta())?.to_vec();
        let fields: Vec<String> = indexes
            .iter()
            .zip(&self.mappings)
            .map(|(&i, mapping)| format_value(row.get(i).unwrap_or(&Value::Null), mapping))
            .collect();

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b',')
            .quote(b'"')
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'))
            .has_headers(false)
            .buffer_capacity(256)
            .from_writer(Vec::with_capacity(128));
        writer
            .write_record(&fields)
            .map_err(|e| StepError::internal(format!("failed to encode record: {e}")))?;
        let mut record = writer
            .into_inner()
            .map_err(|e| StepError::internal(format!("failed to encode record: {e}")))?;
        if record.last() == Some(&b'\n') {
            record.pop();
        }
        record.extend_from_slice(self.terminator.as_bytes());
        Ok(record)
    }
}

fn format_value(value: &Value, mapping: &FieldMapping) -> String {
    match value {
        Value::Null => String::new(),
        Value::Date(date) => {
            let mask = mapping.date_mask.unwrap_or(DateMask::DateTime);
            date.format(mask.data_format()).to_string()
        },
        other => other.to_text().unwrap_or_default(),
    }
}
