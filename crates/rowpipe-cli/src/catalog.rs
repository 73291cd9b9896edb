//! Table catalog files for `rowpipe check`
//!
//! ```yaml
//! - schema: sales
//!   table: orders
//!   columns:
//!     - name: id
//!       type: integer
//!     - name: customer
//!       type: string
//!       length: 30
//! ```

use crate::error::{CliError, Result};
use rowpipe_engine::{InMemoryCatalog, RowMeta, ValueMeta, ValueType};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct TableSpec {
    #[serde(default)]
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub length: Option<i32>,
    #[serde(default)]
    pub precision: Option<i32>,
}

impl ColumnSpec {
    fn to_meta(&self) -> ValueMeta {
        ValueMeta::new(&self.name, self.value_type)
            .with_length(self.length.unwrap_or(-1), self.precision.unwrap_or(-1))
    }
}

/// Parse a catalog file into an in-memory catalog.
pub fn load(path: &Path) -> Result<InMemoryCatalog> {
    let text = std::fs::read_to_string(path)?;
    let invalid = |message: String| CliError::InvalidCatalog {
        path: path.display().to_string(),
        message,
    };
    let tables: Vec<TableSpec> = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?,
        _ => serde_yaml::from_str(&text).map_err(|e| invalid(e.to_string()))?,
    };

    Ok(tables.iter().fold(InMemoryCatalog::new(), |catalog, table| {
        let fields = RowMeta::new(table.columns.iter().map(ColumnSpec::to_meta).collect());
        catalog.with_table(&table.schema, &table.table, fields)
    }))
}
