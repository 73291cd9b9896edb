//! Database metadata access used by checks and DDL generation

use crate::row::{RowMeta, ValueMeta, ValueType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("database error: {0}")]
    Database(String),

    #[error("unsupported statement: {0}")]
    Unsupported(String),
}

/// Read table layouts and run DDL against a target database
#[async_trait]
pub trait TableCatalog: Send + Sync {
    /// Columns of `schema.table`, `None` when the table does not exist.
    async fn table_fields(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<RowMeta>, CatalogError>;

    async fn execute_ddl(&self, sql: &str) -> Result<(), CatalogError>;
}

/// `schema.table`, or just `table` without a schema
pub fn qualified_name(schema: &str, table: &str) -> String {
    if schema.trim().is_empty() {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}

/// Column type used in generated DDL
pub fn column_type(field: &ValueMeta) -> String {
    match field.value_type {
        ValueType::Integer => "BIGINT".to_string(),
        ValueType::Number if field.length > 0 && field.precision >= 0 => {
            format!("DECIMAL({}, {})", field.length, field.precision)
        },
        ValueType::Number => "DOUBLE PRECISION".to_string(),
        ValueType::String if field.length > 0 => format!("VARCHAR({})", field.length),
        ValueType::String => "VARCHAR(255)".to_string(),
        ValueType::Date => "TIMESTAMP".to_string(),
        ValueType::Binary => "BLOB".to_string(),
        ValueType::Boolean => "CHAR(1)".to_string(),
    }
}

/// DDL bringing `schema.table` in line with `fields`.
///
/// A missing table yields `CREATE TABLE`; an existing one yields
/// `ALTER TABLE … ADD` for absent columns. `None` when nothing is missing.
pub fn ddl_for(
    schema: &str,
    table: &str,
    existing: Option<&RowMeta>,
    fields: &RowMeta,
) -> Option<String> {
    let name = qualified_name(schema, table);
    match existing {
        None => {
            let columns = fields
                .fields()
                .iter()
                .map(|f| format!("  {} {}", f.name, column_type(f)))
                .collect::<Vec<_>>()
                .join(",\n");
            Some(format!("CREATE TABLE {name}\n(\n{columns}\n);\n"))
        },
        Some(existing) => {
            let statements: Vec<String> = fields
                .fields()
                .iter()
                .filter(|f| existing.search(&f.name).is_none())
                .map(|f| format!("ALTER TABLE {name} ADD {} {};\n", f.name, column_type(f)))
                .collect();
            (!statements.is_empty()).then(|| statements.concat())
        },
    }
}

/// Catalog kept in memory, for tests and offline checks
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: Mutex<HashMap<String, RowMeta>>,
    executed: Mutex<Vec<String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, schema: &str, table: &str, fields: RowMeta) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(qualified_name(schema, table), fields);
        self
    }

    /// Statements passed to [`TableCatalog::execute_ddl`], oldest first
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TableCatalog for InMemoryCatalog {
    async fn table_fields(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Option<RowMeta>, CatalogError> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&qualified_name(schema, table))
            .cloned())
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), CatalogError> {
        if sql.trim().is_empty() {
            return Err(CatalogError::Unsupported("empty statement".into()));
        }
        tracing::debug!(sql = %sql, "executing DDL");
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn layout() -> RowMeta {
        RowMeta::new(vec![
            ValueMeta::new("id", ValueType::Integer),
            ValueMeta::new("name", ValueType::String).with_length(40, -1),
            ValueMeta::new("amount", ValueType::Number).with_length(12, 2),
        ])
    }

    #[test]
    fn test_create_table_for_missing_table() {
        let sql = ddl_for("sales", "orders", None, &layout()).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE sales.orders\n(\n  id BIGINT,\n  name VARCHAR(40),\n  amount DECIMAL(12, 2)\n);\n"
        );
    }

    #[test]
    fn test_alter_table_adds_only_missing_columns() {
        let existing = RowMeta::new(vec![ValueMeta::new("id", ValueType::Integer)]);
        let sql = ddl_for("", "orders", Some(&existing), &layout()).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE orders ADD name VARCHAR(40);\nALTER TABLE orders ADD amount DECIMAL(12, 2);\n"
        );
        assert_eq!(ddl_for("", "orders", Some(&layout()), &layout()), None);
    }

    #[tokio::test]
    async fn test_in_memory_catalog() {
        let catalog = InMemoryCatalog::new().with_table("", "orders", layout());
        assert!(catalog.table_fields("", "orders").await.unwrap().is_some());
        assert!(catalog.table_fields("x", "orders").await.unwrap().is_none());

        catalog.execute_ddl("DROP TABLE t").await.unwrap();
        assert!(catalog.execute_ddl("  ").await.is_err());
        assert_eq!(catalog.executed(), vec!["DROP TABLE t".to_string()]);
    }
}
