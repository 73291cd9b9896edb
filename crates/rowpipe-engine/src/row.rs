//! Row model: late-bound values travelling with a shared schema

use crate::error::RowFormatError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Text layout for dates in result XML and generator definitions
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Number,
    String,
    Date,
    Binary,
    Boolean,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "Integer",
            ValueType::Number => "Number",
            ValueType::String => "String",
            ValueType::Date => "Date",
            ValueType::Binary => "Binary",
            ValueType::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "integer" => Ok(ValueType::Integer),
            "number" => Ok(ValueType::Number),
            "string" => Ok(ValueType::String),
            "date" => Ok(ValueType::Date),
            "binary" => Ok(ValueType::Binary),
            "boolean" => Ok(ValueType::Boolean),
            other => Err(format!("unknown value type '{other}'")),
        }
    }
}

/// One typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Number(f64),
    String(String),
    Date(NaiveDateTime),
    Binary(Vec<u8>),
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of a non-null value
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Number(_) => Some(ValueType::Number),
            Value::String(_) => Some(ValueType::String),
            Value::Date(_) => Some(ValueType::Date),
            Value::Binary(_) => Some(ValueType::Binary),
            Value::Boolean(_) => Some(ValueType::Boolean),
        }
    }

    /// Parse the canonical text form produced by [`Value::to_text`].
    pub fn parse(value_type: ValueType, text: &str) -> Result<Value, String> {
        match value_type {
            ValueType::Integer => text
                .trim()
                .parse()
                .map(Value::Integer)
                .map_err(|e| format!("'{text}' is not an integer: {e}")),
            ValueType::Number => text
                .trim()
                .parse()
                .map(Value::Number)
                .map_err(|e| format!("'{text}' is not a number: {e}")),
            ValueType::String => Ok(Value::String(text.to_string())),
            ValueType::Date => NaiveDateTime::parse_from_str(text.trim(), DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| format!("'{text}' is not a date ({DATE_FORMAT}): {e}")),
            ValueType::Binary => hex::decode(text.trim())
                .map(Value::Binary)
                .map_err(|e| format!("'{text}' is not hex encoded: {e}")),
            ValueType::Boolean => match text.trim().to_ascii_uppercase().as_str() {
                "Y" | "TRUE" => Ok(Value::Boolean(true)),
                "N" | "FALSE" => Ok(Value::Boolean(false)),
                _ => Err(format!("'{text}' is not a boolean")),
            },
        }
    }

    /// Canonical text form, `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(v) => Some(v.to_string()),
            Value::Number(v) => Some(v.to_string()),
            Value::String(v) => Some(v.clone()),
            Value::Date(v) => Some(v.format(DATE_FORMAT).to_string()),
            Value::Binary(v) => Some(hex::encode(v)),
            Value::Boolean(v) => Some(if *v { "Y" } else { "N" }.to_string()),
        }
    }

    /// Compare two values. Integers and numbers compare numerically;
    /// otherwise both sides must have the same type. Null sorts first.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Integer(a), Value::Number(b)) => (*a as f64).partial_cmp(b),
            (Value::Number(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("<null>"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// Field descriptor; `-1` means length or precision is not set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueMeta {
    pub name: String,
    pub value_type: ValueType,
    #[serde(default = "unset")]
    pub length: i32,
    #[serde(default = "unset")]
    pub precision: i32,
}

fn unset() -> i32 {
    -1
}

impl ValueMeta {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: -1,
            precision: -1,
        }
    }

    pub fn with_length(mut self, length: i32, precision: i32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }
}

/// Ordered field layout shared by all rows of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RowMeta {
    fields: Vec<ValueMeta>,
}

impl RowMeta {
    pub fn new(fields: Vec<ValueMeta>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[ValueMeta] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn search(&self, name: &str) -> Option<&ValueMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Compact `name:Type` listing used in diagnostics
    pub fn layout(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}:{}", f.name, f.value_type))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One record: values positioned according to a shared schema
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    meta: Arc<RowMeta>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. The value count must match the schema width and every
    /// non-null value must have its field's declared type.
    pub fn new(meta: Arc<RowMeta>, values: Vec<Value>) -> Result<Self, RowFormatError> {
        if meta.len() != values.len() {
            return Err(RowFormatError::WidthMismatch {
                expected: meta.len(),
                actual: values.len(),
            });
        }
        for (field, value) in meta.fields().iter().zip(&values) {
            match value.value_type() {
                Some(actual) if actual != field.value_type => {
                    return Err(RowFormatError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.value_type.to_string(),
                        actual: actual.to_string(),
                    });
                },
                _ => {},
            }
        }
        Ok(Self { meta, values })
    }

    pub fn meta(&self) -> &Arc<RowMeta> {
        &self.meta
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the named field
    pub fn field(&self, name: &str) -> Result<&Value, RowFormatError> {
        self.meta
            .index_of(name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| RowFormatError::MissingField(name.to_string()))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
