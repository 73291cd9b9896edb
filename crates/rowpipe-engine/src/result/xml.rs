//! XML exchange form of an [`ExecutionResult`]
//!
//! Every value sits in its own element followed by a newline. Absent
//! strings and null values are written as self-closing elements so they
//! stay distinguishable from empty strings. Result rows are written as a
//! `row-meta` block whenever the layout changes, followed by one `row-data`
//! block per row.

use super::{ExecutionResult, ResultFile, ResultFileType, TIMESTAMP_FORMAT};
use crate::row::{Row, RowMeta, Value, ValueMeta, ValueType};
use chrono::NaiveDateTime;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub const XML_TAG: &str = "result";
pub const XML_FILES_TAG: &str = "result-file";
pub const XML_FILE_TAG: &str = "result-file";
pub const XML_ROWS_TAG: &str = "result-rows";

const ROW_META_TAG: &str = "row-meta";
const VALUE_META_TAG: &str = "value-meta";
const ROW_DATA_TAG: &str = "row-data";
const VALUE_DATA_TAG: &str = "value-data";

#[derive(Error, Debug)]
pub enum ResultXmlError {
    #[error("malformed XML at byte {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("expected <{expected}> but found <{found}>")]
    UnexpectedElement { expected: String, found: String },

    #[error("invalid value '{value}' in <{tag}>: {reason}")]
    InvalidValue {
        tag: String,
        value: String,
        reason: String,
    },

    #[error("row data found before any row layout")]
    MissingRowMeta,

    #[error(transparent)]
    RowFormat(#[from] crate::error::RowFormatError),
}

impl ExecutionResult {
    /// Serialize to the XML exchange form.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(1024);
        open(&mut xml, XML_TAG);

        tag_value(&mut xml, "lines_input", &self.lines_input.to_string());
        tag_value(&mut xml, "lines_output", &self.lines_output.to_string());
        tag_value(&mut xml, "lines_read", &self.lines_read.to_string());
        tag_value(&mut xml, "lines_written", &self.lines_written.to_string());
        tag_value(&mut xml, "lines_updated", &self.lines_updated.to_string());
        tag_value(&mut xml, "lines_rejected", &self.lines_rejected.to_string());
        tag_value(&mut xml, "lines_deleted", &self.lines_deleted.to_string());
        tag_value(&mut xml, "nr_errors", &self.nr_errors.to_string());
        tag_value(
            &mut xml,
            "nr_files_retrieved",
            &self.nr_files_retrieved.to_string(),
        );
        tag_value(&mut xml, "entry_nr", &self.entry_nr.to_string());
        tag_value(&mut xml, "result", yes_no(self.result));
        tag_value(&mut xml, "exit_status", &self.exit_status.to_string());
        tag_value(&mut xml, "is_stopped", yes_no(self.stopped));
        opt_tag_value(&mut xml, "log_channel_id", self.log_channel_id.as_deref());
        opt_tag_value(&mut xml, "log_text", self.log_text.as_deref());

        open(&mut xml, XML_FILES_TAG);
        for file in self.result_files.values() {
            write_file(&mut xml, file);
        }
        close(&mut xml, XML_FILES_TAG);

        open(&mut xml, XML_ROWS_TAG);
        let mut current: Option<&Arc<RowMeta>> = None;
        for row in &self.rows {
            if current.is_none_or(|meta| meta.as_ref() != row.meta().as_ref()) {
                write_row_meta(&mut xml, row.meta());
                current = Some(row.meta());
            }
            open(&mut xml, ROW_DATA_TAG);
            for value in row.values() {
                opt_tag_value(&mut xml, VALUE_DATA_TAG, value.to_text().as_deref());
            }
            close(&mut xml, ROW_DATA_TAG);
        }
        close(&mut xml, XML_ROWS_TAG);

        close(&mut xml, XML_TAG);
        xml
    }

    /// Parse the form produced by [`ExecutionResult::to_xml`].
    pub fn from_xml(xml: &str) -> Result<Self, ResultXmlError> {
        let root = parse_tree(xml)?;
        if root.name != XML_TAG {
            return Err(ResultXmlError::UnexpectedElement {
                expected: XML_TAG.to_string(),
                found: root.name,
            });
        }

        let mut result = ExecutionResult {
            lines_input: root.number("lines_input")?,
            lines_output: root.number("lines_output")?,
            lines_read: root.number("lines_read")?,
            lines_written: root.number("lines_written")?,
            lines_updated: root.number("lines_updated")?,
            lines_rejected: root.number("lines_rejected")?,
            lines_deleted: root.number("lines_deleted")?,
            nr_errors: root.number("nr_errors")?,
            nr_files_retrieved: root.number("nr_files_retrieved")?,
            entry_nr: root.number("entry_nr")?,
            result: root.flag("result")?,
            exit_status: root.number("exit_status")?,
            stopped: root.flag("is_stopped")?,
            log_channel_id: root.text("log_channel_id"),
            log_text: root.text("log_text"),
            ..ExecutionResult::default()
        };

        if let Some(files) = root.child(XML_FILES_TAG) {
            for node in files.children_named(XML_FILE_TAG) {
                result.add_result_file(read_file(node)?);
            }
        }

        // only rows under the rows container are counted
        if let Some(rows) = root.child(XML_ROWS_TAG) {
            let mut meta: Option<Arc<RowMeta>> = None;
            for node in &rows.children {
                match node.name.as_str() {
                    ROW_META_TAG => meta = Some(Arc::new(read_row_meta(node)?)),
                    ROW_DATA_TAG => {
                        let meta = meta.clone().ok_or(ResultXmlError::MissingRowMeta)?;
                        result.rows.push(read_row(node, meta)?);
                    },
                    _ => {},
                }
            }
        }

        Ok(result)
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Y"
    } else {
        "N"
    }
}

fn open(xml: &mut String, tag: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push_str(">\n");
}

fn close(xml: &mut String, tag: &str) {
    xml.push_str("</");
    xml.push_str(tag);
    xml.push_str(">\n");
}

fn tag_value(xml: &mut String, tag: &str, value: &str) {
    xml.push('<');
    xml.push_str(tag);
    xml.push('>');
    xml.push_str(&escape(value));
    xml.push_str("</");
    xml.push_str(tag);
    xml.push_str(">\n");
}

fn opt_tag_value(xml: &mut String, tag: &str, value: Option<&str>) {
    match value {
        Some(value) => tag_value(xml, tag, value),
        None => {
            xml.push('<');
            xml.push_str(tag);
            xml.push_str("/>\n");
        },
    }
}

fn write_file(xml: &mut String, file: &ResultFile) {
    open(xml, XML_FILE_TAG);
    tag_value(xml, "type", file.file_type.code());
    tag_value(xml, "file", &file.path);
    opt_tag_value(xml, "parentorigin", file.parent_origin.as_deref());
    opt_tag_value(xml, "origin", file.origin.as_deref());
    opt_tag_value(xml, "comment", file.comment.as_deref());
    tag_value(
        xml,
        "timestamp",
        &file.timestamp.format(TIMESTAMP_FORMAT).to_string(),
    );
    close(xml, XML_FILE_TAG);
}

fn write_row_meta(xml: &mut String, meta: &RowMeta) {
    open(xml, ROW_META_TAG);
    for field in meta.fields() {
        open(xml, VALUE_META_TAG);
        tag_value(xml, "type", field.value_type.as_str());
        tag_value(xml, "name", &field.name);
        tag_value(xml, "length", &field.length.to_string());
        tag_value(xml, "precision", &field.precision.to_string());
        close(xml, VALUE_META_TAG);
    }
    close(xml, ROW_META_TAG);
}

fn read_file(node: &Node) -> Result<ResultFile, ResultXmlError> {
    let code = node.text("type").unwrap_or_default();
    let file_type =
        ResultFileType::from_code(&code).ok_or_else(|| ResultXmlError::InvalidValue {
            tag: "type".into(),
            value: code.clone(),
            reason: "unknown result file type".into(),
        })?;
    let stamp = node.text("timestamp").unwrap_or_default();
    let timestamp = NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).map_err(|e| {
        ResultXmlError::InvalidValue {
            tag: "timestamp".into(),
            value: stamp.clone(),
            reason: e.to_string(),
        }
    })?;

    Ok(ResultFile {
        file_type,
        path: node.text("file").unwrap_or_default(),
        parent_origin: node.text("parentorigin"),
        origin: node.text("origin"),
        comment: node.text("comment"),
        timestamp,
    })
}

fn read_row_meta(node: &Node) -> Result<RowMeta, ResultXmlError> {
    let mut fields = Vec::new();
    for value_meta in node.children_named(VALUE_META_TAG) {
        let type_name = value_meta.text("type").unwrap_or_default();
        let value_type =
            ValueType::from_str(&type_name).map_err(|reason| ResultXmlError::InvalidValue {
                tag: "type".into(),
                value: type_name.clone(),
                reason,
            })?;
        let name = value_meta.text("name").unwrap_or_default();
        let field = ValueMeta::new(name, value_type).with_length(
            value_meta.number_or("length", -1)?,
            value_meta.number_or("precision", -1)?,
        );
        fields.push(field);
    }
    Ok(RowMeta::new(fields))
}

fn read_row(node: &Node, meta: Arc<RowMeta>) -> Result<Row, ResultXmlError> {
    let mut values = Vec::with_capacity(meta.len());
    for (i, data) in node.children_named(VALUE_DATA_TAG).enumerate() {
        let value = match (&data.text, meta.fields().get(i)) {
            (None, _) => Value::Null,
            (Some(text), Some(field)) => Value::parse(field.value_type, text).map_err(|reason| {
                ResultXmlError::InvalidValue {
                    tag: field.name.clone(),
                    value: text.clone(),
                    reason,
                }
            })?,
            // surplus values are reported by the width check below
            (Some(text), None) => Value::String(text.clone()),
        };
        values.push(value);
    }
    Ok(Row::new(meta, values)?)
}

/// Minimal element tree; text is only kept for leaf elements
#[derive(Debug, Default)]
struct Node {
    name: String,
    /// `None` for a self-closing element
    text: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn text(&self, name: &str) -> Option<String> {
        self.child(name).and_then(|c| c.text.clone())
    }

    /// Numeric child value; an absent element reads as zero.
    fn number<T>(&self, name: &str) -> Result<T, ResultXmlError>
    where
        T: FromStr + Default,
        T::Err: std::fmt::Display,
    {
        self.number_or(name, T::default())
    }

    fn number_or<T>(&self, name: &str, default: T) -> Result<T, ResultXmlError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.text(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e: T::Err| ResultXmlError::InvalidValue {
                    tag: name.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    fn flag(&self, name: &str) -> Result<bool, ResultXmlError> {
        match self.text(name).as_deref().map(str::trim) {
            None | Some("N") | Some("n") => Ok(false),
            Some("Y") | Some("y") => Ok(true),
            Some(other) => Err(ResultXmlError::InvalidValue {
                tag: name.to_string(),
                value: other.to_string(),
                reason: "expected Y or N".into(),
            }),
        }
    }
}

fn parse_tree(xml: &str) -> Result<Node, ResultXmlError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    let malformed = |reader: &Reader<&[u8]>, message: String| ResultXmlError::Malformed {
        position: reader.buffer_position(),
        message,
    };

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(&reader, e.to_string()))?;
        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                stack.push(Node {
                    name,
                    text: Some(String::new()),
                    children: Vec::new(),
                });
            },
            Event::Empty(empty) => {
                let node = Node {
                    name: String::from_utf8_lossy(empty.name().as_ref()).into_owned(),
                    text: None,
                    children: Vec::new(),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            },
            Event::Text(text) => {
                if let Some(Node {
                    text: Some(buffer), ..
                }) = stack.last_mut()
                {
                    let unescaped = text
                        .unescape()
                        .map_err(|e| malformed(&reader, e.to_string()))?;
                    buffer.push_str(&unescaped);
                }
            },
            Event::CData(data) => {
                if let Some(Node {
                    text: Some(buffer), ..
                }) = stack.last_mut()
                {
                    buffer.push_str(&String::from_utf8_lossy(&data));
                }
            },
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                let mut node = stack
                    .pop()
                    .ok_or_else(|| malformed(&reader, format!("unexpected </{name}>")))?;
                if node.name != name {
                    return Err(malformed(
                        &reader,
                        format!("</{name}> closes <{}>", node.name),
                    ));
                }
                if !node.children.is_empty() {
                    node.text = None;
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }

    if let Some(open) = stack.last() {
        return Err(malformed(&reader, format!("<{}> is never closed", open.name)));
    }
    root.ok_or_else(|| malformed(&reader, "document has no root element".into()))
}
