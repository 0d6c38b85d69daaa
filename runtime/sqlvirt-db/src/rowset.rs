//! Tabular results and the row-set XML wire format.

use std::fmt::Write as _;

use crate::error::{Error, Result, SqlError};
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::xml::{self, Element, XSI_NAMESPACE};

const PLACEHOLDER_TAG: &str = "val";

/// An in-memory result with a forward cursor.
///
/// The cursor starts before the first row; `next` advances it and `rewind`
/// puts it back. Column indexes are 1-based, as in any SQL driver API.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: usize,
}

impl RowSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            position: 0,
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut set = Self::new(columns);
        for row in rows {
            set.push_row(row);
        }
        set
    }

    /// Short rows are padded with nulls.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn next(&mut self) -> bool {
        if self.position < self.rows.len() {
            self.position += 1;
            true
        } else {
            self.position = self.rows.len() + 1;
            false
        }
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn current_row(&self) -> Option<&[Value]> {
        match self.position {
            0 => None,
            n => self.rows.get(n - 1).map(Vec::as_slice),
        }
    }

    pub fn value(&self, index: usize) -> Result<&Value> {
        let row = self.current_row().ok_or_else(SqlError::no_current_row)?;
        if index == 0 || index > row.len() {
            return Err(SqlError::invalid_column_index(index, self.columns.len()).into());
        }
        Ok(&row[index - 1])
    }

    /// Case-insensitive; the first matching column wins.
    pub fn value_by_name(&self, name: &str) -> Result<&Value> {
        let index = self
            .columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .ok_or_else(|| SqlError::new(format!("invalid column name '{name}'"), "42S22", 0))?;
        self.value(index + 1)
    }

    /// Text form of a cell; `None` for SQL NULL.
    pub fn string(&self, index: usize) -> Result<Option<String>> {
        self.value(index).map(Value::text)
    }
}

/// Reads and writes [`RowSet`]s in the `<resultset>` XML format.
#[derive(Debug, Clone, Default)]
pub struct RowSetCodec {
    registry: TypeRegistry,
    typed_encoding: bool,
}

impl RowSetCodec {
    pub fn new(registry: TypeRegistry, typed_encoding: bool) -> Self {
        Self {
            registry,
            typed_encoding,
        }
    }

    pub fn typed(mut self, typed_encoding: bool) -> Self {
        self.typed_encoding = typed_encoding;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn is_typed(&self) -> bool {
        self.typed_encoding
    }

    pub fn decode(&self, input: &str) -> Result<RowSet> {
        let root = xml::parse(input).map_err(|err| Error::unreadable(err.to_string()))?;
        let columns = resolve_columns(&root);
        let mut set = RowSet::new(columns);
        for row in root.children_named("row") {
            let decoded = self.decode_row(row, set.columns())?;
            set.push_row(decoded);
        }
        Ok(set)
    }

    /// A value placed by name takes precedence over a positional value for
    /// the same column, wherever the two appear in the row.
    fn decode_row(&self, row: &Element, columns: &[String]) -> Result<Vec<Value>> {
        let mut named: Vec<Option<Value>> = vec![None; columns.len()];
        let mut positional: Vec<Option<Value>> = vec![None; columns.len()];
        for (index, cell) in row.child_elements().enumerate() {
            match unique_column(columns, declared_name(cell)) {
                Some(slot) => named[slot] = Some(self.decode_cell(cell)?),
                None if index < columns.len() => {
                    positional[index] = Some(self.decode_cell(cell)?);
                }
                None => {
                    return Err(Error::unreadable(format!(
                        "row has more than {} values",
                        columns.len()
                    )));
                }
            }
        }
        Ok(named
            .into_iter()
            .zip(positional)
            .map(|(named, positional)| named.or(positional).unwrap_or(Value::Null))
            .collect())
    }

    fn decode_cell(&self, cell: &Element) -> Result<Value> {
        let nil = cell
            .attribute_ns(Some(XSI_NAMESPACE), "nil")
            .is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true"));
        if nil {
            return Ok(Value::Null);
        }
        let text = cell.text();
        match cell.attribute_ns(Some(XSI_NAMESPACE), "type") {
            Some(tag) => self.registry.decode(tag.trim(), text.trim()),
            None => Ok(Value::Text(text)),
        }
    }

    /// Serializes the rows from the current cursor position onwards, then
    /// rewinds the cursor.
    pub fn encode(&self, rows: &mut RowSet) -> Result<String> {
        let written = self.write_rows(rows);
        rows.rewind();
        written
    }

    fn write_rows(&self, rows: &mut RowSet) -> Result<String> {
        let tags = cell_tags(rows.columns());
        let mut out = format!("<resultset xmlns:xsi='{XSI_NAMESPACE}'><cols>");
        for column in rows.columns() {
            let _ = write!(out, "<col>{}</col>", xml::escape_text(column));
        }
        out.push_str("</cols>");
        while rows.next() {
            out.push_str("<row>");
            if let Some(row) = rows.current_row() {
                for (tag, value) in tags.iter().zip(row) {
                    self.write_cell(&mut out, tag, value)?;
                }
            }
            out.push_str("</row>");
        }
        out.push_str("</resultset>");
        Ok(out)
    }

    fn write_cell(&self, out: &mut String, tag: &str, value: &Value) -> Result<()> {
        if value.is_null() {
            let _ = write!(out, "<{tag} xsi:nil='true'/>");
            return Ok(());
        }
        let (type_tag, text) = if self.typed_encoding {
            match self.registry.encode(value)? {
                Some(encoded) => (encoded.tag, encoded.text),
                None => (None, String::new()),
            }
        } else {
            (None, value.text().unwrap_or_default())
        };
        match type_tag {
            Some(type_tag) => {
                let _ = write!(
                    out,
                    "<{tag} xsi:type='{}'>{}</{tag}>",
                    xml::escape_attr(type_tag),
                    xml::escape_text(&text)
                );
            }
            None => {
                let _ = write!(out, "<{tag}>{}</{tag}>", xml::escape_text(&text));
            }
        }
        Ok(())
    }
}

fn declared_name(cell: &Element) -> &str {
    cell.attribute("name").unwrap_or(&cell.name)
}

/// Name addressing only applies to names that identify exactly one column.
fn unique_column(columns: &[String], name: &str) -> Option<usize> {
    let mut matches = columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.as_str() == name);
    match (matches.next(), matches.next()) {
        (Some((index, _)), None) => Some(index),
        _ => None,
    }
}

fn resolve_columns(root: &Element) -> Vec<String> {
    if let Some(header) = root.children_named("cols").next() {
        return header
            .children_named("col")
            .map(|col| col.text())
            .collect();
    }
    match root.children_named("row").next() {
        Some(first) => first
            .child_elements()
            .map(|cell| declared_name(cell).to_string())
            .collect(),
        None => Vec::new(),
    }
}

/// Element name per column: the column's own name where that decodes back to
/// the same column, otherwise a placeholder that matches no column.
fn cell_tags(columns: &[String]) -> Vec<String> {
    let placeholder = placeholder_tag(columns);
    columns
        .iter()
        .map(|column| {
            let usable = xml::is_valid_name(column)
                && columns.iter().filter(|other| *other == column).count() == 1;
            if usable {
                column.clone()
            } else {
                placeholder.clone()
            }
        })
        .collect()
}

fn placeholder_tag(columns: &[String]) -> String {
    let taken = |tag: &str| columns.iter().any(|column| column == tag);
    if !taken(PLACEHOLDER_TAG) {
        return PLACEHOLDER_TAG.to_string();
    }
    (1..)
        .map(|n| format!("{PLACEHOLDER_TAG}_{n}"))
        .find(|tag| !taken(tag))
        .unwrap_or_else(|| PLACEHOLDER_TAG.to_string())
}
