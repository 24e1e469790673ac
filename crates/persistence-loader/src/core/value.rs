//! Typed column values and rows.
//!
//! Values are produced by the entry transformer and consumed by backend
//! adapters, which bind them as statement parameters.

use chrono::NaiveDateTime;
use serde::Serialize;

/// A typed value for one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,

    /// Boolean value (Spanner `BOOL`, Postgres `BOOLEAN`).
    Bool(bool),

    /// Boolean stored as `SMALLINT` (1/0).
    I16(i16),

    /// Integer value.
    I64(i64),

    /// Scalar string data.
    Text(String),

    /// Structured value for `JSON` / `JSONB` columns.
    Json(serde_json::Value),

    /// Native string array (`ARRAY<STRING(MAX)>`).
    TextArray(Vec<String>),

    /// Timestamp without zone; rendered per dialect when bound as text.
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Text content of a scalar string value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Null, empty string, or an empty container.
    pub fn is_empty(&self) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::Text(s) => s.is_empty(),
            SqlValue::TextArray(v) => v.is_empty(),
            SqlValue::Json(serde_json::Value::Null) => true,
            SqlValue::Json(serde_json::Value::Array(v)) => v.is_empty(),
            SqlValue::Json(serde_json::Value::String(s)) => s.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

/// Ordered column/value pairs for one row.
///
/// Order follows insertion so generated statements are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    values: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value, replacing any previous value for the column.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let pos = self.values.iter().position(|(c, _)| c == column)?;
        Some(self.values.remove(pos).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.iter().any(|(c, _)| c == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `doc_id` column as text, if present.
    pub fn doc_id(&self) -> Option<&str> {
        self.get(super::layout::DOC_ID).and_then(SqlValue::as_text)
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (c, v) in iter {
            row.insert(c, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}
