//! Subtable designations: `{dialect: {table: [[column, value_type], ...]}}`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::rules::DialectKind;
use crate::error::Result;

use super::read_policy;

/// Attributes stored one row per value, for the configured dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtablePolicy {
    tables: BTreeMap<String, Vec<(String, String)>>,
}

impl SubtablePolicy {
    pub fn new(tables: BTreeMap<String, Vec<(String, String)>>) -> Self {
        Self { tables }
    }

    /// Load the designation document and keep the entries for `dialect`.
    pub fn load(path: &Path, dialect: DialectKind) -> Result<Self> {
        let mut doc: BTreeMap<String, BTreeMap<String, Vec<(String, String)>>> =
            read_policy(path)?;
        Ok(Self::new(doc.remove(dialect.as_str()).unwrap_or_default()))
    }

    /// `(column, value_type)` pairs designated for `table`.
    pub fn for_table(&self, table: &str) -> &[(String, String)] {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_subtable_column(&self, table: &str, column: &str) -> bool {
        self.for_table(table).iter().any(|(c, _)| c == column)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
