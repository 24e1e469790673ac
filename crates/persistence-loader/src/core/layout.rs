//! Derived storage layout: tables, subtables, columns and indexes.
//!
//! Nothing here is hand-authored; planners derive these from the schema
//! catalog and policy documents on every run.

use serde::Serialize;

/// Primary key column present on every table.
pub const DOC_ID: &str = "doc_id";
/// Column holding the entry's most specific object class.
pub const OBJECT_CLASS: &str = "objectClass";
/// Column holding the entry's distinguished name.
pub const DN: &str = "dn";
/// Second key column of a subtable: digest of the stored value.
pub const DICT_DOC_ID: &str = "dict_doc_id";

/// Table holding named run locks.
pub const LOCK_TABLE: &str = "persistence_lock";
pub const LOCK_OWNER: &str = "owner";
pub const LOCK_EXPIRES_AT: &str = "expires_at";

/// Returns true for the three columns every table carries.
pub fn is_mandatory_column(name: &str) -> bool {
    name == DOC_ID || name == OBJECT_CLASS || name == DN
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    /// Dialect-specific type, e.g. `VARCHAR(48)`, `JSON`, `STRING(MAX)`.
    pub backend_type: String,
    pub is_primary_key: bool,
    /// Attribute description, rendered as a column comment where supported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_type: backend_type.into(),
            is_primary_key: false,
            description: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column unless one with the same name exists. Returns whether it was added.
    pub fn push_column(&mut self, column: ColumnSpec) -> bool {
        if self.has_column(&column.name) {
            return false;
        }
        self.columns.push(column);
        true
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Layout of the run-lock table: lock name as `doc_id`, owner and expiry.
pub fn lock_table(key_type: &str) -> TableSpec {
    TableSpec {
        name: LOCK_TABLE.to_string(),
        columns: vec![
            ColumnSpec::new(DOC_ID, key_type).primary_key(),
            ColumnSpec::new(LOCK_OWNER, key_type),
            ColumnSpec::new(LOCK_EXPIRES_AT, key_type),
        ],
    }
}

/// Child table holding one row per value of a multivalued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtableSpec {
    pub parent_table: String,
    pub name: String,
    /// The attribute whose values this subtable holds.
    pub column: String,
    /// Type of the value column.
    pub value_type: String,
    /// Type of `doc_id` / `dict_doc_id`.
    pub key_type: String,
}

impl SubtableSpec {
    pub fn new(
        parent_table: impl Into<String>,
        column: impl Into<String>,
        value_type: impl Into<String>,
        key_type: impl Into<String>,
    ) -> Self {
        let parent_table = parent_table.into();
        let column = column.into();
        Self {
            name: format!("{}_{}", parent_table, column),
            parent_table,
            column,
            value_type: value_type.into(),
            key_type: key_type.into(),
        }
    }

    /// Subtable layout: `(doc_id, dict_doc_id)` composite key plus the value column.
    pub fn table(&self) -> TableSpec {
        TableSpec {
            name: self.name.clone(),
            columns: vec![
                ColumnSpec::new(DOC_ID, &self.key_type).primary_key(),
                ColumnSpec::new(DICT_DOC_ID, &self.key_type).primary_key(),
                ColumnSpec::new(&self.column, &self.value_type),
            ],
        }
    }

    /// Name of the index on the value column.
    pub fn index_name(&self) -> String {
        format!("{}Idx", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Index over the column itself.
    Plain,
    /// Expression index extracting one slot of a structured column.
    Functional,
    /// Raw expression taken verbatim from the index policy.
    Custom,
    /// Unique index over the column itself.
    Unique,
}

/// Virtual column materializing one JSON slot, used when the server
/// cannot build expression indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedColumn {
    pub name: String,
    pub backend_type: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    /// Expression for functional and custom indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Key prefix length for plain indexes over long text columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_length: Option<u32>,
    /// Generated column that must exist before the index is built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<GeneratedColumn>,
}

impl IndexSpec {
    pub fn plain(table: &str, name: String, column: &str) -> Self {
        Self {
            name,
            table: table.to_string(),
            columns: vec![column.to_string()],
            kind: IndexKind::Plain,
            expression: None,
            prefix_length: None,
            generated: None,
        }
    }

    pub fn unique(table: &str, name: String, column: &str) -> Self {
        Self {
            kind: IndexKind::Unique,
            ..Self::plain(table, name, column)
        }
    }

    pub fn functional(table: &str, name: String, column: &str, expression: String) -> Self {
        Self {
            kind: IndexKind::Functional,
            expression: Some(expression),
            ..Self::plain(table, name, column)
        }
    }

    pub fn custom(table: &str, name: String, expression: String) -> Self {
        Self {
            name,
            table: table.to_string(),
            columns: Vec::new(),
            kind: IndexKind::Custom,
            expression: Some(expression),
            prefix_length: None,
            generated: None,
        }
    }
}
