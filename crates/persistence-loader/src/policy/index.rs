//! Index policy document.
//!
//! ```json
//! {
//!   "__common__": {"fields": ["exp"], "JSON": ["<slot template>"]},
//!   "__unique__": [["jansPerson", "uid"]],
//!   "jansScope": {"fields": ["jansId"], "custom": ["<expression>"]}
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::rules::DialectKind;
use crate::error::Result;

use super::{parse_policy, read_policy};

const BUILTIN_MYSQL: &str = include_str!("../../data/mysql_index.json");
const BUILTIN_PGSQL: &str = include_str!("../../data/pgsql_index.json");
const BUILTIN_SPANNER: &str = include_str!("../../data/spanner_index.json");

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommonIndexPolicy {
    /// Fields indexed on every table that has them.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Slot templates for structured columns; `$field` and `$data_type` are substituted.
    #[serde(rename = "JSON", default)]
    pub json: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TableIndexPolicy {
    #[serde(default)]
    pub fields: Vec<String>,
    /// Raw index expressions.
    #[serde(default)]
    pub custom: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IndexPolicy {
    #[serde(rename = "__common__", default)]
    pub common: CommonIndexPolicy,
    /// `(table, column)` pairs receiving a unique index.
    #[serde(rename = "__unique__", default)]
    pub unique: Vec<(String, String)>,
    #[serde(flatten)]
    pub tables: BTreeMap<String, TableIndexPolicy>,
}

impl IndexPolicy {
    /// Bundled policy for a dialect.
    pub fn builtin(dialect: DialectKind) -> Result<Self> {
        let text = match dialect {
            DialectKind::Mysql => BUILTIN_MYSQL,
            DialectKind::Pgsql => BUILTIN_PGSQL,
            DialectKind::Spanner => BUILTIN_SPANNER,
        };
        parse_policy(&format!("bundled {} index policy", dialect), text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_policy(path)
    }

    /// Table fields followed by common fields, without duplicates.
    pub fn fields_for(&self, table: &str) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        let own = self.tables.get(table).map(|t| t.fields.as_slice()).unwrap_or_default();
        for f in own.iter().chain(self.common.fields.iter()) {
            if !fields.contains(&f.as_str()) {
                fields.push(f.as_str());
            }
        }
        fields
    }

    pub fn custom_for(&self, table: &str) -> &[String] {
        self.tables
            .get(table)
            .map(|t| t.custom.as_slice())
            .unwrap_or_default()
    }

    /// Add fields to `__common__`, skipping ones already present.
    pub fn promote_common(&mut self, fields: impl IntoIterator<Item = String>) {
        for f in fields {
            if !self.common.fields.contains(&f) {
                self.common.fields.push(f);
            }
        }
    }
}
