//! Per-dialect type rules, server versions and live schema snapshots.
//!
//! The string sizing rule is shared by every dialect; only the thresholds and
//! type names differ, and those live in [`TypeRules`] as plain data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Mysql,
    Pgsql,
    Spanner,
}

impl DialectKind {
    /// Canonical name, also the key used in policy documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Mysql => "mysql",
            DialectKind::Pgsql => "pgsql",
            DialectKind::Spanner => "spanner",
        }
    }

    /// Normalize a dialect name or alias.
    ///
    /// - "mysql", "mariadb" → mysql
    /// - "pgsql", "postgres", "postgresql", "pg" → pgsql
    /// - "spanner" → spanner
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DialectKind::Mysql),
            "pgsql" | "postgres" | "postgresql" | "pg" => Ok(DialectKind::Pgsql),
            "spanner" => Ok(DialectKind::Spanner),
            other => Err(LoaderError::BackendUnsupported(format!(
                "unknown dialect '{}'. Supported dialects: mysql, pgsql, spanner",
                other
            ))),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a list of values is stored in the dialect's structured type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerShape {
    /// `{"v": [...]}` inside a JSON document.
    Tagged,
    /// A bare JSON array.
    Bare,
    /// The dialect's own typed array.
    NativeArray,
}

/// Value category of a resolved column type; drives value conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Boolean stored as `SMALLINT` 1/0.
    SmallintBool,
    /// Native boolean.
    Bool,
    Integer,
    Timestamp,
    /// JSON-like column holding a value list.
    Structured(ContainerShape),
    Text,
}

/// Dialect type names and string sizing thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRules {
    /// Bounded string type name (`VARCHAR`, `STRING`).
    pub varchar: &'static str,
    /// Largest size rendered as a bounded string.
    pub small_text_max: u32,
    /// Largest size rendered as `medium_text`.
    pub medium_text_max: u32,
    pub medium_text: &'static str,
    /// Unbounded text; also the universal fallback type.
    pub long_text: &'static str,
    /// Native structured type for multivalued attributes.
    pub structured: &'static str,
    pub container: ContainerShape,
    /// chrono format of the dialect's timestamp literal.
    pub timestamp_format: &'static str,
    /// Fallback type of `doc_id` when no override exists.
    pub doc_id: &'static str,
    pub object_class: &'static str,
    pub dn: &'static str,
    /// Type of generated columns materializing JSON slots.
    pub generated_slot: &'static str,
}

impl TypeRules {
    /// Three-tier sizing of a bounded string type.
    pub fn sized_string(&self, size: Option<u32>) -> String {
        match size {
            Some(n) if n <= self.small_text_max => format!("{}({})", self.varchar, n),
            Some(n) if n <= self.medium_text_max => self.medium_text.to_string(),
            _ => self.long_text.to_string(),
        }
    }

    /// Whether a resolved type is this dialect's structured type.
    pub fn is_structured(&self, backend_type: &str) -> bool {
        let t = backend_type.trim().to_uppercase();
        t == self.structured || t == "JSON" || t == "JSONB" || t.starts_with("ARRAY<")
    }

    /// Classify a resolved column type.
    pub fn classify(&self, backend_type: &str) -> ValueKind {
        let t = backend_type.trim().to_uppercase();
        if t.starts_with("ARRAY<") {
            return ValueKind::Structured(ContainerShape::NativeArray);
        }
        if self.is_structured(&t) {
            return ValueKind::Structured(self.container);
        }
        let base = t.split('(').next().unwrap_or_default().trim();
        match base {
            "SMALLINT" | "TINYINT" => ValueKind::SmallintBool,
            "BOOL" | "BOOLEAN" => ValueKind::Bool,
            "INT" | "INTEGER" | "BIGINT" | "INT64" | "MEDIUMINT" => ValueKind::Integer,
            "DATETIME" | "TIMESTAMP" => ValueKind::Timestamp,
            _ => ValueKind::Text,
        }
    }
}

/// Parsed backend server version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerVersion {
    pub raw: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub mariadb: bool,
}

impl ServerVersion {
    /// Parse strings such as `8.0.32`, `10.6.12-MariaDB-log`, `15.4 (Debian 15.4-1)`.
    pub fn parse(raw: &str) -> Self {
        let numeric: String = raw
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            raw: raw.to_string(),
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
            mariadb: raw.to_lowercase().contains("mariadb"),
        }
    }

    /// A version newer than anything the planner distinguishes.
    pub fn latest() -> Self {
        Self {
            raw: "latest".to_string(),
            major: u32::MAX,
            minor: 0,
            patch: 0,
            mariadb: false,
        }
    }

    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Immutable view of live tables and their column types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl SchemaSnapshot {
    pub fn new(tables: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { tables }
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeMap<String, String>> {
        self.tables.get(table)
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&str> {
        self.tables
            .get(table)
            .and_then(|cols| cols.get(column))
            .map(String::as_str)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> TypeRules {
        TypeRules {
            varchar: "VARCHAR",
            small_text_max: 127,
            medium_text_max: 255,
            medium_text: "TINYTEXT",
            long_text: "TEXT",
            structured: "JSON",
            container: ContainerShape::Tagged,
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f",
            doc_id: "VARCHAR(64)",
            object_class: "VARCHAR(48)",
            dn: "VARCHAR(128)",
            generated_slot: "VARCHAR(128)",
        }
    }

    #[test]
    fn test_three_tier_sizing() {
        let r = rules();
        assert_eq!(r.sized_string(Some(64)), "VARCHAR(64)");
        assert_eq!(r.sized_string(Some(127)), "VARCHAR(127)");
        assert_eq!(r.sized_string(Some(128)), "TINYTEXT");
        assert_eq!(r.sized_string(Some(255)), "TINYTEXT");
        assert_eq!(r.sized_string(Some(256)), "TEXT");
        assert_eq!(r.sized_string(None), "TEXT");
    }

    #[test]
    fn test_classify() {
        let r = rules();
        assert_eq!(r.classify("SMALLINT"), ValueKind::SmallintBool);
        assert_eq!(r.classify("int"), ValueKind::Integer);
        assert_eq!(r.classify("DATETIME(3)"), ValueKind::Timestamp);
        assert_eq!(r.classify("json"), ValueKind::Structured(ContainerShape::Tagged));
        assert_eq!(
            r.classify("ARRAY<STRING(MAX)>"),
            ValueKind::Structured(ContainerShape::NativeArray)
        );
        assert_eq!(r.classify("VARCHAR(64)"), ValueKind::Text);
    }

    #[test]
    fn test_server_version_parsing() {
        let v = ServerVersion::parse("10.6.12-MariaDB-log");
        assert!(v.mariadb);
        assert!(v.at_least(10, 6, 0));
        let v = ServerVersion::parse("8.0.12");
        assert!(!v.at_least(8, 0, 13));
        let v = ServerVersion::parse("15.4 (Debian 15.4-1.pgdg120+1)");
        assert_eq!((v.major, v.minor), (15, 4));
    }

    #[test]
    fn test_dialect_aliases() {
        assert_eq!(DialectKind::parse("MariaDB").unwrap(), DialectKind::Mysql);
        assert_eq!(DialectKind::parse("postgres").unwrap(), DialectKind::Pgsql);
        assert!(matches!(
            DialectKind::parse("oracle"),
            Err(LoaderError::BackendUnsupported(_))
        ));
    }
}
