//! Type override and syntax mapping documents.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::rules::DialectKind;
use crate::error::Result;

use super::read_policy;

const BUILTIN_SYNTAX_MAPPING: &str = include_str!("../../data/syntax_mapping.json");

/// One dialect's type entry: a type name, an optional size, and optional
/// per-table refinements.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypeDef {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub tables: BTreeMap<String, TypeDef>,
}

impl TypeDef {
    /// `TYPE(size)` when a size is given, else the bare type name.
    pub fn render(&self) -> String {
        match self.size {
            Some(size) => format!("{}({})", self.type_name, size),
            None => self.type_name.clone(),
        }
    }
}

/// Entries keyed by dialect name.
pub type DialectTypes = BTreeMap<String, TypeDef>;

/// Pick a dialect's entry; non-Spanner dialects fall back to the `mysql` entry.
fn pick(entry: &DialectTypes, dialect: DialectKind) -> Option<&TypeDef> {
    entry.get(dialect.as_str()).or_else(|| match dialect {
        DialectKind::Spanner => None,
        _ => entry.get(DialectKind::Mysql.as_str()),
    })
}

/// Explicit overrides plus the syntax → type mapping.
#[derive(Debug, Clone, Default)]
pub struct TypePolicy {
    overrides: BTreeMap<String, DialectTypes>,
    syntax: BTreeMap<String, DialectTypes>,
}

impl TypePolicy {
    pub fn new(
        overrides: BTreeMap<String, DialectTypes>,
        syntax: BTreeMap<String, DialectTypes>,
    ) -> Self {
        Self { overrides, syntax }
    }

    /// Bundled syntax mapping, no overrides.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(
            BTreeMap::new(),
            super::parse_policy("bundled syntax mapping", BUILTIN_SYNTAX_MAPPING)?,
        ))
    }

    /// Load the override document and the syntax mapping (bundled when `None`).
    pub fn load(data_types: Option<&Path>, syntax_mapping: Option<&Path>) -> Result<Self> {
        let overrides = match data_types {
            Some(path) => read_policy(path)?,
            None => BTreeMap::new(),
        };
        let syntax = match syntax_mapping {
            Some(path) => read_policy(path)?,
            None => super::parse_policy("bundled syntax mapping", BUILTIN_SYNTAX_MAPPING)?,
        };
        Ok(Self::new(overrides, syntax))
    }

    /// Explicit override for an attribute.
    ///
    /// A `table:attr` key wins over the attribute's own entry, whose
    /// `tables` refinement wins over its dialect default.
    pub fn override_for(
        &self,
        attr: &str,
        dialect: DialectKind,
        table: Option<&str>,
    ) -> Option<&TypeDef> {
        if let Some(table) = table {
            let scoped = self
                .overrides
                .get(&format!("{}:{}", table, attr))
                .and_then(|e| pick(e, dialect));
            if scoped.is_some() {
                return scoped;
            }
        }
        let def = pick(self.overrides.get(attr)?, dialect)?;
        Some(table.and_then(|t| def.tables.get(t)).unwrap_or(def))
    }

    /// Syntax mapping entry for a dialect.
    pub fn syntax_for(&self, syntax: &str, dialect: DialectKind) -> Option<&TypeDef> {
        pick(self.syntax.get(syntax)?, dialect)
    }

    pub fn has_override(&self, attr: &str) -> bool {
        self.overrides.contains_key(attr)
    }
}
