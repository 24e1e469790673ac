//! Policy documents: type overrides, syntax mapping, index policy, subtables.
//!
//! Profile differences between deployments are expressed here as data; the
//! planners never branch on which profile is running.

mod index;
mod subtables;
mod types;

pub use index::{CommonIndexPolicy, IndexPolicy, TableIndexPolicy};
pub use subtables::SubtablePolicy;
pub use types::{DialectTypes, TypeDef, TypePolicy};

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::PolicyConfig;
use crate::core::rules::DialectKind;
use crate::error::{LoaderError, Result};

/// Every policy document the planners consult, for one dialect.
#[derive(Debug, Clone)]
pub struct Policies {
    pub dialect: DialectKind,
    pub types: TypePolicy,
    pub index: IndexPolicy,
    pub sub_tables: SubtablePolicy,
    /// Attributes indexed by the directory backend.
    pub directory_index: Vec<String>,
}

impl Policies {
    /// Bundled policies for a dialect: syntax mapping and index policy only.
    pub fn builtin(dialect: DialectKind) -> Result<Self> {
        Ok(Self {
            dialect,
            types: TypePolicy::builtin()?,
            index: IndexPolicy::builtin(dialect)?,
            sub_tables: SubtablePolicy::default(),
            directory_index: Vec::new(),
        })
    }

    /// Load the configured documents, using bundled ones where a path is absent.
    pub fn load(config: &PolicyConfig, dialect: DialectKind) -> Result<Self> {
        let types = TypePolicy::load(
            config.data_types.as_deref(),
            config.syntax_mapping.as_deref(),
        )?;
        let index = match &config.index {
            Some(path) => IndexPolicy::load(path)?,
            None => IndexPolicy::builtin(dialect)?,
        };
        let sub_tables = match &config.sub_tables {
            Some(path) => SubtablePolicy::load(path, dialect)?,
            None => SubtablePolicy::default(),
        };
        let directory_index = match &config.directory_index {
            Some(path) => load_directory_index(path)?,
            None => Vec::new(),
        };
        Ok(Self {
            dialect,
            types,
            index,
            sub_tables,
            directory_index,
        })
    }
}

/// Directory index entries are either bare names or `{"attribute": name}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryIndexEntry {
    Name(String),
    Entry { attribute: String },
}

fn load_directory_index(path: &Path) -> Result<Vec<String>> {
    let entries: Vec<DirectoryIndexEntry> = read_policy(path)?;
    Ok(entries
        .into_iter()
        .map(|e| match e {
            DirectoryIndexEntry::Name(n) => n,
            DirectoryIndexEntry::Entry { attribute } => attribute,
        })
        .collect())
}

/// Read and parse a policy document.
pub(crate) fn read_policy<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading policy document {}", path.display());
    let text = std::fs::read_to_string(path)?;
    parse_policy(&path.display().to_string(), &text)
}

/// Parse a policy document; shape errors are policy errors, not JSON errors.
pub(crate) fn parse_policy<T: DeserializeOwned>(label: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| LoaderError::Policy(format!("{}: {}", label, e)))
}
