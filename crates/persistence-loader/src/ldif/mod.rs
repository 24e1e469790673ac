//! Directory entry input: LDIF parsing, DN handling and placeholder rendering.

mod dn;
mod parser;
mod render;

pub use dn::{doc_id_from_dn, parse_dn, Rdn};
pub use parser::parse_ldif;
pub use render::render_placeholders;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::core::layout::OBJECT_CLASS;
use crate::error::Result;

/// One directory entry: a DN and its attribute values in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: Vec<(String, Vec<String>)>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Append one value. Attribute names match case-insensitively.
    pub fn push(&mut self, attribute: impl Into<String>, value: impl Into<String>) {
        let attribute = attribute.into();
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|(a, _)| a.eq_ignore_ascii_case(&attribute))
        {
            Some((_, values)) => values.push(value),
            None => self.attributes.push((attribute, vec![value])),
        }
    }

    /// Builder form of [`push`](Self::push) for several values.
    pub fn with(mut self, attribute: &str, values: &[&str]) -> Self {
        for v in values {
            self.push(attribute, *v);
        }
        self
    }

    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v.as_slice())
            .unwrap_or_default()
    }

    pub fn object_classes(&self) -> Vec<&str> {
        self.values(OBJECT_CLASS).iter().map(String::as_str).collect()
    }
}

/// Operation of one modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Add,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ModifyOp,
    pub attribute: String,
    pub values: Vec<String>,
}

/// One LDIF record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdifRecord {
    Entry(DirectoryEntry),
    Modify {
        dn: String,
        changes: Vec<Modification>,
    },
}

/// Read an LDIF file, render `%(key)s` placeholders from `context`, and parse it.
pub fn read_ldif(path: &Path, context: &BTreeMap<String, String>) -> Result<Vec<LdifRecord>> {
    debug!("Reading {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let rendered = render_placeholders(&text, context);
    parse_ldif(path, &rendered)
}

/// Every `*.ldif` file under `dir`, recursively, in sorted path order.
pub fn collect_ldif_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("ldif"))
            .unwrap_or(false)
        {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ldif_renders_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.ldif");
        std::fs::write(
            &path,
            "dn: inum=%(admin_inum)s,ou=people,o=jans\nobjectClass: jansPerson\nuid: %(unknown)s\n",
        )
        .unwrap();
        let context = BTreeMap::from([("admin_inum".to_string(), "60B7".to_string())]);

        let records = read_ldif(&path, &context).unwrap();
        let LdifRecord::Entry(entry) = &records[0] else {
            panic!("expected entry");
        };
        assert_eq!(entry.dn, "inum=60B7,ou=people,o=jans");
        assert_eq!(entry.values("uid"), ["%(unknown)s"]);
    }

    #[test]
    fn test_collect_ldif_files_recursive_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.ldif"), "").unwrap();
        std::fs::write(dir.path().join("nested/a.LDIF"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("skip.ldif")).unwrap();

        let files = collect_ldif_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("b.ldif"), PathBuf::from("nested/a.LDIF")]);
    }

    #[test]
    fn test_entry_attribute_names_case_insensitive() {
        let entry = DirectoryEntry::new("o=jans")
            .with("objectClass", &["top"])
            .with("objectclass", &["jansOrganization"]);
        assert_eq!(entry.object_classes(), vec!["top", "jansOrganization"]);
        assert!(entry.values("missing").is_empty());
    }
}
