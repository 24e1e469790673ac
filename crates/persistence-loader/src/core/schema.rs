//! Schema catalog: attribute and object-class definitions.
//!
//! The catalog is built once per run from one or more JSON schema documents
//! and is immutable afterwards. Attribute lookups resolve every synonym listed
//! under `names` to the same definition; object classes are looked up by their
//! primary name, which is also the table name.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{LoaderError, Result};

/// Name of the universal root object class. Never materialized.
pub const ROOT_CLASS: &str = "top";

/// Returns true for the universal root class.
pub fn is_root_class(name: &str) -> bool {
    name.eq_ignore_ascii_case(ROOT_CLASS)
}

/// A named, typed attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    /// Primary name.
    pub name: String,
    /// Primary name followed by synonyms.
    pub names: Vec<String>,
    /// Abstract syntax identifier (an OID such as `1.3.6.1.4.1.1466.115.121.1.15`).
    pub syntax: String,
    pub multivalued: bool,
    /// Always stored as a structured value regardless of multiplicity.
    pub json_hint: bool,
    pub description: Option<String>,
    /// Additional table this attribute is materialized on.
    pub add_table: Option<String>,
}

impl AttributeDefinition {
    /// Whether values of this attribute go into the dialect's structured type.
    pub fn is_structured(&self) -> bool {
        self.multivalued || self.json_hint
    }
}

/// A named collection of permitted attributes; maps 1:1 to a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectClassDefinition {
    pub name: String,
    /// `may` list, in document order.
    pub allowed_attributes: Vec<String>,
    /// `sup` list, in document order.
    pub super_classes: Vec<String>,
    pub ignore: bool,
    pub extra_included_attributes: Vec<String>,
    pub included_object_classes: Vec<String>,
}

/// One schema document as found on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDocument {
    #[serde(rename = "attributeTypes", default)]
    pub attribute_types: Vec<RawAttribute>,
    #[serde(rename = "objectClasses", default)]
    pub object_classes: Vec<RawObjectClass>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttribute {
    pub names: Vec<String>,
    #[serde(default)]
    pub syntax: Option<String>,
    #[serde(default)]
    pub multivalued: bool,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub rdbm_json_column: bool,
    #[serde(default)]
    pub sql: Option<RawAttributeSql>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttributeSql {
    #[serde(default)]
    pub add_table: Option<String>,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObjectClass {
    pub names: Vec<String>,
    #[serde(default)]
    pub may: Vec<String>,
    #[serde(default)]
    pub sup: Vec<String>,
    #[serde(default)]
    pub sql: Option<RawObjectClassSql>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawObjectClassSql {
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default, rename = "includeObjectClass")]
    pub include_object_class: Vec<String>,
}

impl SchemaDocument {
    /// Parse a schema document from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a schema document.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Directory string syntax; used when nothing else is known about an attribute.
pub const DEFAULT_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.15";

/// Immutable registry of attributes and object classes.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    attributes: Vec<AttributeDefinition>,
    attribute_index: HashMap<String, usize>,
    object_classes: Vec<ObjectClassDefinition>,
    class_index: HashMap<String, usize>,
    fallback_syntax: HashMap<String, String>,
}

impl SchemaCatalog {
    /// Load and validate a catalog from schema files.
    ///
    /// `fallback_syntax` maps attributes defined outside the schema files
    /// (for example by the directory server itself) to their syntax.
    pub fn load<P: AsRef<Path>>(
        paths: &[P],
        fallback_syntax: HashMap<String, String>,
    ) -> Result<Self> {
        let docs = paths
            .iter()
            .map(|p| {
                debug!("Loading schema document {}", p.as_ref().display());
                SchemaDocument::load(p)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_documents(docs, fallback_syntax)
    }

    /// Build and validate a catalog from parsed documents.
    pub fn from_documents(
        docs: Vec<SchemaDocument>,
        fallback_syntax: HashMap<String, String>,
    ) -> Result<Self> {
        let mut catalog = SchemaCatalog {
            fallback_syntax,
            ..Default::default()
        };

        for doc in docs {
            for raw in doc.attribute_types {
                catalog.add_attribute(raw)?;
            }
            for raw in doc.object_classes {
                catalog.add_object_class(raw)?;
            }
        }

        catalog.validate()?;
        Ok(catalog)
    }

    fn add_attribute(&mut self, raw: RawAttribute) -> Result<()> {
        let name = raw
            .names
            .first()
            .cloned()
            .ok_or_else(|| LoaderError::Schema("attribute type without names".into()))?;
        let sql = raw.sql.unwrap_or_default();

        let def = AttributeDefinition {
            name: name.clone(),
            names: raw.names.clone(),
            syntax: raw.syntax.unwrap_or_else(|| DEFAULT_SYNTAX.to_string()),
            multivalued: raw.multivalued,
            json_hint: raw.rdbm_json_column || sql.json,
            description: raw.desc,
            add_table: sql.add_table,
        };

        // Later documents refine earlier definitions of the same attribute.
        let idx = match self.attribute_index.get(&name) {
            Some(&idx) => {
                debug!("Attribute {} redefined by a later schema document", name);
                self.attributes[idx] = def;
                idx
            }
            None => {
                self.attributes.push(def);
                self.attributes.len() - 1
            }
        };
        for synonym in raw.names {
            self.attribute_index.insert(synonym, idx);
        }
        Ok(())
    }

    fn add_object_class(&mut self, raw: RawObjectClass) -> Result<()> {
        let name = raw
            .names
            .first()
            .cloned()
            .ok_or_else(|| LoaderError::Schema("object class without names".into()))?;

        if self.class_index.contains_key(&name) {
            return Err(LoaderError::Schema(format!(
                "duplicate object class (table name) '{}'",
                name
            )));
        }

        let sql = raw.sql.unwrap_or_default();
        self.object_classes.push(ObjectClassDefinition {
            name: name.clone(),
            allowed_attributes: raw.may,
            super_classes: raw.sup,
            ignore: sql.ignore,
            extra_included_attributes: sql.include,
            included_object_classes: sql.include_object_class,
        });
        self.class_index.insert(name, self.object_classes.len() - 1);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for oc in &self.object_classes {
            for attr in &oc.allowed_attributes {
                if !self.knows_attribute(attr) {
                    return Err(LoaderError::Schema(format!(
                        "object class '{}' allows unknown attribute '{}'",
                        oc.name, attr
                    )));
                }
            }
            for sup in &oc.super_classes {
                if !is_root_class(sup) && !self.class_index.contains_key(sup) {
                    return Err(LoaderError::Schema(format!(
                        "object class '{}' inherits from unknown class '{}'",
                        oc.name, sup
                    )));
                }
            }
            for inc in &oc.included_object_classes {
                if !self.class_index.contains_key(inc) {
                    return Err(LoaderError::Schema(format!(
                        "object class '{}' includes unknown class '{}'",
                        oc.name, inc
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up an attribute by any of its names.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attribute_index
            .get(name)
            .map(|&idx| &self.attributes[idx])
    }

    /// Look up an object class by primary name.
    pub fn object_class(&self, name: &str) -> Option<&ObjectClassDefinition> {
        self.class_index
            .get(name)
            .map(|&idx| &self.object_classes[idx])
    }

    /// All object classes in document order.
    pub fn object_classes(&self) -> &[ObjectClassDefinition] {
        &self.object_classes
    }

    /// All attributes in document order.
    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    /// Syntax of an attribute, from the schema or the fallback map.
    pub fn syntax_of(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .map(|a| a.syntax.as_str())
            .or_else(|| self.fallback_syntax.get(name).map(String::as_str))
    }

    /// Whether the attribute is defined anywhere.
    pub fn knows_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some() || self.fallback_syntax.contains_key(name)
    }

    /// Whether the attribute is multivalued or JSON-hinted.
    pub fn is_structured(&self, name: &str) -> bool {
        self.attribute(name)
            .map(AttributeDefinition::is_structured)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> SchemaDocument {
        SchemaDocument::from_json(
            r#"{
                "attributeTypes": [
                    {"names": ["role"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "multivalued": true},
                    {"names": ["mail", "email"], "syntax": "1.3.6.1.4.1.1466.115.121.1.26"},
                    {"names": ["jansConfDyn"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "rdbm_json_column": true}
                ],
                "objectClasses": [
                    {"names": ["jansPerson"], "may": ["role", "mail"], "sup": ["top"]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_synonyms_resolve_to_same_definition() {
        let catalog = SchemaCatalog::from_documents(vec![doc()], HashMap::new()).unwrap();
        let a = catalog.attribute("mail").unwrap();
        let b = catalog.attribute("email").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "mail");
    }

    #[test]
    fn test_json_hint_marks_structured() {
        let catalog = SchemaCatalog::from_documents(vec![doc()], HashMap::new()).unwrap();
        assert!(catalog.is_structured("role"));
        assert!(catalog.is_structured("jansConfDyn"));
        assert!(!catalog.is_structured("mail"));
    }

    #[test]
    fn test_unknown_allowed_attribute_is_schema_error() {
        let bad = SchemaDocument::from_json(
            r#"{"objectClasses": [{"names": ["jansGrp"], "may": ["nope"]}]}"#,
        )
        .unwrap();
        let err = SchemaCatalog::from_documents(vec![bad], HashMap::new()).unwrap_err();
        assert!(matches!(err, LoaderError::Schema(_)));
    }

    #[test]
    fn test_fallback_syntax_satisfies_validation() {
        let doc = SchemaDocument::from_json(
            r#"{"objectClasses": [{"names": ["jansGrp"], "may": ["owner"]}]}"#,
        )
        .unwrap();
        let fallback = HashMap::from([(
            "owner".to_string(),
            "1.3.6.1.4.1.1466.115.121.1.12".to_string(),
        )]);
        let catalog = SchemaCatalog::from_documents(vec![doc], fallback).unwrap();
        assert_eq!(catalog.syntax_of("owner"), Some("1.3.6.1.4.1.1466.115.121.1.12"));
    }

    #[test]
    fn test_duplicate_table_across_documents_is_rejected() {
        let err = SchemaCatalog::from_documents(vec![doc(), doc()], HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate object class"));
    }

    #[test]
    fn test_unknown_superclass_is_rejected() {
        let bad = SchemaDocument::from_json(
            r#"{"objectClasses": [{"names": ["jansGrp"], "sup": ["groupOfThings"]}]}"#,
        )
        .unwrap();
        assert!(SchemaCatalog::from_documents(vec![bad], HashMap::new()).is_err());
    }
}
