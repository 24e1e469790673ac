//! Directory entries → table rows.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::layout::{
    is_mandatory_column, SubtableSpec, TableSpec, DICT_DOC_ID, DN, DOC_ID, OBJECT_CLASS,
};
use crate::core::rules::ValueKind;
use crate::core::schema::is_root_class;
use crate::core::traits::Dialect;
use crate::core::value::{Row, SqlValue};
use crate::error::{LoaderError, Result};
use crate::ldif::{doc_id_from_dn, DirectoryEntry, Modification, ModifyOp};
use crate::planner::TablePlan;

use super::value::{read_back, typed_value};

/// Classes whose entries only structure the tree and carry no column data.
const CONTAINER_CLASSES: [&str; 1] = ["organizationalUnit"];

/// Rows produced from one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedEntry {
    pub table: String,
    pub row: Row,
    /// `(subtable, row)` pairs, one per subtable value.
    pub subtable_rows: Vec<(String, Row)>,
}

/// Where an attribute is stored on a table.
#[derive(Debug, Clone, Copy)]
pub enum ColumnTarget<'p> {
    Column { name: &'p str, kind: ValueKind },
    Subtable(&'p SubtableSpec),
}

/// Maps entries onto the planned layout. Column kinds come from the planned
/// column types, so values always match the DDL that created the table.
pub struct EntryTransformer<'a> {
    plan: &'a TablePlan,
    dialect: &'a dyn Dialect,
}

impl<'a> EntryTransformer<'a> {
    pub fn new(plan: &'a TablePlan, dialect: &'a dyn Dialect) -> Self {
        Self { plan, dialect }
    }

    /// Most specific (last non-root) object class of an entry.
    pub fn table_for<'e>(&self, entry: &'e DirectoryEntry) -> Option<&'e str> {
        entry
            .object_classes()
            .into_iter()
            .filter(|c| !is_root_class(c))
            .last()
    }

    /// Storage target of `attribute` on `table`; attribute names match case-insensitively.
    pub fn target(&self, table: &str, attribute: &str) -> Option<ColumnTarget<'a>> {
        if let Some(sub) = self
            .plan
            .subtables
            .iter()
            .find(|s| s.parent_table == table && s.column.eq_ignore_ascii_case(attribute))
        {
            return Some(ColumnTarget::Subtable(sub));
        }
        let column = self
            .plan
            .table(table)?
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(attribute))?;
        Some(ColumnTarget::Column {
            name: &column.name,
            kind: self.dialect.classify(&column.backend_type),
        })
    }

    /// Rows for one entry, or `None` for container entries.
    pub fn transform(&self, entry: &DirectoryEntry) -> Result<Option<TransformedEntry>> {
        let Some(class) = self.table_for(entry) else {
            return Err(LoaderError::value(
                OBJECT_CLASS,
                format!("entry {} has no object class", entry.dn),
            ));
        };
        if CONTAINER_CLASSES.iter().any(|c| c.eq_ignore_ascii_case(class)) {
            debug!("{}: container entry, no row", entry.dn);
            return Ok(None);
        }
        let table = self.require_table(class)?;
        let doc_id = doc_id_from_dn(&entry.dn)?;

        let mut row = Row::new();
        row.insert(DOC_ID, SqlValue::from(doc_id.as_str()));
        row.insert(OBJECT_CLASS, SqlValue::from(class));
        row.insert(DN, SqlValue::from(entry.dn.as_str()));

        let mut subtable_rows = Vec::new();
        for (attribute, values) in &entry.attributes {
            if attribute.eq_ignore_ascii_case(OBJECT_CLASS) {
                continue;
            }
            match self.target(&table.name, attribute) {
                Some(ColumnTarget::Column { name, .. }) if is_mandatory_column(name) => {}
                Some(ColumnTarget::Column { name, kind }) => {
                    row.insert(name, typed_value(name, kind, values)?);
                }
                Some(ColumnTarget::Subtable(sub)) => {
                    for r in self.subtable_rows(sub, &doc_id, values)? {
                        subtable_rows.push((sub.name.clone(), r));
                    }
                }
                None => debug!(
                    "{}: {} is not a column of {}, dropped",
                    entry.dn, attribute, table.name
                ),
            }
        }

        // Structured columns are never left NULL.
        for column in &table.columns {
            if row.contains(&column.name) {
                continue;
            }
            if let kind @ ValueKind::Structured(_) = self.dialect.classify(&column.backend_type) {
                row.insert(column.name.as_str(), typed_value(&column.name, kind, &[])?);
            }
        }

        Ok(Some(TransformedEntry {
            table: table.name.clone(),
            row,
            subtable_rows,
        }))
    }

    /// One subtable row per value, keyed by the parent `doc_id` and the value digest.
    pub fn subtable_rows(
        &self,
        sub: &SubtableSpec,
        doc_id: &str,
        values: &[String],
    ) -> Result<Vec<Row>> {
        let kind = self.dialect.classify(&sub.value_type);
        values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert(DOC_ID, SqlValue::from(doc_id));
                row.insert(DICT_DOC_ID, SqlValue::from(value_digest(v)));
                row.insert(
                    sub.column.as_str(),
                    typed_value(&sub.column, kind, std::slice::from_ref(v))?,
                );
                Ok(row)
            })
            .collect()
    }

    /// New column value after a modification.
    ///
    /// `add` appends to structured columns and sets scalars; `replace`
    /// overwrites with the typed value list.
    pub fn modified_value(
        &self,
        column: &str,
        kind: ValueKind,
        current: Option<&SqlValue>,
        change: &Modification,
    ) -> Result<SqlValue> {
        match (change.op, kind) {
            (ModifyOp::Add, ValueKind::Structured(_)) => {
                let mut values = current.map(|v| read_back(kind, v)).unwrap_or_default();
                values.extend(change.values.iter().cloned());
                typed_value(column, kind, &values)
            }
            _ => typed_value(column, kind, &change.values),
        }
    }

    fn require_table(&self, class: &str) -> Result<&'a TableSpec> {
        self.plan
            .tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(class))
            .ok_or_else(|| {
                LoaderError::Schema(format!("no table for object class '{}'", class))
            })
    }
}

/// Hex SHA-256 of a subtable value.
pub fn value_digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::layout::ColumnSpec;
    use crate::drivers::{MysqlDialect, PostgresDialect, SpannerDialect};

    fn person_plan(json_type: &str, subtable: Option<SubtableSpec>) -> TablePlan {
        let mut person = TableSpec::new("jansPerson");
        person.push_column(ColumnSpec::new(DOC_ID, "VARCHAR(64)").primary_key());
        person.push_column(ColumnSpec::new(OBJECT_CLASS, "VARCHAR(48)"));
        person.push_column(ColumnSpec::new(DN, "VARCHAR(128)"));
        person.push_column(ColumnSpec::new("uid", "VARCHAR(64)"));
        person.push_column(ColumnSpec::new("role", json_type));
        person.push_column(ColumnSpec::new("jansStatus", json_type));
        person.push_column(ColumnSpec::new("jansActive", "SMALLINT"));
        person.push_column(ColumnSpec::new("jansLastLogonTime", "DATETIME(3)"));
        TablePlan {
            tables: vec![person],
            subtables: subtable.into_iter().collect(),
        }
    }

    fn admin() -> DirectoryEntry {
        DirectoryEntry::new("inum=60B7,ou=people,o=jans")
            .with("objectClass", &["top", "jansPerson"])
            .with("uid", &["admin"])
            .with("role", &["admin"])
            .with("jansActive", &["true"])
            .with("jansLastLogonTime", &["20240101000000Z"])
            .with("unknownAttr", &["x"])
    }

    #[test]
    fn test_transform_entry_mysql() {
        let plan = person_plan("JSON", None);
        let dialect = MysqlDialect::new();
        let out = EntryTransformer::new(&plan, &dialect)
            .transform(&admin())
            .unwrap()
            .unwrap();

        assert_eq!(out.table, "jansPerson");
        assert_eq!(out.row.doc_id(), Some("60B7"));
        assert_eq!(out.row.get(OBJECT_CLASS), Some(&SqlValue::from("jansPerson")));
        assert_eq!(out.row.get("role"), Some(&SqlValue::Json(json!({"v": ["admin"]}))));
        assert_eq!(out.row.get("jansStatus"), Some(&SqlValue::Json(json!({"v": []}))));
        assert_eq!(out.row.get("jansActive"), Some(&SqlValue::I16(1)));
        assert!(matches!(out.row.get("jansLastLogonTime"), Some(SqlValue::Timestamp(_))));
        assert!(!out.row.contains("unknownAttr"));
        assert!(out.subtable_rows.is_empty());
    }

    #[test]
    fn test_empty_container_is_bare_on_postgres() {
        let plan = person_plan("JSONB", None);
        let dialect = PostgresDialect::new();
        let out = EntryTransformer::new(&plan, &dialect)
            .transform(&admin())
            .unwrap()
            .unwrap();
        assert_eq!(out.row.get("jansStatus"), Some(&SqlValue::Json(json!([]))));
        assert_eq!(out.row.get("role"), Some(&SqlValue::Json(json!(["admin"]))));
    }

    #[test]
    fn test_container_entry_produces_no_row() {
        let plan = person_plan("JSON", None);
        let dialect = MysqlDialect::new();
        let ou = DirectoryEntry::new("ou=people,o=jans")
            .with("objectClass", &["top", "organizationalUnit"])
            .with("ou", &["people"]);
        assert!(EntryTransformer::new(&plan, &dialect)
            .transform(&ou)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_class_and_missing_class() {
        let plan = person_plan("JSON", None);
        let dialect = MysqlDialect::new();
        let t = EntryTransformer::new(&plan, &dialect);
        let other = DirectoryEntry::new("inum=1,o=jans").with("objectClass", &["jansNope"]);
        assert!(matches!(t.transform(&other), Err(LoaderError::Schema(_))));
        let bare = DirectoryEntry::new("inum=1,o=jans").with("uid", &["x"]);
        assert!(matches!(t.transform(&bare), Err(LoaderError::Value { .. })));
    }

    #[test]
    fn test_subtable_values_become_rows() {
        let sub = SubtableSpec::new("jansPerson", "mail", "STRING(MAX)", "STRING(64)");
        let plan = person_plan("ARRAY<STRING(MAX)>", Some(sub));
        let dialect = SpannerDialect::new();
        let entry = admin().with("mail", &["a@example.org", "b@example.org"]);
        let out = EntryTransformer::new(&plan, &dialect)
            .transform(&entry)
            .unwrap()
            .unwrap();

        assert!(!out.row.contains("mail"));
        assert_eq!(out.subtable_rows.len(), 2);
        let (name, row) = &out.subtable_rows[0];
        assert_eq!(name, "jansPerson_mail");
        assert_eq!(row.doc_id(), Some("60B7"));
        assert_eq!(
            row.get(DICT_DOC_ID),
            Some(&SqlValue::from(value_digest("a@example.org")))
        );
        assert_eq!(row.get("mail"), Some(&SqlValue::from("a@example.org")));
        assert_eq!(out.row.get("role"), Some(&SqlValue::TextArray(vec!["admin".into()])));
    }

    #[test]
    fn test_modified_values() {
        let plan = person_plan("JSON", None);
        let dialect = MysqlDialect::new();
        let t = EntryTransformer::new(&plan, &dialect);
        let Some(ColumnTarget::Column { name, kind }) = t.target("jansPerson", "ROLE") else {
            panic!("expected column");
        };
        assert_eq!(name, "role");

        let add = Modification {
            op: ModifyOp::Add,
            attribute: "role".into(),
            values: vec!["auditor".into()],
        };
        let current = SqlValue::Json(json!({"v": ["admin"]}));
        assert_eq!(
            t.modified_value(name, kind, Some(&current), &add).unwrap(),
            SqlValue::Json(json!({"v": ["admin", "auditor"]}))
        );

        let replace = Modification {
            op: ModifyOp::Replace,
            ..add
        };
        assert_eq!(
            t.modified_value(name, kind, Some(&current), &replace).unwrap(),
            SqlValue::Json(json!({"v": ["auditor"]}))
        );
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(value_digest("a"), value_digest("a"));
        assert_eq!(value_digest("a").len(), 64);
    }
}
