//! Object classes → table and subtable layouts.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::core::identifier::validate_identifier;
use crate::core::layout::{
    is_mandatory_column, ColumnSpec, IndexSpec, SubtableSpec, TableSpec, DN, DOC_ID,
    OBJECT_CLASS,
};
use crate::core::schema::{is_root_class, ObjectClassDefinition, SchemaCatalog};
use crate::core::traits::{BackendAdapter, Dialect};
use crate::error::{LoaderError, Result};
use crate::policy::SubtablePolicy;
use crate::report::SweepReport;
use crate::typemap::TypeResolver;

use super::IndexPlanner;

/// Desired layout derived from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePlan {
    pub tables: Vec<TableSpec>,
    pub subtables: Vec<SubtableSpec>,
}

impl TablePlan {
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn subtables_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a SubtableSpec> {
        self.subtables.iter().filter(move |s| s.parent_table == table)
    }

    /// Every index for the plan: tables first, then subtables.
    pub fn indexes(&self, planner: &IndexPlanner<'_>) -> Vec<IndexSpec> {
        let mut indexes: Vec<IndexSpec> =
            self.tables.iter().flat_map(|t| planner.plan(t)).collect();
        indexes.extend(self.subtables.iter().filter_map(|s| planner.plan_subtable(s)));
        indexes
    }

    /// Create every table and subtable the backend reports absent.
    ///
    /// Existing tables produce no DDL. Failures are collected and the sweep
    /// moves on to the next table.
    pub async fn create_missing(&self, adapter: &dyn BackendAdapter) -> SweepReport {
        let mut report = SweepReport::default();

        for table in &self.tables {
            match adapter.table_exists(&table.name).await {
                Ok(true) => {
                    debug!("{}: already exists", table.name);
                    report.record_skipped();
                }
                Ok(false) => {
                    info!("Creating table {} ({} columns)", table.name, table.columns.len());
                    report.record(&table.name, adapter.create_table(table).await);
                }
                Err(e) => report.record_failure(&table.name, e),
            }
        }

        for sub in &self.subtables {
            match adapter.table_exists(&sub.name).await {
                Ok(true) => report.record_skipped(),
                Ok(false) => {
                    info!("Creating subtable {} for {}", sub.name, sub.parent_table);
                    report.record(&sub.name, adapter.create_subtable(sub).await);
                }
                Err(e) => report.record_failure(&sub.name, e),
            }
        }

        report
    }
}

/// Turns object classes into [`TableSpec`]s and [`SubtableSpec`]s.
pub struct TablePlanner<'a> {
    catalog: &'a SchemaCatalog,
    resolver: TypeResolver<'a>,
    sub_tables: &'a SubtablePolicy,
    dialect: &'a dyn Dialect,
}

impl<'a> TablePlanner<'a> {
    pub fn new(
        resolver: TypeResolver<'a>,
        sub_tables: &'a SubtablePolicy,
        dialect: &'a dyn Dialect,
    ) -> Self {
        Self {
            catalog: resolver.catalog(),
            resolver,
            sub_tables,
            dialect,
        }
    }

    /// Plan every non-ignored object class, in catalog order.
    pub fn plan(&self) -> Result<TablePlan> {
        let mut plan = TablePlan::default();
        for oc in self.catalog.object_classes() {
            if oc.ignore || is_root_class(&oc.name) {
                debug!("Skipping object class {}", oc.name);
                continue;
            }
            let (table, subtables) = self.plan_class(oc)?;
            plan.tables.push(table);
            plan.subtables.extend(subtables);
        }
        Ok(plan)
    }

    /// Table and subtables for one object class.
    pub fn plan_class(
        &self,
        oc: &ObjectClassDefinition,
    ) -> Result<(TableSpec, Vec<SubtableSpec>)> {
        validate_identifier(&oc.name)?;
        let table_name = oc.name.as_str();
        let doc_id_type = self.resolver.resolve(DOC_ID, self.dialect, Some(table_name));

        let mut table = TableSpec::new(table_name);
        table.push_column(ColumnSpec::new(DOC_ID, doc_id_type.clone()).primary_key());
        table.push_column(ColumnSpec::new(
            OBJECT_CLASS,
            self.resolver.resolve(OBJECT_CLASS, self.dialect, Some(table_name)),
        ));
        table.push_column(ColumnSpec::new(
            DN,
            self.resolver.resolve(DN, self.dialect, Some(table_name)),
        ));

        let mut subtables = Vec::new();
        for attr in self.attributes_of(oc)? {
            if is_mandatory_column(&attr) || table.has_column(&attr) {
                continue;
            }
            validate_identifier(&attr)?;

            if let Some((_, value_type)) = self
                .sub_tables
                .for_table(table_name)
                .iter()
                .find(|(c, _)| *c == attr)
            {
                if subtables.iter().any(|s: &SubtableSpec| s.column == attr) {
                    continue;
                }
                debug!("{}.{} stored in a subtable", table_name, attr);
                subtables.push(SubtableSpec::new(
                    table_name,
                    attr.as_str(),
                    value_type.as_str(),
                    doc_id_type.as_str(),
                ));
                continue;
            }

            let backend_type = self.resolver.resolve(&attr, self.dialect, Some(table_name));
            let description = self
                .catalog
                .attribute(&attr)
                .and_then(|a| a.description.clone());
            table.push_column(ColumnSpec::new(attr, backend_type).with_description(description));
        }

        Ok((table, subtables))
    }

    /// Attribute names of a class in discovery order: own `may`, explicit
    /// includes, included classes, transitive superclasses, then attributes
    /// that name this table in `add_table`. Duplicates are kept; the caller
    /// collapses them.
    fn attributes_of(&self, oc: &ObjectClassDefinition) -> Result<Vec<String>> {
        let mut attrs: Vec<String> = oc.allowed_attributes.clone();
        attrs.extend(oc.extra_included_attributes.iter().cloned());

        for included in &oc.included_object_classes {
            let class = self.require_class(&oc.name, included)?;
            attrs.extend(class.allowed_attributes.iter().cloned());
        }

        let mut visited: HashSet<&str> = HashSet::from([oc.name.as_str()]);
        let mut pending: Vec<&str> = oc.super_classes.iter().map(String::as_str).collect();
        pending.reverse();
        while let Some(sup) = pending.pop() {
            if is_root_class(sup) || !visited.insert(sup) {
                continue;
            }
            let class = self.require_class(&oc.name, sup)?;
            attrs.extend(class.allowed_attributes.iter().cloned());
            pending.extend(class.super_classes.iter().rev().map(String::as_str));
        }

        attrs.extend(
            self.catalog
                .attributes()
                .iter()
                .filter(|a| a.add_table.as_deref() == Some(oc.name.as_str()))
                .map(|a| a.name.clone()),
        );
        Ok(attrs)
    }

    fn require_class(&self, owner: &str, name: &str) -> Result<&'a ObjectClassDefinition> {
        self.catalog.object_class(name).ok_or_else(|| {
            LoaderError::Schema(format!(
                "object class '{}' references unknown class '{}'",
                owner, name
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    use crate::core::rules::ServerVersion;
    use crate::core::schema::SchemaDocument;
    use crate::drivers::{MemoryAdapter, MysqlDialect, SpannerDialect};
    use crate::policy::TypePolicy;

    fn catalog() -> SchemaCatalog {
        let doc = SchemaDocument::from_json(
            r#"{
                "attributeTypes": [
                    {"names": ["jansLogoutURI"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "multivalued": true},
                    {"names": ["o"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "desc": "Organization"},
                    {"names": ["mail"], "syntax": "1.3.6.1.4.1.1466.115.121.1.26", "multivalued": true},
                    {"names": ["uid"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15"},
                    {"names": ["cn"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15"},
                    {"names": ["jansExtraAttr"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "sql": {"add_table": "jansPerson"}}
                ],
                "objectClasses": [
                    {"names": ["jansClnt"], "may": ["jansLogoutURI"], "sup": ["top"], "sql": {"include": ["o"]}},
                    {"names": ["jansBase"], "may": ["cn"], "sup": ["top"]},
                    {"names": ["jansPerson"], "may": ["uid", "mail", "o"], "sup": ["jansBase"]},
                    {"names": ["jansEmpty"], "sup": ["top"]},
                    {"names": ["jansHidden"], "may": ["cn"], "sql": {"ignore": true}},
                    {"names": ["jansBorrow"], "may": ["uid"], "sql": {"includeObjectClass": ["jansClnt"]}}
                ]
            }"#,
        )
        .unwrap();
        SchemaCatalog::from_documents(vec![doc], HashMap::new()).unwrap()
    }

    fn names(table: &TableSpec) -> Vec<&str> {
        table.column_names()
    }

    #[test]
    fn test_include_adds_column() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = MysqlDialect::new();
        let subs = SubtablePolicy::default();
        let planner = TablePlanner::new(TypeResolver::new(&c, &p), &subs, &dialect);
        let plan = planner.plan().unwrap();

        let clnt = plan.table("jansClnt").unwrap();
        assert_eq!(names(clnt), vec!["doc_id", "objectClass", "dn", "jansLogoutURI", "o"]);
        assert_eq!(clnt.primary_key(), vec!["doc_id"]);
        assert_eq!(clnt.column("jansLogoutURI").unwrap().backend_type, "JSON");
        assert_eq!(
            clnt.column("o").unwrap().description.as_deref(),
            Some("Organization")
        );
    }

    #[test]
    fn test_superclass_and_add_table() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = MysqlDialect::new();
        let subs = SubtablePolicy::default();
        let plan = TablePlanner::new(TypeResolver::new(&c, &p), &subs, &dialect)
            .plan()
            .unwrap();

        let person = plan.table("jansPerson").unwrap();
        assert_eq!(
            names(person),
            vec!["doc_id", "objectClass", "dn", "uid", "mail", "o", "cn", "jansExtraAttr"]
        );
        assert!(plan.table("jansHidden").is_none());

        let borrow = plan.table("jansBorrow").unwrap();
        assert_eq!(names(borrow), vec!["doc_id", "objectClass", "dn", "uid", "jansLogoutURI"]);
    }

    #[test]
    fn test_empty_class_gets_mandatory_columns() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = MysqlDialect::new();
        let subs = SubtablePolicy::default();
        let plan = TablePlanner::new(TypeResolver::new(&c, &p), &subs, &dialect)
            .plan()
            .unwrap();
        assert_eq!(names(plan.table("jansEmpty").unwrap()), vec!["doc_id", "objectClass", "dn"]);
    }

    #[test]
    fn test_subtable_designation_removes_column() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = SpannerDialect::new();
        let subs = SubtablePolicy::new(BTreeMap::from([(
            "jansPerson".to_string(),
            vec![("mail".to_string(), "STRING(MAX)".to_string())],
        )]));
        let plan = TablePlanner::new(TypeResolver::new(&c, &p), &subs, &dialect)
            .plan()
            .unwrap();

        let person = plan.table("jansPerson").unwrap();
        assert!(!person.has_column("mail"));
        let sub = plan.subtables_of("jansPerson").next().unwrap();
        assert_eq!(sub.name, "jansPerson_mail");
        assert_eq!(sub.key_type, "STRING(64)");
        assert_eq!(sub.value_type, "STRING(MAX)");
    }

    #[test]
    fn test_plan_is_deterministic() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = MysqlDialect::new();
        let subs = SubtablePolicy::default();
        let planner = TablePlanner::new(TypeResolver::new(&c, &p), &subs, &dialect);
        assert_eq!(planner.plan().unwrap(), planner.plan().unwrap());
    }

    #[tokio::test]
    async fn test_rerun_issues_no_ddl() {
        let (c, p) = (catalog(), TypePolicy::builtin().unwrap());
        let dialect = Arc::new(MysqlDialect::new());
        let subs = SubtablePolicy::default();
        let plan = TablePlanner::new(TypeResolver::new(&c, &p), &subs, dialect.as_ref())
            .plan()
            .unwrap();
        let adapter = MemoryAdapter::new(dialect.clone(), ServerVersion::parse("8.0.32"));

        let first = plan.create_missing(&adapter).await;
        assert_eq!(first.created, plan.tables.len());
        let before = adapter.statements().await.len();

        let second = plan.create_missing(&adapter).await;
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, plan.tables.len());
        assert!(second.is_clean());
        assert_eq!(adapter.statements().await.len(), before);
    }
}
