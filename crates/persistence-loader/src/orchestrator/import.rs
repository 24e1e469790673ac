//! Initial data import: LDIF records → rows.

use tracing::{debug, info, warn};

use crate::core::layout::DN;
use crate::core::rules::ValueKind;
use crate::core::traits::BackendAdapter;
use crate::core::value::SqlValue;
use crate::error::{LoaderError, Result};
use crate::ldif::{doc_id_from_dn, DirectoryEntry, LdifRecord, Modification, ModifyOp};
use crate::planner::TablePlan;
use crate::report::SweepReport;
use crate::transform::{ColumnTarget, EntryTransformer};

/// Writes LDIF records through the adapter, skipping rows that already exist.
pub struct Importer<'a> {
    adapter: &'a dyn BackendAdapter,
    plan: &'a TablePlan,
    transformer: EntryTransformer<'a>,
}

impl<'a> Importer<'a> {
    pub fn new(adapter: &'a dyn BackendAdapter, plan: &'a TablePlan) -> Self {
        Self {
            adapter,
            plan,
            transformer: EntryTransformer::new(plan, adapter.dialect()),
        }
    }

    /// Import records in order. Per-record failures are collected.
    pub async fn import(&self, records: &[LdifRecord]) -> SweepReport {
        let mut report = SweepReport::default();
        for record in records {
            match record {
                LdifRecord::Entry(entry) => {
                    if let Err(e) = self.import_entry(entry, &mut report).await {
                        report.record_failure(&entry.dn, e);
                    }
                }
                LdifRecord::Modify { dn, changes } => {
                    if let Err(e) = self.apply_modify(dn, changes, &mut report).await {
                        report.record_failure(dn, e);
                    }
                }
            }
        }
        report
    }

    async fn import_entry(
        &self,
        entry: &DirectoryEntry,
        report: &mut SweepReport,
    ) -> Result<()> {
        let Some(out) = self.transformer.transform(entry)? else {
            report.record_skipped();
            return Ok(());
        };
        let doc_id = out.row.doc_id().unwrap_or_default();

        if self.adapter.row_exists(&out.table, doc_id).await? {
            debug!("{} exists in {}, skipping", entry.dn, out.table);
            report.record_skipped();
            return Ok(());
        }

        info!("Adding {} to {}", doc_id, out.table);
        let inserted = self.adapter.insert_row(&out.table, &out.row).await;
        let parent_written = inserted.is_ok();
        report.record(&entry.dn, inserted);
        // Subtable rows never outlive a parent row that was not written.
        if !parent_written {
            if !out.subtable_rows.is_empty() {
                warn!(
                    "{}: parent row not written, skipping {} subtable rows",
                    entry.dn,
                    out.subtable_rows.len()
                );
            }
            return Ok(());
        }
        for (subtable, row) in &out.subtable_rows {
            let item = format!("{} ({})", entry.dn, subtable);
            report.record(&item, self.adapter.insert_row(subtable, row).await);
        }
        Ok(())
    }

    /// Table holding the row for `dn`: a row with the DN's `doc_id` whose `dn` matches.
    async fn table_of(&self, dn: &str, doc_id: &str) -> Option<&'a str> {
        let plan: &'a TablePlan = self.plan;
        for table in &plan.tables {
            match self.adapter.fetch_row(&table.name, doc_id, &[DN]).await {
                Ok(Some(row)) => {
                    let stored = row.get(DN).and_then(SqlValue::as_text);
                    if stored.map(|s| s.eq_ignore_ascii_case(dn)).unwrap_or(false) {
                        return Some(table.name.as_str());
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("{}: {}", table.name, e),
            }
        }
        None
    }

    async fn apply_modify(
        &self,
        dn: &str,
        changes: &[Modification],
        report: &mut SweepReport,
    ) -> Result<()> {
        let doc_id = doc_id_from_dn(dn)?;
        let Some(table) = self.table_of(dn, &doc_id).await else {
            warn!("Can't find current value for modification of {}", dn);
            report.record_skipped();
            return Ok(());
        };

        for change in changes {
            match self.transformer.target(table, &change.attribute) {
                Some(ColumnTarget::Column { name, kind }) => {
                    let current = match (change.op, kind) {
                        (ModifyOp::Add, ValueKind::Structured(_)) => self
                            .adapter
                            .fetch_row(table, &doc_id, &[name])
                            .await?
                            .and_then(|mut row| row.remove(name)),
                        _ => None,
                    };
                    let value = self
                        .transformer
                        .modified_value(name, kind, current.as_ref(), change)?;
                    debug!("Updating {}.{} for {}", table, name, doc_id);
                    self.adapter
                        .update_column(table, &doc_id, name, &value)
                        .await?;
                    report.record_updated();
                }
                Some(ColumnTarget::Subtable(sub)) => {
                    if change.op == ModifyOp::Replace {
                        return Err(LoaderError::value(
                            change.attribute.as_str(),
                            format!("replace is not supported for subtable {}", sub.name),
                        ));
                    }
                    for row in self.transformer.subtable_rows(sub, &doc_id, &change.values)? {
                        let item = format!("{} ({})", dn, sub.name);
                        report.record(&item, self.adapter.insert_row(&sub.name, &row).await);
                    }
                }
                None => {
                    warn!(
                        "{} is not a column of {}; modification of {} skipped",
                        change.attribute, table, dn
                    );
                    report.record_skipped();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use std::path::Path;
    use std::sync::Arc;

    use serde_json::json;

    use crate::core::rules::ServerVersion;
    use crate::core::schema::{SchemaCatalog, SchemaDocument};
    use crate::drivers::{MemoryAdapter, MysqlDialect};
    use crate::ldif::parse_ldif;
    use crate::planner::TablePlanner;
    use crate::policy::{SubtablePolicy, TypePolicy};
    use crate::typemap::TypeResolver;

    async fn setup() -> (MemoryAdapter, TablePlan) {
        setup_with(&SubtablePolicy::default()).await
    }

    async fn setup_with(subtables: &SubtablePolicy) -> (MemoryAdapter, TablePlan) {
        let doc = SchemaDocument::from_json(
            r#"{
                "attributeTypes": [
                    {"names": ["uid"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15"},
                    {"names": ["role"], "syntax": "1.3.6.1.4.1.1466.115.121.1.15", "multivalued": true}
                ],
                "objectClasses": [{"names": ["jansPerson"], "sup": ["top"], "may": ["uid", "role"]}]
            }"#,
        )
        .unwrap();
        let catalog = SchemaCatalog::from_documents(vec![doc], HashMap::new()).unwrap();
        let types = TypePolicy::builtin().unwrap();
        let adapter = MemoryAdapter::new(Arc::new(MysqlDialect::new()), ServerVersion::latest());
        let plan = TablePlanner::new(
            TypeResolver::new(&catalog, &types),
            subtables,
            adapter.dialect(),
        )
        .plan()
        .unwrap();
        plan.create_missing(&adapter).await;
        (adapter, plan)
    }

    fn records(text: &str) -> Vec<LdifRecord> {
        parse_ldif(Path::new("test.ldif"), text).unwrap()
    }

    async fn value(adapter: &MemoryAdapter, column: &str) -> SqlValue {
        adapter
            .fetch_row("jansPerson", "60B7", &[column])
            .await
            .unwrap()
            .unwrap()
            .get(column)
            .cloned()
            .unwrap()
    }

    const ENTRY: &str = "\
dn: inum=60B7,ou=people,o=jans
objectClass: top
objectClass: jansPerson
uid: admin
role: manager
";

    #[tokio::test]
    async fn test_existing_rows_are_skipped() {
        let (adapter, plan) = setup().await;
        let importer = Importer::new(&adapter, &plan);

        let first = importer.import(&records(ENTRY)).await;
        assert_eq!((first.created, first.skipped), (1, 0));
        let second = importer.import(&records(ENTRY)).await;
        assert_eq!((second.created, second.skipped), (0, 1));
        assert_eq!(adapter.row_count("jansPerson").await, 1);
    }

    #[tokio::test]
    async fn test_modify_appends_and_replaces() {
        let (adapter, plan) = setup().await;
        let importer = Importer::new(&adapter, &plan);
        importer.import(&records(ENTRY)).await;

        let report = importer
            .import(&records(
                "dn: inum=60B7,ou=people,o=jans\nchangetype: modify\n\
                 add: role\nrole: auditor\n-\nreplace: uid\nuid: root\n-\n",
            ))
            .await;
        assert!(report.is_clean());
        assert_eq!(report.updated, 2);
        assert_eq!(
            value(&adapter, "role").await,
            SqlValue::Json(json!({"v": ["manager", "auditor"]}))
        );
        assert_eq!(value(&adapter, "uid").await, SqlValue::from("root"));
    }

    #[tokio::test]
    async fn test_modify_of_missing_entry_is_skipped() {
        let (adapter, plan) = setup().await;
        let importer = Importer::new(&adapter, &plan);

        let report = importer
            .import(&records(
                "dn: inum=FFFF,ou=people,o=jans\nchangetype: modify\nreplace: uid\nuid: x\n",
            ))
            .await;
        assert!(report.is_clean());
        assert_eq!((report.updated, report.skipped), (0, 1));
    }

    #[tokio::test]
    async fn test_write_failures_are_collected() {
        let (adapter, plan) = setup().await;
        adapter.fail_writes_to("jansPerson").await;
        let importer = Importer::new(&adapter, &plan);

        let report = importer.import(&records(ENTRY)).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item, "inum=60B7,ou=people,o=jans");
    }

    #[tokio::test]
    async fn test_failed_parent_skips_subtable_rows() {
        let subtables = SubtablePolicy::new(BTreeMap::from([(
            "jansPerson".to_string(),
            vec![("role".to_string(), "VARCHAR(64)".to_string())],
        )]));
        let (adapter, plan) = setup_with(&subtables).await;
        adapter.fail_writes_to("jansPerson").await;
        let importer = Importer::new(&adapter, &plan);

        let report = importer.import(&records(ENTRY)).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.created, 0);
        assert_eq!(adapter.row_count("jansPerson_role").await, 0);
    }

    #[tokio::test]
    async fn test_subtable_rows_follow_parent() {
        let subtables = SubtablePolicy::new(BTreeMap::from([(
            "jansPerson".to_string(),
            vec![("role".to_string(), "VARCHAR(64)".to_string())],
        )]));
        let (adapter, plan) = setup_with(&subtables).await;
        let importer = Importer::new(&adapter, &plan);

        let report = importer.import(&records(ENTRY)).await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(adapter.row_count("jansPerson").await, 1);
        assert!(adapter.row_count("jansPerson_role").await > 0);
    }
}
