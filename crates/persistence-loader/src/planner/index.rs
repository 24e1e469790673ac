//! Index policy + table layout → index specifications.
//!
//! Per column listed in the table's fields (own fields, then `__common__`):
//!
//! - scalar columns get a plain index, with a key prefix where the dialect
//!   needs one
//! - structured columns get one functional index per JSON slot template, or
//!   a generated column per slot plus a plain index over it when the server
//!   cannot index expressions
//! - native array columns are skipped
//!
//! Custom expressions and `__unique__` pairs are added after the fields.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::core::identifier::sanitize;
use crate::core::layout::{GeneratedColumn, IndexSpec, SubtableSpec, TableSpec, DOC_ID};
use crate::core::rules::ServerVersion;
use crate::core::traits::{BackendAdapter, Dialect};
use crate::policy::IndexPolicy;
use crate::report::SweepReport;

pub struct IndexPlanner<'a> {
    policy: &'a IndexPolicy,
    dialect: &'a dyn Dialect,
    server: &'a ServerVersion,
}

impl<'a> IndexPlanner<'a> {
    pub fn new(
        policy: &'a IndexPolicy,
        dialect: &'a dyn Dialect,
        server: &'a ServerVersion,
    ) -> Self {
        Self {
            policy,
            dialect,
            server,
        }
    }

    /// Indexes for one table, in column order.
    pub fn plan(&self, table: &TableSpec) -> Vec<IndexSpec> {
        let fields = self.policy.fields_for(&table.name);
        let rules = self.dialect.type_rules();
        let functional = self.dialect.supports_functional_index(self.server);
        let mut indexes = Vec::new();

        for column in &table.columns {
            if column.name == DOC_ID || !fields.contains(&column.name.as_str()) {
                continue;
            }
            let col_type = column.backend_type.as_str();

            if !self.dialect.is_indexable(col_type) {
                debug!(
                    "{}.{}: {} columns are not indexable, skipping",
                    table.name, column.name, col_type
                );
                continue;
            }

            if rules.is_structured(col_type) {
                let data_type = rules.generated_slot.replace("VARCHAR", "CHAR");
                for (i, template) in self.policy.common.json.iter().enumerate() {
                    let slot = i + 1;
                    let expression = substitute(
                        template,
                        &[("field", column.name.as_str()), ("data_type", data_type.as_str())],
                    );
                    let name = format!("{}_{}_json_{}", table.name, sanitize(&column.name), slot);
                    if functional {
                        indexes.push(IndexSpec::functional(
                            &table.name,
                            name,
                            &column.name,
                            expression,
                        ));
                    } else {
                        let generated = GeneratedColumn {
                            name: format!("{}_json_{}", column.name, slot),
                            backend_type: rules.generated_slot.to_string(),
                            expression,
                        };
                        let mut index = IndexSpec::plain(&table.name, name, &generated.name);
                        index.generated = Some(generated);
                        indexes.push(index);
                    }
                }
                continue;
            }

            let mut index = IndexSpec::plain(
                &table.name,
                format!("{}_{}", table.name, sanitize(&column.name)),
                &column.name,
            );
            index.prefix_length = self.dialect.index_prefix_length(col_type);
            indexes.push(index);
        }

        for (i, custom) in self.policy.custom_for(&table.name).iter().enumerate() {
            if !functional && custom.contains('(') {
                warn!(
                    "{}: server {} cannot build expression index {}, skipping",
                    table.name, self.server, custom
                );
                continue;
            }
            indexes.push(IndexSpec::custom(
                &table.name,
                format!("{}_CustomIdx{}", table.name, i + 1),
                custom.clone(),
            ));
        }

        for (unique_table, unique_column) in &self.policy.unique {
            if *unique_table != table.name {
                continue;
            }
            let Some(column) = table.column(unique_column) else {
                debug!("{}.{}: no such column for unique index", unique_table, unique_column);
                continue;
            };
            if rules.is_structured(&column.backend_type) {
                debug!(
                    "{}.{}: structured columns cannot carry a unique index",
                    unique_table, unique_column
                );
                continue;
            }
            let mut index = IndexSpec::unique(
                &table.name,
                format!(
                    "{}_{}_unique_idx",
                    table.name.to_lowercase(),
                    unique_column.to_lowercase()
                ),
                &column.name,
            );
            index.prefix_length = self.dialect.index_prefix_length(&column.backend_type);
            indexes.push(index);
        }

        indexes
    }

    /// Index over a subtable's value column.
    pub fn plan_subtable(&self, subtable: &SubtableSpec) -> Option<IndexSpec> {
        if !self.dialect.is_indexable(&subtable.value_type) {
            return None;
        }
        let mut index = IndexSpec::plain(&subtable.name, subtable.index_name(), &subtable.column);
        index.prefix_length = self.dialect.index_prefix_length(&subtable.value_type);
        Some(index)
    }
}

/// Create each index, treating a duplicate name as already done.
pub async fn create_indexes(adapter: &dyn BackendAdapter, indexes: &[IndexSpec]) -> SweepReport {
    let mut report = SweepReport::default();
    for index in indexes {
        info!("Creating index {} on {}", index.name, index.table);
        report.record(&index.name, adapter.create_index(index).await);
    }
    report
}

static TEMPLATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:(\$)|([A-Za-z_][A-Za-z0-9_]*)|\{([A-Za-z_][A-Za-z0-9_]*)\})")
        .expect("static pattern")
});

/// `$name` / `${name}` substitution that leaves unknown tokens in place.
/// `$$` yields a literal `$`.
fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    TEMPLATE_TOKEN
        .replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "$".to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match vars.iter().find(|(k, _)| Some(*k) == name) {
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::layout::{ColumnSpec, IndexKind};
    use crate::core::rules::DialectKind;
    use crate::drivers::{MemoryAdapter, MysqlDialect, PostgresDialect, SpannerDialect};

    fn scope() -> TableSpec {
        let mut t = TableSpec::new("jansScope");
        t.push_column(ColumnSpec::new("doc_id", "VARCHAR(64)").primary_key());
        t.push_column(ColumnSpec::new("jansId", "VARCHAR(128)"));
        t.push_column(ColumnSpec::new("exp", "DATETIME(3)"));
        t
    }

    fn person(role_type: &str) -> TableSpec {
        let mut t = TableSpec::new("jansPerson");
        t.push_column(ColumnSpec::new("doc_id", "VARCHAR(64)").primary_key());
        t.push_column(ColumnSpec::new("uid", "VARCHAR(64)"));
        t.push_column(ColumnSpec::new("mail", role_type));
        t.push_column(ColumnSpec::new("description", "TEXT"));
        t
    }

    fn policy(json: &str) -> IndexPolicy {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_table_and_common_fields_give_two_plain_indexes() {
        let p = policy(r#"{"jansScope": {"fields": ["jansId"]}, "__common__": {"fields": ["exp"]}}"#);
        let d = MysqlDialect::new();
        let v = ServerVersion::parse("8.0.32");
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&scope());

        assert_eq!(indexes.len(), 2);
        assert!(indexes.iter().all(|i| i.kind == IndexKind::Plain));
        let names: Vec<_> = indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["jansScope_jansId", "jansScope_exp"]);
    }

    #[test]
    fn test_structured_field_gets_functional_indexes() {
        let p = IndexPolicy::builtin(DialectKind::Mysql).unwrap();
        let d = MysqlDialect::new();
        let v = ServerVersion::parse("8.0.32");
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&person("JSON"));

        let json: Vec<_> = indexes
            .iter()
            .filter(|i| i.kind == IndexKind::Functional)
            .collect();
        assert_eq!(json.len(), 4);
        assert_eq!(json[0].name, "jansPerson_mail_json_1");
        assert_eq!(
            json[0].expression.as_deref(),
            Some("CAST(JSON_UNQUOTE(JSON_EXTRACT(`mail`, '$.v[0]')) AS CHAR(128))")
        );
        assert!(!indexes.iter().any(|i| i.name == "jansPerson_mail"));
    }

    #[test]
    fn test_old_server_uses_generated_columns() {
        let p = IndexPolicy::builtin(DialectKind::Mysql).unwrap();
        let d = MysqlDialect::new();
        let v = ServerVersion::parse("5.7.44");
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&person("JSON"));

        let slot = indexes
            .iter()
            .find(|i| i.name == "jansPerson_mail_json_2")
            .unwrap();
        assert_eq!(slot.kind, IndexKind::Plain);
        assert_eq!(slot.columns, vec!["mail_json_2"]);
        let gen = slot.generated.as_ref().unwrap();
        assert_eq!(gen.backend_type, "VARCHAR(128)");
        assert!(gen.expression.contains("'$.v[1]'"));

        // Expression custom indexes need functional key parts.
        assert!(!indexes.iter().any(|i| i.kind == IndexKind::Custom));
    }

    #[test]
    fn test_custom_and_unique_indexes() {
        let p = IndexPolicy::builtin(DialectKind::Pgsql).unwrap();
        let d = PostgresDialect::new();
        let v = ServerVersion::parse("15.4");
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&person("JSONB"));

        let custom: Vec<_> = indexes.iter().filter(|i| i.kind == IndexKind::Custom).collect();
        assert_eq!(custom.len(), 2);
        assert_eq!(custom[0].name, "jansPerson_CustomIdx1");
        assert_eq!(custom[1].expression.as_deref(), Some("LOWER(\"mail\")"));

        let unique = indexes.iter().find(|i| i.kind == IndexKind::Unique).unwrap();
        assert_eq!(unique.name, "jansperson_uid_unique_idx");

        let functional = indexes.iter().find(|i| i.kind == IndexKind::Functional).unwrap();
        assert_eq!(functional.expression.as_deref(), Some("(\"mail\"->>0)"));
    }

    #[test]
    fn test_text_columns_get_key_prefix_on_mysql() {
        let p = policy(r#"{"jansPerson": {"fields": ["description"]}}"#);
        let d = MysqlDialect::new();
        let v = ServerVersion::parse("8.0.32");
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&person("JSON"));
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].prefix_length, Some(255));
    }

    #[test]
    fn test_spanner_arrays_are_skipped() {
        let p = policy(r#"{"jansPerson": {"fields": ["mail", "uid"]}}"#);
        let d = SpannerDialect::new();
        let v = ServerVersion::latest();
        let indexes = IndexPlanner::new(&p, &d, &v).plan(&person("ARRAY<STRING(MAX)>"));
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].columns, vec!["uid"]);
    }

    #[test]
    fn test_subtable_index() {
        let p = IndexPolicy::default();
        let d = SpannerDialect::new();
        let v = ServerVersion::latest();
        let sub = SubtableSpec::new("jansPerson", "mail", "STRING(MAX)", "STRING(64)");
        let index = IndexPlanner::new(&p, &d, &v).plan_subtable(&sub).unwrap();
        assert_eq!(index.name, "jansPerson_mailIdx");
        assert_eq!(index.table, "jansPerson_mail");
    }

    #[test]
    fn test_substitute_keeps_unknown_tokens() {
        let vars = [("field", "mail")];
        assert_eq!(substitute("`$field`", &vars), "`mail`");
        assert_eq!(substitute("${field}_x", &vars), "mail_x");
        assert_eq!(substitute("'$.v[0]' $other", &vars), "'$.v[0]' $other");
        assert_eq!(substitute("$$field", &vars), "$field");
        assert_eq!(substitute("${other} ${field", &vars), "${other} ${field");
    }

    #[tokio::test]
    async fn test_index_creation_is_idempotent() {
        let p = policy(r#"{"jansScope": {"fields": ["jansId"]}, "__common__": {"fields": ["exp"]}}"#);
        let dialect = Arc::new(MysqlDialect::new());
        let v = ServerVersion::parse("8.0.32");
        let adapter = MemoryAdapter::new(dialect.clone(), v.clone());
        adapter.create_table(&scope()).await.unwrap();

        let indexes = IndexPlanner::new(&p, dialect.as_ref(), &v).plan(&scope());
        let first = create_indexes(&adapter, &indexes).await;
        let second = create_indexes(&adapter, &indexes).await;
        assert_eq!((first.created, first.skipped), (2, 0));
        assert_eq!((second.created, second.skipped), (0, 2));
        assert_eq!(adapter.index_names().await.len(), 2);
    }
}
