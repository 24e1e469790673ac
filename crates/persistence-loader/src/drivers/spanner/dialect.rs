//! Spanner SQL dialect (Strategy pattern).
//!
//! Strings are always `STRING(n)` or `STRING(MAX)`; multivalued attributes use
//! `ARRAY<STRING(MAX)>`. Subtables are interleaved in their parent table.
//! Array columns cannot carry secondary indexes and expression indexes do not
//! exist, so the index planner skips those cases.

use crate::core::identifier::quote_backtick;
use crate::core::layout::{ColumnSpec, IndexKind, IndexSpec, SubtableSpec, TableSpec};
use crate::core::rules::{ContainerShape, DialectKind, ServerVersion, TypeRules};
use crate::core::traits::Dialect;

const RULES: TypeRules = TypeRules {
    varchar: "STRING",
    small_text_max: 2_621_440,
    medium_text_max: 2_621_440,
    medium_text: "STRING(MAX)",
    long_text: "STRING(MAX)",
    structured: "ARRAY<STRING(MAX)>",
    container: ContainerShape::NativeArray,
    timestamp_format: "%Y-%m-%dT%H:%M:%S%.3fZ",
    doc_id: "STRING(64)",
    object_class: "STRING(48)",
    dn: "STRING(128)",
    generated_slot: "STRING(128)",
};

#[derive(Debug, Clone, Default)]
pub struct SpannerDialect;

impl SpannerDialect {
    pub fn new() -> Self {
        Self
    }

    fn table_body(&self, table: &TableSpec) -> String {
        table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect::<Vec<_>>()
            .join(",\n    ")
    }

    fn primary_key_clause(&self, table: &TableSpec) -> String {
        format!(
            "PRIMARY KEY ({})",
            table
                .primary_key()
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl Dialect for SpannerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Spanner
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_backtick(name)
    }

    fn type_rules(&self) -> &TypeRules {
        &RULES
    }

    fn supports_functional_index(&self, _server: &ServerVersion) -> bool {
        false
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), column.backend_type);
        if column.is_primary_key {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn create_table_sql(&self, table: &TableSpec, _server: &ServerVersion) -> Vec<String> {
        vec![format!(
            "CREATE TABLE {} (\n    {}\n) {}",
            self.quote_ident(&table.name),
            self.table_body(table),
            self.primary_key_clause(table)
        )]
    }

    fn create_subtable_sql(&self, subtable: &SubtableSpec) -> Vec<String> {
        let table = subtable.table();
        vec![format!(
            "CREATE TABLE {} (\n    {}\n) {},\n  INTERLEAVE IN PARENT {} ON DELETE CASCADE",
            self.quote_ident(&table.name),
            self.table_body(&table),
            self.primary_key_clause(&table),
            self.quote_ident(&subtable.parent_table)
        )]
    }

    fn change_column_type_sql(&self, table: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote_ident(table),
            self.quote_ident(&column.name),
            column.backend_type
        )
    }

    fn create_index_sql(&self, index: &IndexSpec) -> String {
        let table = self.quote_ident(&index.table);
        let name = self.quote_ident(&index.name);
        match index.kind {
            IndexKind::Custom | IndexKind::Functional => format!(
                "CREATE INDEX {} ON {} ({})",
                name,
                table,
                index.expression.as_deref().unwrap_or_default()
            ),
            IndexKind::Plain | IndexKind::Unique => {
                let unique = if index.kind == IndexKind::Unique {
                    "UNIQUE "
                } else {
                    ""
                };
                let cols = index
                    .columns
                    .iter()
                    .map(|c| self.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("CREATE {}INDEX {} ON {} ({})", unique, name, table, cols)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_are_always_bounded_or_max() {
        let d = SpannerDialect::new();
        assert_eq!(d.type_rules().sized_string(Some(64)), "STRING(64)");
        assert_eq!(d.type_rules().sized_string(Some(2048)), "STRING(2048)");
        assert_eq!(d.type_rules().sized_string(None), "STRING(MAX)");
    }

    #[test]
    fn test_array_columns_are_not_indexable() {
        let d = SpannerDialect::new();
        assert!(!d.is_indexable("ARRAY<STRING(MAX)>"));
        assert!(d.is_indexable("STRING(64)"));
    }

    #[test]
    fn test_subtable_is_interleaved() {
        let d = SpannerDialect::new();
        let sub = SubtableSpec::new("jansPerson", "mail", "STRING(MAX)", "STRING(64)");
        let sql = d.create_subtable_sql(&sub);
        assert!(sql[0].contains("PRIMARY KEY (`doc_id`, `dict_doc_id`)"));
        assert!(sql[0].contains("INTERLEAVE IN PARENT `jansPerson` ON DELETE CASCADE"));
    }

    #[test]
    fn test_timestamp_literal_is_iso() {
        let d = SpannerDialect::new();
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(7, 8, 9, 120)
            .unwrap();
        assert_eq!(d.format_timestamp(&ts), "2024-03-05T07:08:09.120Z");
    }
}
