//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Structured values use `JSONB` holding a bare JSON array. Column comments
//! are separate `COMMENT ON COLUMN` statements issued after CREATE TABLE.

use crate::core::identifier::{quote_double, quote_literal};
use crate::core::layout::{ColumnSpec, SubtableSpec, TableSpec, DOC_ID};
use crate::core::rules::{ContainerShape, DialectKind, ServerVersion, TypeRules};
use crate::core::traits::Dialect;

const RULES: TypeRules = TypeRules {
    varchar: "VARCHAR",
    small_text_max: 127,
    medium_text_max: 255,
    medium_text: "TEXT",
    long_text: "TEXT",
    structured: "JSONB",
    container: ContainerShape::Bare,
    timestamp_format: "%Y-%m-%d %H:%M:%S%.3f",
    doc_id: "VARCHAR(64)",
    object_class: "VARCHAR(48)",
    dn: "VARCHAR(128)",
    generated_slot: "VARCHAR(128)",
};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Pgsql
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_double(name)
    }

    fn type_rules(&self) -> &TypeRules {
        &RULES
    }

    /// Map `format_type()` spellings onto the names used in type policies.
    fn normalize_type(&self, backend_type: &str) -> String {
        let t = backend_type
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if let Some(rest) = t.strip_prefix("character varying") {
            return format!("VARCHAR{}", rest.to_uppercase());
        }
        if let Some(rest) = t.strip_prefix("timestamp") {
            let precision = rest
                .split(" without time zone")
                .next()
                .unwrap_or_default()
                .trim();
            return format!("TIMESTAMP{}", precision.to_uppercase());
        }
        match t.as_str() {
            "integer" | "int4" => "INT".to_string(),
            "int2" => "SMALLINT".to_string(),
            "int8" => "BIGINT".to_string(),
            "bool" | "boolean" => "BOOLEAN".to_string(),
            other => other.to_uppercase(),
        }
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), column.backend_type);
        if column.is_primary_key {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn create_table_sql(&self, table: &TableSpec, _server: &ServerVersion) -> Vec<String> {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        parts.push(format!(
            "PRIMARY KEY ({})",
            table
                .primary_key()
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        ));

        let mut statements = vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote_ident(&table.name),
            parts.join(",\n    ")
        )];

        for column in &table.columns {
            if let Some(desc) = &column.description {
                statements.push(format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    self.quote_ident(&table.name),
                    self.quote_ident(&column.name),
                    quote_literal(desc)
                ));
            }
        }
        statements
    }

    fn create_subtable_sql(&self, subtable: &SubtableSpec) -> Vec<String> {
        let table = subtable.table();
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        parts.push(format!(
            "PRIMARY KEY ({})",
            table
                .primary_key()
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
            self.quote_ident(DOC_ID),
            self.quote_ident(&subtable.parent_table),
            self.quote_ident(DOC_ID)
        ));
        vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote_ident(&subtable.name),
            parts.join(",\n    ")
        )]
    }

    fn change_column_type_sql(&self, table: &str, column: &ColumnSpec) -> String {
        let col = self.quote_ident(&column.name);
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            self.quote_ident(table),
            col,
            column.backend_type,
            col,
            column.backend_type
        )
    }
}
