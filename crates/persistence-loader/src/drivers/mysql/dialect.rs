//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! Structured values use the `JSON` type holding `{"v": [...]}`. Servers before
//! 8.0.13, and every MariaDB release, lack functional key parts, so JSON slot
//! indexes fall back to virtual generated columns there.

use crate::core::identifier::{quote_backtick, quote_literal};
use crate::core::layout::{ColumnSpec, IndexKind, IndexSpec, SubtableSpec, TableSpec, DOC_ID};
use crate::core::rules::{ContainerShape, DialectKind, ServerVersion, TypeRules};
use crate::core::traits::Dialect;

const RULES: TypeRules = TypeRules {
    varchar: "VARCHAR",
    small_text_max: 127,
    medium_text_max: 255,
    medium_text: "TINYTEXT",
    long_text: "TEXT",
    structured: "JSON",
    container: ContainerShape::Tagged,
    timestamp_format: "%Y-%m-%d %H:%M:%S%.3f",
    doc_id: "VARCHAR(64)",
    object_class: "VARCHAR(48)",
    dn: "VARCHAR(128)",
    generated_slot: "VARCHAR(128)",
};

/// Key prefix used for plain indexes over TEXT-family columns.
const TEXT_INDEX_PREFIX: u32 = 255;

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    fn is_text_family(backend_type: &str) -> bool {
        matches!(
            backend_type.trim().to_uppercase().as_str(),
            "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT"
        )
    }
}

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote_ident(&self, name: &str) -> String {
        quote_backtick(name)
    }

    fn type_rules(&self) -> &TypeRules {
        &RULES
    }

    fn normalize_type(&self, backend_type: &str) -> String {
        let t = backend_type.trim().to_uppercase();
        // Integer display widths (`smallint(6)`, `int(11)`) carry no type information.
        for int_type in ["TINYINT", "SMALLINT", "MEDIUMINT", "BIGINT", "INT"] {
            if t.starts_with(int_type) && t[int_type.len()..].starts_with('(') {
                let rest = t.split(')').nth(1).unwrap_or_default().trim();
                return if rest.is_empty() {
                    int_type.to_string()
                } else {
                    format!("{} {}", int_type, rest)
                };
            }
        }
        t
    }

    fn supports_functional_index(&self, server: &ServerVersion) -> bool {
        !server.mariadb && server.at_least(8, 0, 13)
    }

    fn index_prefix_length(&self, backend_type: &str) -> Option<u32> {
        Self::is_text_family(backend_type).then_some(TEXT_INDEX_PREFIX)
    }

    fn column_definition(&self, column: &ColumnSpec) -> String {
        let mut def = format!("{} {}", self.quote_ident(&column.name), column.backend_type);
        if column.is_primary_key {
            def.push_str(" NOT NULL");
        }
        if let Some(desc) = &column.description {
            def.push_str(&format!(" COMMENT {}", quote_literal(desc)));
        }
        def
    }

    fn create_table_sql(&self, table: &TableSpec, server: &ServerVersion) -> Vec<String> {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();

        let pk = table
            .primary_key()
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({})", pk));

        // MariaDB stores JSON as LONGTEXT; only a CHECK keeps the content valid.
        if server.mariadb {
            for column in &table.columns {
                if RULES.is_structured(&column.backend_type) {
                    parts.push(format!(
                        "CHECK (JSON_VALID({}))",
                        self.quote_ident(&column.name)
                    ));
                }
            }
        }

        vec![format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote_ident(&table.name),
            parts.join(",\n    ")
        )]
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
        format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}",
            self.quote_ident(table),
            self.quote_ident(&column.name),
            column.backend_type
        )
    }

    fn create_index_sql(&self, index: &IndexSpec) -> String {
        let table = self.quote_ident(&index.table);
        let name = self.quote_ident(&index.name);
        match index.kind {
            // Custom expressions are written for MySQL's key-part syntax already.
            IndexKind::Custom => format!(
                "CREATE INDEX {} ON {} ({})",
                name,
                table,
                index.expression.as_deref().unwrap_or_default()
            ),
            IndexKind::Functional => format!(
                "ALTER TABLE {} ADD INDEX {} (({}))",
                table,
                name,
                index.expression.as_deref().unwrap_or_default()
            ),
            IndexKind::Plain | IndexKind::Unique => {
                let cols = index
                    .columns
                    .iter()
                    .map(|c| match index.prefix_length {
                        Some(len) => format!("{}({})", self.quote_ident(c), len),
                        None => self.quote_ident(c),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let unique = if index.kind == IndexKind::Unique {
                    "UNIQUE "
                } else {
                    ""
                };
                format!("CREATE {}INDEX {} ON {} ({})", unique, name, table, cols)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::GeneratedColumn;

    fn person() -> TableSpec {
        let mut t = TableSpec::new("jansPerson");
        t.push_column(ColumnSpec::new("doc_id", "VARCHAR(64)").primary_key());
        t.push_column(ColumnSpec::new("objectClass", "VARCHAR(48)"));
        t.push_column(ColumnSpec::new("dn", "VARCHAR(128)"));
        t.push_column(
            ColumnSpec::new("role", "JSON").with_description(Some("User's role".into())),
        );
        t
    }

    #[test]
    fn test_quote_ident() {
        let d = MysqlDialect::new();
        assert_eq!(d.quote_ident("users"), "`users`");
        assert_eq!(d.quote_ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_create_table_renders_comment_and_pk() {
        let d = MysqlDialect::new();
        let sql = d.create_table_sql(&person(), &ServerVersion::parse("8.0.32"));
        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("`doc_id` VARCHAR(64) NOT NULL"));
        assert!(sql[0].contains("`role` JSON COMMENT 'User''s role'"));
        assert!(sql[0].contains("PRIMARY KEY (`doc_id`)"));
        assert!(!sql[0].contains("JSON_VALID"));
    }

    #[test]
    fn test_mariadb_gets_json_valid_check() {
        let d = MysqlDialect::new();
        let sql = d.create_table_sql(&person(), &ServerVersion::parse("10.6.12-MariaDB"));
        assert!(sql[0].contains("CHECK (JSON_VALID(`role`))"));
    }

    #[test]
    fn test_functional_index_support_by_version() {
        let d = MysqlDialect::new();
        assert!(d.supports_functional_index(&ServerVersion::parse("8.0.13")));
        assert!(!d.supports_functional_index(&ServerVersion::parse("8.0.12")));
        assert!(!d.supports_functional_index(&ServerVersion::parse("5.7.44")));
        assert!(!d.supports_functional_index(&ServerVersion::parse("10.11.2-MariaDB")));
    }

    #[test]
    fn test_normalize_type_strips_display_width() {
        let d = MysqlDialect::new();
        assert_eq!(d.normalize_type("smallint(6)"), "SMALLINT");
        assert_eq!(d.normalize_type("int(11) unsigned"), "INT UNSIGNED");
        assert_eq!(d.normalize_type("varchar(64)"), "VARCHAR(64)");
        assert!(d.same_type("datetime(3)", "DATETIME(3)"));
    }

    #[test]
    fn test_text_index_uses_prefix() {
        let d = MysqlDialect::new();
        assert_eq!(d.index_prefix_length("TINYTEXT"), Some(255));
        assert_eq!(d.index_prefix_length("VARCHAR(64)"), None);
        let mut idx = IndexSpec::plain("jansClnt", "jansClnt_jansLogoutURI".into(), "jansLogoutURI");
        idx.prefix_length = Some(255);
        assert_eq!(
            d.create_index_sql(&idx),
            "CREATE INDEX `jansClnt_jansLogoutURI` ON `jansClnt` (`jansLogoutURI`(255))"
        );
    }

    #[test]
    fn test_generated_column_sql() {
        let d = MysqlDialect::new();
        let gen = GeneratedColumn {
            name: "role_json_1".into(),
            backend_type: "VARCHAR(128)".into(),
            expression: "JSON_UNQUOTE(`role`->'$.v[0]')".into(),
        };
        assert_eq!(
            d.add_generated_column_sql("jansPerson", &gen),
            "ALTER TABLE `jansPerson` ADD COLUMN `role_json_1` VARCHAR(128) GENERATED ALWAYS AS (JSON_UNQUOTE(`role`->'$.v[0]')) VIRTUAL"
        );
    }

    #[test]
    fn test_subtable_has_cascade_fk() {
        let d = MysqlDialect::new();
        let sub = SubtableSpec::new("jansPerson", "mail", "VARCHAR(96)", "VARCHAR(64)");
        let sql = d.create_subtable_sql(&sub);
        assert!(sql[0].contains("PRIMARY KEY (`doc_id`, `dict_doc_id`)"));
        assert!(sql[0].contains("REFERENCES `jansPerson` (`doc_id`) ON DELETE CASCADE"));
    }
}
