//! Core traits separating planning from execution.
//!
//! - [`Dialect`]: SQL syntax and type-rule strategy for one backend flavor
//! - [`BackendAdapter`]: execution surface (DDL/DML, introspection) for one backend
//!
//! # Design Patterns
//!
//! - **Strategy**: each dialect renders the same [`TableSpec`]/[`IndexSpec`] its own way
//! - **Template Method**: structured adapter operations have default
//!   implementations that render through the dialect and call [`BackendAdapter::execute`];
//!   in-process adapters override them instead

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{AdapterResult, BackendError, ObjectKind};

use super::layout::{
    lock_table, ColumnSpec, GeneratedColumn, IndexKind, IndexSpec, SubtableSpec, TableSpec,
    DOC_ID, LOCK_EXPIRES_AT, LOCK_OWNER, LOCK_TABLE,
};
use super::rules::{DialectKind, SchemaSnapshot, ServerVersion, TypeRules, ValueKind};
use super::value::{Row, SqlValue};

/// Upper bound on lock lifetimes, keeping expiry arithmetic in range.
const MAX_LOCK_TTL_SECS: u64 = 30 * 24 * 3600;

/// SQL syntax strategy for one dialect.
///
/// All methods are pure; nothing here touches a connection.
pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Quote an identifier (table, column, index name).
    fn quote_ident(&self, name: &str) -> String;

    fn type_rules(&self) -> &TypeRules;

    fn classify(&self, backend_type: &str) -> ValueKind {
        self.type_rules().classify(backend_type)
    }

    /// Canonical spelling of a type reported by live introspection, so it can
    /// be compared against a resolved type.
    fn normalize_type(&self, backend_type: &str) -> String {
        backend_type
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    }

    fn same_type(&self, live: &str, desired: &str) -> bool {
        self.normalize_type(live) == self.normalize_type(desired)
    }

    /// Native timestamp literal form.
    fn format_timestamp(&self, ts: &NaiveDateTime) -> String {
        ts.format(self.type_rules().timestamp_format).to_string()
    }

    /// Whether expression indexes are available on this server.
    fn supports_functional_index(&self, _server: &ServerVersion) -> bool {
        true
    }

    /// Whether a plain index over a column of this type can be built.
    fn is_indexable(&self, backend_type: &str) -> bool {
        !backend_type.trim().to_uppercase().starts_with("ARRAY<")
    }

    /// Key prefix length needed for a plain index on this type.
    fn index_prefix_length(&self, _backend_type: &str) -> Option<u32> {
        None
    }

    /// Column definition fragment used inside CREATE TABLE.
    fn column_definition(&self, column: &ColumnSpec) -> String {
        format!(
            "{} {}",
            self.quote_ident(&column.name),
            column.backend_type
        )
    }

    /// Statements creating a table (and any per-column metadata).
    fn create_table_sql(&self, table: &TableSpec, server: &ServerVersion) -> Vec<String>;

    /// Statements creating a subtable linked to its parent.
    fn create_subtable_sql(&self, subtable: &SubtableSpec) -> Vec<String>;

    fn add_column_sql(&self, table: &str, column: &ColumnSpec) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote_ident(table),
            self.quote_ident(&column.name),
            column.backend_type
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    /// In-place type change without data movement.
    fn change_column_type_sql(&self, table: &str, column: &ColumnSpec) -> String;

    /// Virtual column materializing a JSON slot.
    fn add_generated_column_sql(&self, table: &str, generated: &GeneratedColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {} GENERATED ALWAYS AS ({}) VIRTUAL",
            self.quote_ident(table),
            self.quote_ident(&generated.name),
            generated.backend_type,
            generated.expression
        )
    }

    /// CREATE INDEX statement for any index kind.
    fn create_index_sql(&self, index: &IndexSpec) -> String {
        let table = self.quote_ident(&index.table);
        let name = self.quote_ident(&index.name);
        match index.kind {
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
            IndexKind::Functional | IndexKind::Custom => format!(
                "CREATE INDEX {} ON {} (({}))",
                name,
                table,
                index.expression.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// Execution surface for one backend.
///
/// Duplicate conditions are reported as [`BackendError::AlreadyExists`];
/// callers decide whether that counts as success.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn dialect(&self) -> &dyn Dialect;

    /// Server version, used for feature detection.
    async fn server_version(&self) -> AdapterResult<ServerVersion>;

    /// Execute one DDL statement.
    async fn execute(&self, statement: &str) -> AdapterResult<()>;

    async fn table_exists(&self, table: &str) -> AdapterResult<bool>;

    async fn list_tables(&self) -> AdapterResult<Vec<String>>;

    /// Live column types of a table; empty when the table is absent.
    async fn get_column_types(&self, table: &str) -> AdapterResult<BTreeMap<String, String>>;

    /// Insert one row; a duplicate primary key is reported as `AlreadyExists`.
    async fn insert_row(&self, table: &str, row: &Row) -> AdapterResult<()>;

    async fn update_column(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        value: &SqlValue,
    ) -> AdapterResult<()>;

    async fn delete_row(&self, table: &str, doc_id: &str) -> AdapterResult<()>;

    /// Delete one row only while `column` still holds `expected`, in a single
    /// statement. Returns whether a row was deleted.
    async fn delete_row_if(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        expected: &SqlValue,
    ) -> AdapterResult<bool>;

    /// Fetch selected columns of one row by `doc_id`.
    async fn fetch_row(
        &self,
        table: &str,
        doc_id: &str,
        columns: &[&str],
    ) -> AdapterResult<Option<Row>>;

    /// Read selected columns of every row.
    async fn search(&self, table: &str, columns: &[&str]) -> AdapterResult<Vec<Row>>;

    /// Fresh snapshot of every table's column types.
    ///
    /// Callers must take a new snapshot after DDL that changes column shape.
    async fn refresh_schema(&self) -> AdapterResult<SchemaSnapshot> {
        let mut tables = BTreeMap::new();
        for table in self.list_tables().await? {
            let columns = self.get_column_types(&table).await?;
            tables.insert(table, columns);
        }
        Ok(SchemaSnapshot::new(tables))
    }

    async fn create_table(&self, table: &TableSpec) -> AdapterResult<()> {
        let server = self.server_version().await?;
        for statement in self.dialect().create_table_sql(table, &server) {
            self.execute(&statement).await?;
        }
        Ok(())
    }

    async fn create_subtable(&self, subtable: &SubtableSpec) -> AdapterResult<()> {
        for statement in self.dialect().create_subtable_sql(subtable) {
            self.execute(&statement).await?;
        }
        Ok(())
    }

    /// Create an index, adding its generated column first when it has one.
    async fn create_index(&self, index: &IndexSpec) -> AdapterResult<()> {
        if let Some(generated) = &index.generated {
            let sql = self
                .dialect()
                .add_generated_column_sql(&index.table, generated);
            match self.execute(&sql).await {
                Ok(()) => {}
                Err(BackendError::AlreadyExists {
                    kind: ObjectKind::Column,
                    ..
                }) => {}
                Err(e) => return Err(e),
            }
        }
        let sql = self.dialect().create_index_sql(index);
        self.execute(&sql).await
    }

    async fn alter_add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<()> {
        let sql = self.dialect().add_column_sql(table, column);
        self.execute(&sql).await
    }

    async fn alter_drop_column(&self, table: &str, column: &str) -> AdapterResult<()> {
        let sql = self.dialect().drop_column_sql(table, column);
        self.execute(&sql).await
    }

    async fn alter_change_column_type(
        &self,
        table: &str,
        column: &ColumnSpec,
    ) -> AdapterResult<()> {
        let sql = self.dialect().change_column_type_sql(table, column);
        self.execute(&sql).await
    }

    async fn row_exists(&self, table: &str, doc_id: &str) -> AdapterResult<bool> {
        Ok(self.fetch_row(table, doc_id, &[DOC_ID]).await?.is_some())
    }

    /// Try once to take the named run lock.
    ///
    /// Returns `false` while another owner holds an unexpired lock. An expired
    /// lock is deleted only if it is still the row that was read, so at most
    /// one contender takes it over.
    async fn acquire_lock(&self, name: &str, owner: &str, ttl_secs: u64) -> AdapterResult<bool> {
        let spec = lock_table(self.dialect().type_rules().doc_id);
        match self.create_table(&spec).await {
            Ok(())
            | Err(BackendError::AlreadyExists {
                kind: ObjectKind::Table,
                ..
            }) => {}
            Err(e) => return Err(e),
        }

        let now = Utc::now();
        let ttl = chrono::Duration::seconds(ttl_secs.min(MAX_LOCK_TTL_SECS) as i64);
        let row: Row = [
            (DOC_ID.to_string(), SqlValue::from(name)),
            (LOCK_OWNER.to_string(), SqlValue::from(owner)),
            (
                LOCK_EXPIRES_AT.to_string(),
                SqlValue::from((now + ttl).to_rfc3339()),
            ),
        ]
        .into_iter()
        .collect();

        match self.insert_row(LOCK_TABLE, &row).await {
            Ok(()) => return Ok(true),
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Row,
                ..
            }) => {}
            Err(e) => return Err(e),
        }

        let held = self
            .fetch_row(LOCK_TABLE, name, &[LOCK_OWNER, LOCK_EXPIRES_AT])
            .await?;
        let Some(observed) = held.as_ref().and_then(|r| r.get(LOCK_EXPIRES_AT)).cloned() else {
            // Released between the insert and the read.
            return Ok(false);
        };
        let expired = observed
            .as_text()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|expires| expires.with_timezone(&Utc) < now)
            .unwrap_or(true);
        if !expired {
            return Ok(false);
        }

        if !self
            .delete_row_if(LOCK_TABLE, name, LOCK_EXPIRES_AT, &observed)
            .await?
        {
            return Ok(false);
        }
        match self.insert_row(LOCK_TABLE, &row).await {
            Ok(()) => Ok(true),
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Row,
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the named run lock if `owner` still holds it.
    async fn release_lock(&self, name: &str, owner: &str) -> AdapterResult<()> {
        let held = self.fetch_row(LOCK_TABLE, name, &[LOCK_OWNER]).await?;
        let ours = held
            .as_ref()
            .and_then(|r| r.get(LOCK_OWNER))
            .and_then(SqlValue::as_text)
            == Some(owner);
        if ours {
            self.delete_row(LOCK_TABLE, name).await?;
        }
        Ok(())
    }

    /// Release connections.
    async fn close(&self) {}
}
