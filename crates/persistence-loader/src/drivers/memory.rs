//! In-process backend adapter.
//!
//! Keeps tables, rows and index names in memory and records every rendered
//! DDL statement. Used for `plan` runs, Spanner planning, and tests. Duplicate
//! detection mirrors the live adapters so idempotence logic is exercised the
//! same way.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::layout::{ColumnSpec, IndexSpec, SubtableSpec, TableSpec, DOC_ID};
use crate::core::rules::ServerVersion;
use crate::core::traits::{BackendAdapter, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::error::{AdapterResult, BackendError, ObjectKind};

#[derive(Debug, Default)]
struct MemoryTable {
    /// Column name → normalized type, in creation order.
    columns: Vec<(String, String)>,
    primary_key: Vec<String>,
    /// Primary key tuple → row.
    rows: BTreeMap<Vec<String>, Row>,
}

impl MemoryTable {
    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == name)
    }

    fn key_of(&self, row: &Row) -> Vec<String> {
        self.primary_key
            .iter()
            .map(|c| row.get(c).map(key_text).unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, MemoryTable>,
    indexes: BTreeSet<String>,
    statements: Vec<String>,
    failing_tables: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_rows: HashSet<(String, String)>,
}

/// Backend adapter that keeps everything in memory.
pub struct MemoryAdapter {
    dialect: Arc<dyn Dialect>,
    version: ServerVersion,
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new(dialect: Arc<dyn Dialect>, version: ServerVersion) -> Self {
        Self {
            dialect,
            version,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Make every row write against `table` fail with an execution error.
    pub async fn fail_writes_to(&self, table: &str) {
        self.state
            .lock()
            .await
            .failing_tables
            .insert(table.to_string());
    }

    /// Make updates of one row fail while the rest of `table` stays writable.
    pub async fn fail_updates_of(&self, table: &str, doc_id: &str) {
        self.state
            .lock()
            .await
            .failing_rows
            .insert((table.to_string(), doc_id.to_string()));
    }

    /// Make every `search` against `table` fail with an execution error.
    pub async fn fail_reads_from(&self, table: &str) {
        self.state
            .lock()
            .await
            .failing_reads
            .insert(table.to_string());
    }

    /// Every statement rendered so far, in order.
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn index_names(&self) -> Vec<String> {
        self.state.lock().await.indexes.iter().cloned().collect()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn record(state: &mut MemoryState, statements: impl IntoIterator<Item = String>) {
        for s in statements {
            debug!("{}", s);
            state.statements.push(s);
        }
    }

    fn define_table(&self, state: &mut MemoryState, spec: &TableSpec) -> AdapterResult<()> {
        if state.tables.contains_key(&spec.name) {
            return Err(BackendError::already_exists(ObjectKind::Table, &spec.name));
        }
        let table = MemoryTable {
            columns: spec
                .columns
                .iter()
                .map(|c| (c.name.clone(), self.dialect.normalize_type(&c.backend_type)))
                .collect(),
            primary_key: spec.primary_key().iter().map(|c| c.to_string()).collect(),
            rows: BTreeMap::new(),
        };
        state.tables.insert(spec.name.clone(), table);
        Ok(())
    }
}

fn key_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn missing_table(statement: &str, table: &str) -> BackendError {
    BackendError::execution(statement, format!("table {} does not exist", table))
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    async fn server_version(&self) -> AdapterResult<ServerVersion> {
        Ok(self.version.clone())
    }

    /// Raw statements are recorded but not interpreted.
    async fn execute(&self, statement: &str) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, [statement.to_string()]);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> AdapterResult<bool> {
        Ok(self.state.lock().await.tables.contains_key(table))
    }

    async fn list_tables(&self) -> AdapterResult<Vec<String>> {
        Ok(self.state.lock().await.tables.keys().cloned().collect())
    }

    async fn get_column_types(&self, table: &str) -> AdapterResult<BTreeMap<String, String>> {
        Ok(self
            .state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.columns.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_row(&self, table: &str, row: &Row) -> AdapterResult<()> {
        let statement = format!("INSERT INTO {}", table);
        let mut state = self.state.lock().await;
        if state.failing_tables.contains(table) {
            return Err(BackendError::execution(statement, "injected failure"));
        }
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(&statement, table))?;
        if let Some(unknown) = row.columns().find(|c| !t.has_column(c)) {
            return Err(BackendError::execution(
                statement,
                format!("unknown column {}", unknown),
            ));
        }
        let key = t.key_of(row);
        if t.rows.contains_key(&key) {
            return Err(BackendError::already_exists(
                ObjectKind::Row,
                format!("{}/{}", table, key.join("/")),
            ));
        }
        t.rows.insert(key, row.clone());
        Ok(())
    }

    async fn update_column(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        value: &SqlValue,
    ) -> AdapterResult<()> {
        let statement = format!("UPDATE {} SET {}", table, column);
        let mut state = self.state.lock().await;
        if state.failing_tables.contains(table)
            || state
                .failing_rows
                .contains(&(table.to_string(), doc_id.to_string()))
        {
            return Err(BackendError::execution(statement, "injected failure"));
        }
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(&statement, table))?;
        if !t.has_column(column) {
            return Err(BackendError::execution(
                statement,
                format!("unknown column {}", column),
            ));
        }
        for row in t.rows.values_mut().filter(|r| r.doc_id() == Some(doc_id)) {
            row.insert(column, value.clone());
        }
        Ok(())
    }

    async fn delete_row(&self, table: &str, doc_id: &str) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if let Some(t) = state.tables.get_mut(table) {
            t.rows.retain(|_, r| r.doc_id() != Some(doc_id));
        }
        Ok(())
    }

    async fn delete_row_if(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        expected: &SqlValue,
    ) -> AdapterResult<bool> {
        let mut state = self.state.lock().await;
        let Some(t) = state.tables.get_mut(table) else {
            return Ok(false);
        };
        let before = t.rows.len();
        t.rows
            .retain(|_, r| !(r.doc_id() == Some(doc_id) && r.get(column) == Some(expected)));
        Ok(t.rows.len() < before)
    }

    async fn fetch_row(
        &self,
        table: &str,
        doc_id: &str,
        columns: &[&str],
    ) -> AdapterResult<Option<Row>> {
        let state = self.state.lock().await;
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| missing_table("SELECT", table))?;
        Ok(t.rows
            .values()
            .find(|r| r.doc_id() == Some(doc_id))
            .map(|r| project(t, r, columns)))
    }

    async fn search(&self, table: &str, columns: &[&str]) -> AdapterResult<Vec<Row>> {
        let state = self.state.lock().await;
        if state.failing_reads.contains(table) {
            return Err(BackendError::execution(
                format!("SELECT FROM {}", table),
                "injected failure",
            ));
        }
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| missing_table("SELECT", table))?;
        Ok(t.rows.values().map(|r| project(t, r, columns)).collect())
    }

    async fn create_table(&self, table: &TableSpec) -> AdapterResult<()> {
        let statements = self.dialect.create_table_sql(table, &self.version);
        let mut state = self.state.lock().await;
        self.define_table(&mut state, table)?;
        Self::record(&mut state, statements);
        Ok(())
    }

    async fn create_subtable(&self, subtable: &SubtableSpec) -> AdapterResult<()> {
        let statements = self.dialect.create_subtable_sql(subtable);
        let mut state = self.state.lock().await;
        if !state.tables.contains_key(&subtable.parent_table) {
            return Err(missing_table("CREATE TABLE", &subtable.parent_table));
        }
        self.define_table(&mut state, &subtable.table())?;
        Self::record(&mut state, statements);
        Ok(())
    }

    async fn create_index(&self, index: &IndexSpec) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if state.indexes.contains(&index.name) {
            return Err(BackendError::already_exists(ObjectKind::Index, &index.name));
        }
        let sql = self.dialect.create_index_sql(index);
        let t = state
            .tables
            .get_mut(&index.table)
            .ok_or_else(|| missing_table(&sql, &index.table))?;
        let mut statements = Vec::new();
        if let Some(generated) = &index.generated {
            if !t.has_column(&generated.name) {
                t.columns.push((
                    generated.name.clone(),
                    self.dialect.normalize_type(&generated.backend_type),
                ));
                statements.push(
                    self.dialect
                        .add_generated_column_sql(&index.table, generated),
                );
            }
        }
        if let Some(missing) = index.columns.iter().find(|c| !t.has_column(c)) {
            return Err(BackendError::execution(
                sql,
                format!("unknown column {}", missing),
            ));
        }
        statements.push(sql);
        state.indexes.insert(index.name.clone());
        Self::record(&mut state, statements);
        Ok(())
    }

    async fn alter_add_column(&self, table: &str, column: &ColumnSpec) -> AdapterResult<()> {
        let sql = self.dialect.add_column_sql(table, column);
        let mut state = self.state.lock().await;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(&sql, table))?;
        if t.has_column(&column.name) {
            return Err(BackendError::already_exists(ObjectKind::Column, &column.name));
        }
        t.columns.push((
            column.name.clone(),
            self.dialect.normalize_type(&column.backend_type),
        ));
        Self::record(&mut state, [sql]);
        Ok(())
    }

    async fn alter_drop_column(&self, table: &str, column: &str) -> AdapterResult<()> {
        let sql = self.dialect.drop_column_sql(table, column);
        let mut state = self.state.lock().await;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(&sql, table))?;
        if !t.has_column(column) {
            return Err(BackendError::execution(
                sql,
                format!("unknown column {}", column),
            ));
        }
        t.columns.retain(|(c, _)| c != column);
        for row in t.rows.values_mut() {
            row.remove(column);
        }
        Self::record(&mut state, [sql]);
        Ok(())
    }

    async fn alter_change_column_type(
        &self,
        table: &str,
        column: &ColumnSpec,
    ) -> AdapterResult<()> {
        let sql = self.dialect.change_column_type_sql(table, column);
        let mut state = self.state.lock().await;
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| missing_table(&sql, table))?;
        let slot = t
            .columns
            .iter_mut()
            .find(|(c, _)| *c == column.name)
            .ok_or_else(|| {
                BackendError::execution(sql.clone(), format!("unknown column {}", column.name))
            })?;
        slot.1 = self.dialect.normalize_type(&column.backend_type);
        Self::record(&mut state, [sql]);
        Ok(())
    }
}

/// Selected columns of a stored row; absent values read as NULL.
fn project(table: &MemoryTable, row: &Row, columns: &[&str]) -> Row {
    if columns.is_empty() {
        return table
            .columns
            .iter()
            .map(|(c, _)| (c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
            .collect();
    }
    columns
        .iter()
        .map(|c| (c.to_string(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mysql::MysqlDialect;

    fn adapter() -> MemoryAdapter {
        MemoryAdapter::new(Arc::new(MysqlDialect::new()), ServerVersion::parse("8.0.32"))
    }

    fn person() -> TableSpec {
        let mut t = TableSpec::new("jansPerson");
        t.push_column(ColumnSpec::new(DOC_ID, "VARCHAR(64)").primary_key());
        t.push_column(ColumnSpec::new("uid", "VARCHAR(64)"));
        t
    }

    #[tokio::test]
    async fn test_duplicate_table_and_row() {
        let a = adapter();
        a.create_table(&person()).await.unwrap();
        assert!(matches!(
            a.create_table(&person()).await,
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Table,
                ..
            })
        ));

        let row: Row = [(DOC_ID.to_string(), SqlValue::from("admin"))]
            .into_iter()
            .collect();
        a.insert_row("jansPerson", &row).await.unwrap();
        assert!(matches!(
            a.insert_row("jansPerson", &row).await,
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Row,
                ..
            })
        ));
        assert_eq!(a.row_count("jansPerson").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let a = adapter();
        a.create_table(&person()).await.unwrap();
        let row: Row = [
            (DOC_ID.to_string(), SqlValue::from("admin")),
            ("nope".to_string(), SqlValue::from("x")),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            a.insert_row("jansPerson", &row).await,
            Err(BackendError::Execution { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_projects_missing_as_null() {
        let a = adapter();
        a.create_table(&person()).await.unwrap();
        let row: Row = [(DOC_ID.to_string(), SqlValue::from("admin"))]
            .into_iter()
            .collect();
        a.insert_row("jansPerson", &row).await.unwrap();
        let fetched = a
            .fetch_row("jansPerson", "admin", &["uid"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.get("uid"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_add_drop_column() {
        let a = adapter();
        a.create_table(&person()).await.unwrap();
        a.alter_add_column("jansPerson", &ColumnSpec::new("mail", "JSON"))
            .await
            .unwrap();
        assert!(a
            .alter_add_column("jansPerson", &ColumnSpec::new("mail", "JSON"))
            .await
            .is_err());
        a.alter_drop_column("jansPerson", "mail").await.unwrap();
        let cols = a.get_column_types("jansPerson").await.unwrap();
        assert!(!cols.contains_key("mail"));
    }
}
