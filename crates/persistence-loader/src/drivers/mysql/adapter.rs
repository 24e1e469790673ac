//! MySQL/MariaDB backend adapter.
//!
//! Uses mysql_async for connection pooling. Values are bound positionally;
//! JSON documents and timestamps travel as text and are parsed server-side.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Value};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::core::layout::DOC_ID;
use crate::core::rules::ServerVersion;
use crate::core::traits::{BackendAdapter, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::tls::mysql_ssl_opts;
use crate::error::{AdapterResult, BackendError, LoaderError, ObjectKind, Result};

use super::MysqlDialect;

const ER_TABLE_EXISTS: u16 = 1050;
const ER_DUP_FIELDNAME: u16 = 1060;
const ER_DUP_KEYNAME: u16 = 1061;
const ER_DUP_ENTRY: u16 = 1062;

/// Timestamp text accepted by DATETIME(3) and TIMESTAMP columns.
const BIND_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// MySQL adapter using mysql_async.
pub struct MysqlAdapter {
    pool: Pool,
    dialect: MysqlDialect,
    version: ServerVersion,
}

impl MysqlAdapter {
    /// Connect using the backend configuration.
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let port = config.port_or_default();
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = mysql_ssl_opts(config.ssl_mode) {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, config.max_connections).ok_or_else(|| {
            LoaderError::Config(format!(
                "invalid pool size {} for MySQL",
                config.max_connections
            ))
        })?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| BackendError::execution("connecting to MySQL", e))?;

        let version = match &config.server_version {
            Some(v) => ServerVersion::parse(v),
            None => {
                let raw: Option<String> = conn
                    .query_first("SELECT VERSION()")
                    .await
                    .map_err(|e| map_error("SELECT VERSION()", e))?;
                ServerVersion::parse(&raw.unwrap_or_default())
            }
        };
        drop(conn);

        info!(
            "Connected to {} {}: {}:{}/{}",
            if version.mariadb { "MariaDB" } else { "MySQL" },
            version,
            config.host,
            port,
            config.database
        );

        Ok(Self {
            pool,
            dialect: MysqlDialect::new(),
            version,
        })
    }

    async fn conn(&self) -> AdapterResult<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| BackendError::execution("acquiring MySQL connection", e))
    }

    fn select_list(&self, columns: &[&str]) -> String {
        if columns.is_empty() {
            return "*".to_string();
        }
        columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn exec(&self, sql: &str, values: Vec<Value>) -> AdapterResult<()> {
        debug!("{}", sql);
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, Params::Positional(values))
            .await
            .map_err(|e| map_error(sql, e))
    }

    /// Execute and return the number of affected rows.
    async fn exec_counted(&self, sql: &str, values: Vec<Value>) -> AdapterResult<u64> {
        debug!("{}", sql);
        let mut conn = self.conn().await?;
        conn.exec_drop(sql, Params::Positional(values))
            .await
            .map_err(|e| map_error(sql, e))?;
        Ok(conn.affected_rows())
    }

    async fn query_rows(&self, sql: &str, values: Vec<Value>) -> AdapterResult<Vec<Row>> {
        debug!("{}", sql);
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn
            .exec(sql, Params::Positional(values))
            .await
            .map_err(|e| map_error(sql, e))?;
        Ok(rows.into_iter().map(decode_row).collect())
    }

    /// Columns MariaDB reports as LONGTEXT but guards with `json_valid`.
    async fn mariadb_json_columns(&self, table: &str) -> AdapterResult<Vec<String>> {
        let sql = "SELECT check_clause FROM information_schema.check_constraints \
                   WHERE constraint_schema = DATABASE() AND table_name = ?";
        let mut conn = self.conn().await?;
        let clauses: Vec<String> = conn
            .exec(sql, (table,))
            .await
            .map_err(|e| map_error(sql, e))?;
        Ok(clauses.iter().filter_map(|c| json_valid_column(c)).collect())
    }
}

#[async_trait]
impl BackendAdapter for MysqlAdapter {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn server_version(&self) -> AdapterResult<ServerVersion> {
        Ok(self.version.clone())
    }

    async fn execute(&self, statement: &str) -> AdapterResult<()> {
        debug!("{}", statement);
        let mut conn = self.conn().await?;
        conn.query_drop(statement)
            .await
            .map_err(|e| map_error(statement, e))
    }

    async fn table_exists(&self, table: &str) -> AdapterResult<bool> {
        let sql = "SELECT 1 FROM information_schema.tables \
                   WHERE table_schema = DATABASE() AND table_name = ?";
        let mut conn = self.conn().await?;
        let found: Option<i64> = conn
            .exec_first(sql, (table,))
            .await
            .map_err(|e| map_error(sql, e))?;
        Ok(found.is_some())
    }

    async fn list_tables(&self) -> AdapterResult<Vec<String>> {
        let sql = "SELECT table_name FROM information_schema.tables \
                   WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                   ORDER BY table_name";
        let mut conn = self.conn().await?;
        conn.query(sql).await.map_err(|e| map_error(sql, e))
    }

    async fn get_column_types(&self, table: &str) -> AdapterResult<BTreeMap<String, String>> {
        let sql = "SELECT column_name, column_type FROM information_schema.columns \
                   WHERE table_schema = DATABASE() AND table_name = ? \
                   ORDER BY ordinal_position";
        let rows: Vec<(String, String)> = {
            let mut conn = self.conn().await?;
            conn.exec(sql, (table,))
                .await
                .map_err(|e| map_error(sql, e))?
        };

        let json_columns = if self.version.mariadb && !rows.is_empty() {
            self.mariadb_json_columns(table).await?
        } else {
            Vec::new()
        };

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| {
                let data_type = if json_columns.contains(&name) {
                    "JSON".to_string()
                } else {
                    self.dialect.normalize_type(&data_type)
                };
                (name, data_type)
            })
            .collect())
    }

    async fn insert_row(&self, table: &str, row: &Row) -> AdapterResult<()> {
        let columns: Vec<String> = row.columns().map(|c| self.dialect.quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_ident(table),
            columns.join(", "),
            placeholders
        );
        let values = row.iter().map(|(_, v)| to_value(v)).collect();
        match self.exec(&sql, values).await {
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Row,
                ..
            }) => Err(BackendError::already_exists(
                ObjectKind::Row,
                format!("{}/{}", table, row.doc_id().unwrap_or_default()),
            )),
            other => other,
        }
    }

    async fn update_column(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        value: &SqlValue,
    ) -> AdapterResult<()> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(column),
            self.dialect.quote_ident(DOC_ID)
        );
        self.exec(&sql, vec![to_value(value), Value::from(doc_id)])
            .await
    }

    async fn delete_row(&self, table: &str, doc_id: &str) -> AdapterResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID)
        );
        self.exec(&sql, vec![Value::from(doc_id)]).await
    }

    async fn delete_row_if(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        expected: &SqlValue,
    ) -> AdapterResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID),
            self.dialect.quote_ident(column)
        );
        let deleted = self
            .exec_counted(&sql, vec![Value::from(doc_id), to_value(expected)])
            .await?;
        Ok(deleted > 0)
    }

    async fn fetch_row(
        &self,
        table: &str,
        doc_id: &str,
        columns: &[&str],
    ) -> AdapterResult<Option<Row>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            self.select_list(columns),
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID)
        );
        Ok(self
            .query_rows(&sql, vec![Value::from(doc_id)])
            .await?
            .into_iter()
            .next())
    }

    async fn search(&self, table: &str, columns: &[&str]) -> AdapterResult<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {}",
            self.select_list(columns),
            self.dialect.quote_ident(table)
        );
        self.query_rows(&sql, Vec::new()).await
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            debug!("MySQL pool disconnect: {}", e);
        }
    }
}

/// Map driver errors, separating duplicate-object conditions.
fn map_error(statement: &str, e: mysql_async::Error) -> BackendError {
    match &e {
        mysql_async::Error::Server(server) => {
            let name = quoted_name(&server.message);
            match server.code {
                ER_TABLE_EXISTS => BackendError::already_exists(ObjectKind::Table, name),
                ER_DUP_FIELDNAME => BackendError::already_exists(ObjectKind::Column, name),
                ER_DUP_KEYNAME => BackendError::already_exists(ObjectKind::Index, name),
                ER_DUP_ENTRY => BackendError::already_exists(ObjectKind::Row, name),
                _ => BackendError::execution(statement, &server.message),
            }
        }
        _ => BackendError::execution(statement, e),
    }
}

/// First single-quoted name in a server message, or the whole message.
fn quoted_name(message: &str) -> String {
    let mut parts = message.split('\'');
    match (parts.next(), parts.next()) {
        (Some(_), Some(name)) if !name.is_empty() => name.to_string(),
        _ => message.to_string(),
    }
}

/// Column guarded by a `json_valid(`col`)` check clause.
fn json_valid_column(clause: &str) -> Option<String> {
    let lower = clause.to_lowercase();
    let start = lower.find("json_valid(")? + "json_valid(".len();
    let rest = &clause[start..];
    let end = rest.find(')')?;
    let name = rest[..end].trim().trim_matches('`');
    (!name.is_empty()).then(|| name.to_string())
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::I16(v) => Value::Int(i64::from(*v)),
        SqlValue::I64(v) => Value::Int(*v),
        SqlValue::Text(s) => Value::from(s.as_str()),
        SqlValue::Json(v) => Value::from(v.to_string()),
        SqlValue::TextArray(items) => Value::from(serde_json::json!(items).to_string()),
        SqlValue::Timestamp(ts) => Value::from(ts.format(BIND_TIMESTAMP_FORMAT).to_string()),
    }
}

fn decode_row(row: mysql_async::Row) -> Row {
    let columns = row.columns();
    let values = row.unwrap();
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            let is_json = column.column_type() == ColumnType::MYSQL_TYPE_JSON;
            (column.name_str().into_owned(), from_value(value, is_json))
        })
        .collect()
}

fn from_value(value: Value, is_json: bool) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::I64(v),
        Value::UInt(v) => i64::try_from(v)
            .map(SqlValue::I64)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string())),
        Value::Float(v) => SqlValue::Text(v.to_string()),
        Value::Double(v) => SqlValue::Text(v.to_string()),
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if is_json {
                serde_json::from_str(&text)
                    .map(SqlValue::Json)
                    .unwrap_or(SqlValue::Text(text))
            } else {
                SqlValue::Text(text)
            }
        }
        Value::Date(year, month, day, hour, minute, second, micros) => {
            NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .and_then(|d| {
                    d.and_hms_micro_opt(u32::from(hour), u32::from(minute), u32::from(second), micros)
                })
                .map(SqlValue::Timestamp)
                .unwrap_or(SqlValue::Null)
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => SqlValue::Text(format!(
            "{}{}:{:02}:{:02}.{:06}",
            if negative { "-" } else { "" },
            days * 24 + u32::from(hours),
            minutes,
            seconds,
            micros
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn test_quoted_name() {
        assert_eq!(quoted_name("Table 'jansPerson' already exists"), "jansPerson");
        assert_eq!(
            quoted_name("Duplicate entry 'abc' for key 'PRIMARY'"),
            "abc"
        );
    }

    #[test]
    fn test_json_valid_column() {
        assert_eq!(
            json_valid_column("json_valid(`jansExtUid`)"),
            Some("jansExtUid".to_string())
        );
        assert_eq!(json_valid_column("`age` > 0"), None);
    }

    #[test]
    fn test_to_value() {
        assert_eq!(to_value(&SqlValue::I16(1)), Value::Int(1));
        assert_eq!(
            to_value(&SqlValue::Json(serde_json::json!({"v": ["a"]}))),
            Value::from(r#"{"v":["a"]}"#)
        );
    }

    #[test]
    fn test_from_value_date() {
        let v = from_value(Value::Date(2024, 1, 2, 3, 4, 5, 0), false);
        let expected =
            NaiveDateTime::parse_from_str("2024-01-02 03:04:05", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(v, SqlValue::Timestamp(expected));
    }

    #[test]
    fn test_from_value_json_bytes() {
        let v = from_value(Value::Bytes(br#"{"v":[]}"#.to_vec()), true);
        assert_eq!(v, SqlValue::Json(serde_json::json!({"v": []})));
    }
}
