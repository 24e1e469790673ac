//! PostgreSQL backend adapter.
//!
//! Uses deadpool-postgres for connection pooling. Parameters are converted
//! against the prepared statement's declared types, so the same [`SqlValue`]
//! binds correctly to `SMALLINT`, `JSONB`, `TIMESTAMP` or `TEXT` columns.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::core::layout::DOC_ID;
use crate::core::rules::ServerVersion;
use crate::core::traits::{BackendAdapter, Dialect};
use crate::core::value::{Row, SqlValue};
use crate::drivers::common::tls::postgres_connector;
use crate::error::{AdapterResult, BackendError, LoaderError, ObjectKind, Result};

use super::PostgresDialect;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

type Param = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL adapter.
pub struct PostgresAdapter {
    pool: Pool,
    dialect: PostgresDialect,
    version: ServerVersion,
}

impl PostgresAdapter {
    /// Connect using the backend configuration.
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let port = config.port_or_default();
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match postgres_connector(config.ssl_mode)? {
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| {
                LoaderError::Backend(BackendError::execution("creating PostgreSQL pool", e))
            })?;

        let client = pool
            .get()
            .await
            .map_err(|e| BackendError::execution("connecting to PostgreSQL", e))?;

        let version = match &config.server_version {
            Some(v) => ServerVersion::parse(v),
            None => {
                let row = client
                    .query_one("SHOW server_version", &[])
                    .await
                    .map_err(|e| map_error("SHOW server_version", e))?;
                let raw: String = row
                    .try_get(0)
                    .map_err(|e| map_error("SHOW server_version", e))?;
                ServerVersion::parse(&raw)
            }
        };

        info!(
            "Connected to PostgreSQL {}: {}:{}/{}",
            version, config.host, port, config.database
        );

        Ok(Self {
            pool,
            dialect: PostgresDialect::new(),
            version,
        })
    }

    async fn client(&self) -> AdapterResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| BackendError::execution("acquiring PostgreSQL connection", e))
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

    /// Prepare `sql` and bind `values` against the declared parameter types.
    async fn run(&self, sql: &str, values: &[&SqlValue]) -> AdapterResult<u64> {
        debug!("{}", sql);
        let client = self.client().await?;
        let stmt = client.prepare(sql).await.map_err(|e| map_error(sql, e))?;
        let params = bind_params(sql, stmt.params(), values)?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        client
            .execute(&stmt, &refs)
            .await
            .map_err(|e| map_error(sql, e))
    }

    async fn query_rows(&self, sql: &str, values: &[&SqlValue]) -> AdapterResult<Vec<Row>> {
        debug!("{}", sql);
        let client = self.client().await?;
        let stmt = client.prepare(sql).await.map_err(|e| map_error(sql, e))?;
        let params = bind_params(sql, stmt.params(), values)?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = client
            .query(&stmt, &refs)
            .await
            .map_err(|e| map_error(sql, e))?;
        rows.iter().map(|r| decode_row(sql, r)).collect()
    }
}

#[async_trait]
impl BackendAdapter for PostgresAdapter {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn server_version(&self) -> AdapterResult<ServerVersion> {
        Ok(self.version.clone())
    }

    async fn execute(&self, statement: &str) -> AdapterResult<()> {
        debug!("{}", statement);
        let client = self.client().await?;
        client
            .batch_execute(statement)
            .await
            .map_err(|e| map_error(statement, e))
    }

    async fn table_exists(&self, table: &str) -> AdapterResult<bool> {
        let sql = "SELECT 1 FROM information_schema.tables \
                   WHERE table_schema = current_schema() AND table_name = $1";
        let client = self.client().await?;
        let rows = client
            .query(sql, &[&table])
            .await
            .map_err(|e| map_error(sql, e))?;
        Ok(!rows.is_empty())
    }

    async fn list_tables(&self) -> AdapterResult<Vec<String>> {
        let sql = "SELECT table_name::text FROM information_schema.tables \
                   WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                   ORDER BY table_name";
        let client = self.client().await?;
        let rows = client.query(sql, &[]).await.map_err(|e| map_error(sql, e))?;
        rows.iter()
            .map(|r| r.try_get::<_, String>(0).map_err(|e| map_error(sql, e)))
            .collect()
    }

    async fn get_column_types(&self, table: &str) -> AdapterResult<BTreeMap<String, String>> {
        let sql = r#"
            SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = current_schema()
              AND c.relname = $1
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
        "#;
        let client = self.client().await?;
        let rows = client
            .query(sql, &[&table])
            .await
            .map_err(|e| map_error(sql, e))?;

        let mut columns = BTreeMap::new();
        for row in rows {
            let name: String = row.try_get(0).map_err(|e| map_error(sql, e))?;
            let data_type: String = row.try_get(1).map_err(|e| map_error(sql, e))?;
            columns.insert(name, self.dialect.normalize_type(&data_type));
        }
        Ok(columns)
    }

    async fn insert_row(&self, table: &str, row: &Row) -> AdapterResult<()> {
        let columns: Vec<String> = row.columns().map(|c| self.dialect.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<&SqlValue> = row.iter().map(|(_, v)| v).collect();
        match self.run(&sql, &values).await {
            Err(BackendError::AlreadyExists {
                kind: ObjectKind::Row,
                ..
            }) => Err(BackendError::already_exists(
                ObjectKind::Row,
                format!("{}/{}", table, row.doc_id().unwrap_or_default()),
            )),
            other => other.map(|_| ()),
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
            "UPDATE {} SET {} = $1 WHERE {} = $2",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(column),
            self.dialect.quote_ident(DOC_ID)
        );
        let key = SqlValue::from(doc_id);
        self.run(&sql, &[value, &key]).await.map(|_| ())
    }

    async fn delete_row(&self, table: &str, doc_id: &str) -> AdapterResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID)
        );
        let key = SqlValue::from(doc_id);
        self.run(&sql, &[&key]).await.map(|_| ())
    }

    async fn delete_row_if(
        &self,
        table: &str,
        doc_id: &str,
        column: &str,
        expected: &SqlValue,
    ) -> AdapterResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1 AND {} = $2",
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID),
            self.dialect.quote_ident(column)
        );
        let key = SqlValue::from(doc_id);
        Ok(self.run(&sql, &[&key, expected]).await? > 0)
    }

    async fn fetch_row(
        &self,
        table: &str,
        doc_id: &str,
        columns: &[&str],
    ) -> AdapterResult<Option<Row>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            self.select_list(columns),
            self.dialect.quote_ident(table),
            self.dialect.quote_ident(DOC_ID)
        );
        let key = SqlValue::from(doc_id);
        Ok(self.query_rows(&sql, &[&key]).await?.into_iter().next())
    }

    async fn search(&self, table: &str, columns: &[&str]) -> AdapterResult<Vec<Row>> {
        let sql = format!(
            "SELECT {} FROM {}",
            self.select_list(columns),
            self.dialect.quote_ident(table)
        );
        self.query_rows(&sql, &[]).await
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Map driver errors, separating duplicate-object conditions.
fn map_error(statement: &str, e: tokio_postgres::Error) -> BackendError {
    let Some(db) = e.as_db_error() else {
        return BackendError::execution(statement, e);
    };
    let name = quoted_name(db.message());
    let code = db.code();
    if *code == SqlState::DUPLICATE_TABLE {
        // CREATE INDEX collisions are reported as duplicate relations.
        let kind = if statement.to_uppercase().contains(" INDEX ") {
            ObjectKind::Index
        } else {
            ObjectKind::Table
        };
        BackendError::already_exists(kind, name)
    } else if *code == SqlState::DUPLICATE_COLUMN {
        BackendError::already_exists(ObjectKind::Column, name)
    } else if *code == SqlState::DUPLICATE_OBJECT {
        BackendError::already_exists(ObjectKind::Index, name)
    } else if *code == SqlState::UNIQUE_VIOLATION {
        BackendError::already_exists(ObjectKind::Row, name)
    } else {
        BackendError::execution(statement, db.message())
    }
}

/// First double-quoted name in a server message, or the whole message.
fn quoted_name(message: &str) -> String {
    let mut parts = message.split('"');
    match (parts.next(), parts.next()) {
        (Some(_), Some(name)) if !name.is_empty() => name.to_string(),
        _ => message.to_string(),
    }
}

fn bind_params(sql: &str, types: &[Type], values: &[&SqlValue]) -> AdapterResult<Vec<Param>> {
    if types.len() != values.len() {
        return Err(BackendError::execution(
            sql,
            format!("expected {} parameters, got {}", types.len(), values.len()),
        ));
    }
    types
        .iter()
        .zip(values)
        .map(|(ty, v)| to_param(v, ty).map_err(|msg| BackendError::execution(sql, msg)))
        .collect()
}

/// Convert a value to a parameter accepted by a column of type `ty`.
fn to_param(value: &SqlValue, ty: &Type) -> std::result::Result<Param, String> {
    let param: Param = match value {
        SqlValue::Null => null_param(ty),
        SqlValue::Bool(b) => match *ty {
            Type::INT2 => Box::new(i16::from(*b)),
            Type::BOOL => Box::new(*b),
            _ => Box::new(b.to_string()),
        },
        SqlValue::I16(v) => integer_param(i64::from(*v), ty)?,
        SqlValue::I64(v) => integer_param(*v, ty)?,
        SqlValue::Text(s) => match *ty {
            Type::INT2 | Type::INT4 | Type::INT8 | Type::BOOL | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
                if s.trim().is_empty() =>
            {
                null_param(ty)
            }
            Type::TIMESTAMP | Type::TIMESTAMPTZ => {
                let ts = parse_timestamp_text(s)?;
                if *ty == Type::TIMESTAMP {
                    Box::new(ts)
                } else {
                    Box::new(Utc.from_utc_datetime(&ts))
                }
            }
            Type::JSON | Type::JSONB => Box::new(
                serde_json::from_str::<serde_json::Value>(s)
                    .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
            ),
            Type::INT2 | Type::INT4 | Type::INT8 => {
                let n = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| format!("'{}' is not an integer", s))?;
                integer_param(n, ty)?
            }
            _ => Box::new(s.clone()),
        },
        SqlValue::Json(v) => match *ty {
            Type::JSON | Type::JSONB => Box::new(v.clone()),
            _ => Box::new(v.to_string()),
        },
        SqlValue::TextArray(items) => match *ty {
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Box::new(items.clone()),
            Type::JSON | Type::JSONB => Box::new(serde_json::json!(items)),
            _ => Box::new(serde_json::json!(items).to_string()),
        },
        SqlValue::Timestamp(ts) => match *ty {
            Type::TIMESTAMP => Box::new(*ts),
            Type::TIMESTAMPTZ => Box::new(Utc.from_utc_datetime(ts)),
            _ => Box::new(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        },
    };
    Ok(param)
}

fn parse_timestamp_text(s: &str) -> std::result::Result<NaiveDateTime, String> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
        .ok_or_else(|| format!("'{}' is not a timestamp", s))
}

fn integer_param(v: i64, ty: &Type) -> std::result::Result<Param, String> {
    let out_of_range = |_| format!("{} out of range for {}", v, ty.name());
    let param: Param = match *ty {
        Type::INT2 => Box::new(i16::try_from(v).map_err(out_of_range)?),
        Type::INT4 => Box::new(i32::try_from(v).map_err(out_of_range)?),
        Type::INT8 => Box::new(v),
        Type::BOOL => Box::new(v != 0),
        _ => Box::new(v.to_string()),
    };
    Ok(param)
}

/// Typed NULL; tokio-postgres checks the Rust type against the column type.
fn null_param(ty: &Type) -> Param {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::JSON | Type::JSONB => Box::new(None::<serde_json::Value>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<chrono::DateTime<Utc>>),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Box::new(None::<Vec<String>>),
        _ => Box::new(None::<String>),
    }
}

fn decode_row(sql: &str, row: &tokio_postgres::Row) -> AdapterResult<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let err = |e: tokio_postgres::Error| map_error(sql, e);
        let value = match *column.type_() {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(idx)
                .map_err(err)?
                .map(SqlValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .map_err(err)?
                .map(SqlValue::I16),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .map_err(err)?
                .map(|v| SqlValue::I64(i64::from(v))),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .map_err(err)?
                .map(SqlValue::I64),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)
                .map_err(err)?
                .map(SqlValue::Json),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)
                .map_err(err)?
                .map(SqlValue::Timestamp),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<Utc>>>(idx)
                .map_err(err)?
                .map(|v| SqlValue::Timestamp(v.naive_utc())),
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => row
                .try_get::<_, Option<Vec<String>>>(idx)
                .map_err(err)?
                .map(SqlValue::TextArray),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .map_err(err)?
                .map(SqlValue::Text),
        };
        out.insert(column.name(), value.unwrap_or(SqlValue::Null));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_name() {
        assert_eq!(quoted_name("relation \"jansPerson\" already exists"), "jansPerson");
        assert_eq!(quoted_name("no quotes here"), "no quotes here");
    }

    #[test]
    fn test_integer_param_range() {
        assert!(integer_param(1, &Type::INT2).is_ok());
        assert!(integer_param(70_000, &Type::INT2).is_err());
        assert!(integer_param(70_000, &Type::INT4).is_ok());
    }

    #[test]
    fn test_text_to_int_param_rejects_garbage() {
        let v = SqlValue::Text("abc".into());
        assert!(to_param(&v, &Type::INT4).is_err());
        let v = SqlValue::Text("42".into());
        assert!(to_param(&v, &Type::INT4).is_ok());
    }

    #[test]
    fn test_blank_text_binds_null_for_typed_columns() {
        let blank = SqlValue::Text(String::new());
        for ty in [Type::INT4, Type::INT8, Type::TIMESTAMP, Type::TIMESTAMPTZ, Type::BOOL] {
            let param = to_param(&blank, &ty).unwrap();
            assert_eq!(format!("{:?}", param), "None", "{}", ty.name());
        }
        let param = to_param(&blank, &Type::VARCHAR).unwrap();
        assert_eq!(format!("{:?}", param), "\"\"");
    }

    #[test]
    fn test_text_to_timestamp_param() {
        let v = SqlValue::Text("2024-01-02 03:04:05.123".into());
        assert!(to_param(&v, &Type::TIMESTAMP).is_ok());
        let v = SqlValue::Text("yesterday".into());
        assert!(to_param(&v, &Type::TIMESTAMP).is_err());
    }

    #[test]
    fn test_bind_params_count_mismatch() {
        let v = SqlValue::Null;
        let err = bind_params("SELECT $1, $2", &[Type::TEXT, Type::TEXT], &[&v]);
        assert!(matches!(err, Err(BackendError::Execution { .. })));
    }
}
