//! Backend catalog for explicit dependency injection.
//!
//! The [`BackendCatalog`] is a registry of dialects plus the factory that
//! opens live adapters. It is constructed explicitly and passed to the
//! loader rather than living in global state, so tests can swap in the
//! in-memory adapter without touching the rest of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{validate_connection, BackendConfig};
use crate::drivers::{MemoryAdapter, MysqlDialect, PostgresAdapter, PostgresDialect, SpannerDialect};
use crate::error::{LoaderError, Result};

use super::rules::{DialectKind, ServerVersion};
use super::traits::{BackendAdapter, Dialect};

/// Registry of dialects keyed by canonical dialect kind.
#[derive(Default)]
pub struct BackendCatalog {
    dialects: HashMap<DialectKind, Arc<dyn Dialect>>,
}

impl BackendCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the MySQL, PostgreSQL and Spanner dialects registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register_dialect(MysqlDialect::new());
        catalog.register_dialect(PostgresDialect::new());
        catalog.register_dialect(SpannerDialect::new());
        catalog
    }

    /// Register a dialect under its own kind, replacing any previous one.
    pub fn register_dialect(&mut self, dialect: impl Dialect + 'static) {
        self.dialects.insert(dialect.kind(), Arc::new(dialect));
    }

    pub fn get_dialect(&self, kind: DialectKind) -> Option<Arc<dyn Dialect>> {
        self.dialects.get(&kind).cloned()
    }

    /// Get a dialect, returning an error if none is registered.
    pub fn require_dialect(&self, kind: DialectKind) -> Result<Arc<dyn Dialect>> {
        self.get_dialect(kind).ok_or_else(|| {
            LoaderError::BackendUnsupported(format!("no dialect registered for {}", kind))
        })
    }

    pub fn has_dialect(&self, kind: DialectKind) -> bool {
        self.dialects.contains_key(&kind)
    }

    /// Open a live adapter for the configured backend.
    pub async fn connect(&self, config: &BackendConfig) -> Result<Arc<dyn BackendAdapter>> {
        let kind = config.kind()?;
        self.require_dialect(kind)?;
        validate_connection(config)?;

        match kind {
            DialectKind::Pgsql => Ok(Arc::new(PostgresAdapter::connect(config).await?)),
            #[cfg(feature = "mysql")]
            DialectKind::Mysql => Ok(Arc::new(crate::drivers::MysqlAdapter::connect(config).await?)),
            #[cfg(not(feature = "mysql"))]
            DialectKind::Mysql => Err(LoaderError::BackendUnsupported(
                "mysql support is not compiled in (enable the 'mysql' feature)".into(),
            )),
            DialectKind::Spanner => Err(LoaderError::BackendUnsupported(
                "no live Spanner adapter is available; use `plan` to render Spanner DDL".into(),
            )),
        }
    }

    /// In-memory adapter speaking the given dialect.
    pub fn memory(&self, kind: DialectKind, version: ServerVersion) -> Result<Arc<MemoryAdapter>> {
        let dialect = self.require_dialect(kind)?;
        Ok(Arc::new(MemoryAdapter::new(dialect, version)))
    }
}

impl std::fmt::Debug for BackendCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendCatalog")
            .field("dialects", &self.dialects.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::SslMode;

    fn backend(dialect: &str) -> BackendConfig {
        BackendConfig {
            dialect: dialect.to_string(),
            host: "localhost".to_string(),
            port: None,
            database: "jans".to_string(),
            user: "jans".to_string(),
            password: String::new(),
            ssl_mode: SslMode::Disable,
            server_version: None,
            max_connections: 1,
        }
    }

    #[test]
    fn test_builtins_registered() {
        let catalog = BackendCatalog::with_builtins();
        for kind in [DialectKind::Mysql, DialectKind::Pgsql, DialectKind::Spanner] {
            assert!(catalog.has_dialect(kind));
            assert_eq!(catalog.require_dialect(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_empty_catalog_requires_registration() {
        let catalog = BackendCatalog::new();
        assert!(matches!(
            catalog.require_dialect(DialectKind::Mysql),
            Err(LoaderError::BackendUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_spanner_connect_unsupported() {
        let catalog = BackendCatalog::with_builtins();
        let err = catalog.connect(&backend("spanner")).await.err().unwrap();
        assert!(matches!(err, LoaderError::BackendUnsupported(_)));
    }

    #[tokio::test]
    async fn test_connect_requires_host() {
        let catalog = BackendCatalog::with_builtins();
        let mut config = backend("pgsql");
        config.host.clear();
        let err = catalog.connect(&config).await.err().unwrap();
        assert!(matches!(err, LoaderError::Config(_)));
    }
}
