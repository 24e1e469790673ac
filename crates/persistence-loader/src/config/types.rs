//! Configuration type definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::rules::DialectKind;
use crate::drivers::common::SslMode;
use crate::error::Result;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target backend and connection settings.
    pub backend: BackendConfig,

    /// Schema documents.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Type, index and subtable policy documents.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Initial data to import.
    #[serde(default)]
    pub load: LoadConfig,

    /// Column migrations.
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Whole-run lock.
    #[serde(default)]
    pub lock: LockConfig,
}

/// Backend connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Dialect name: mysql, pgsql or spanner (aliases accepted).
    pub dialect: String,

    #[serde(default)]
    pub host: String,

    /// Port; defaults to the dialect's standard port.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// TLS mode (default: disable).
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Server version override; queried from the server when absent.
    #[serde(default)]
    pub server_version: Option<String>,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("server_version", &self.server_version)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl BackendConfig {
    /// Canonical dialect.
    pub fn kind(&self) -> Result<DialectKind> {
        DialectKind::parse(&self.dialect)
    }

    /// Configured port or the dialect default.
    pub fn port_or_default(&self) -> u16 {
        match (self.port, self.kind()) {
            (Some(p), _) => p,
            (None, Ok(DialectKind::Pgsql)) => 5432,
            (None, Ok(DialectKind::Spanner)) => 9010,
            (None, _) => 3306,
        }
    }
}

/// Schema document locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Schema documents, applied in order.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Attribute → syntax map for attributes defined outside the schema files.
    #[serde(default)]
    pub attribute_syntax: Option<PathBuf>,
}

/// Policy document locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Explicit per-attribute type overrides.
    #[serde(default)]
    pub data_types: Option<PathBuf>,

    /// Syntax → type mapping; the bundled mapping is used when absent.
    #[serde(default)]
    pub syntax_mapping: Option<PathBuf>,

    /// Index policy for the configured dialect.
    #[serde(default)]
    pub index: Option<PathBuf>,

    /// Subtable designations keyed by dialect.
    #[serde(default)]
    pub sub_tables: Option<PathBuf>,

    /// Attributes indexed by the directory backend.
    #[serde(default)]
    pub directory_index: Option<PathBuf>,
}

/// Initial data import settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadConfig {
    /// LDIF templates, imported in order.
    #[serde(default)]
    pub templates: Vec<PathBuf>,

    /// Directory scanned recursively for `*.ldif` after the templates.
    #[serde(default)]
    pub custom_dir: Option<PathBuf>,

    /// Placeholder values substituted into templates.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Column migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Run column migrations (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Versioned migration plan; the bundled plan is used when absent.
    #[serde(default)]
    pub plan: Option<PathBuf>,

    /// Add desired columns missing from existing tables (default: true).
    #[serde(default = "default_true")]
    pub sync_missing_columns: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            plan: None,
            sync_missing_columns: true,
        }
    }
}

/// Whole-run lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Acquire the lock before running (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lock name (default: "persistence-loader-init").
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Seconds after which a held lock is considered stale (default: 300).
    #[serde(default = "default_lock_ttl")]
    pub ttl_secs: u64,

    /// Seconds to wait for the lock before failing (default: 60).
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,

    /// Milliseconds between acquisition attempts (default: 500).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: default_lock_name(),
            ttl_secs: default_lock_ttl(),
            timeout_secs: default_lock_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_max_connections() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_lock_name() -> String {
    "persistence-loader-init".to_string()
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    500
}
