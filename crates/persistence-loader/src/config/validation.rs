//! Configuration validation.

use super::{BackendConfig, Config};
use crate::error::{LoaderError, Result};

/// Validate the configuration.
///
/// Connection fields are checked separately by [`validate_connection`],
/// since planning runs without a live backend.
pub fn validate(config: &Config) -> Result<()> {
    config
        .backend
        .kind()
        .map_err(|e| LoaderError::Config(format!("backend.dialect: {}", e)))?;

    if config.backend.max_connections == 0 {
        return Err(LoaderError::Config(
            "backend.max_connections must be at least 1".into(),
        ));
    }

    if config.schema.files.is_empty() {
        return Err(LoaderError::Config(
            "schema.files must list at least one schema document".into(),
        ));
    }

    if config.lock.enabled {
        if config.lock.name.is_empty() {
            return Err(LoaderError::Config("lock.name is required".into()));
        }
        if config.lock.ttl_secs == 0 {
            return Err(LoaderError::Config(
                "lock.ttl_secs must be at least 1".into(),
            ));
        }
        if config.lock.poll_interval_ms == 0 {
            return Err(LoaderError::Config(
                "lock.poll_interval_ms must be at least 1".into(),
            ));
        }
    }

    Ok(())
}

/// Validate the fields needed to open a live connection.
pub fn validate_connection(backend: &BackendConfig) -> Result<()> {
    if backend.host.is_empty() {
        return Err(LoaderError::Config("backend.host is required".into()));
    }
    if backend.database.is_empty() {
        return Err(LoaderError::Config("backend.database is required".into()));
    }
    if backend.user.is_empty() {
        return Err(LoaderError::Config("backend.user is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoadConfig, LockConfig, MigrationSettings, PolicyConfig, SchemaConfig};
    use crate::drivers::common::SslMode;
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            backend: BackendConfig {
                dialect: "pgsql".to_string(),
                host: "localhost".to_string(),
                port: None,
                database: "jans".to_string(),
                user: "jans".to_string(),
                password: "secret".to_string(),
                ssl_mode: SslMode::Disable,
                server_version: None,
                max_connections: 4,
            },
            schema: SchemaConfig {
                files: vec![PathBuf::from("jans_schema.json")],
                attribute_syntax: None,
            },
            policy: PolicyConfig::default(),
            load: LoadConfig::default(),
            migration: MigrationSettings::default(),
            lock: LockConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
        assert!(validate_connection(&config.backend).is_ok());
    }

    #[test]
    fn test_unknown_dialect() {
        let mut config = valid_config();
        config.backend.dialect = "oracle".to_string();
        assert!(matches!(validate(&config), Err(LoaderError::Config(_))));
    }

    #[test]
    fn test_missing_schema_files() {
        let mut config = valid_config();
        config.schema.files.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_lock_ttl() {
        let mut config = valid_config();
        config.lock.ttl_secs = 0;
        assert!(validate(&config).is_err());

        config.lock.enabled = false;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_host_only_fails_connection_check() {
        let mut config = valid_config();
        config.backend.host = String::new();
        assert!(validate(&config).is_ok());
        assert!(validate_connection(&config.backend).is_err());
    }

    #[test]
    fn test_password_redacted() {
        let config = valid_config();
        let debug = format!("{:?}", config.backend);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
