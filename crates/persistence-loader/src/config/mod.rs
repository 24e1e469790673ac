//! Configuration loading and validation.
//!
//! Configuration is read once, validated, and passed by reference into every
//! component. Relative paths are resolved against the config file's directory.

mod types;
mod validation;

pub use validation::validate_connection;

pub use types::*;

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration, logged to correlate runs.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        let fix_opt = |p: &mut Option<PathBuf>| {
            if let Some(p) = p {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        };

        self.schema.files.iter_mut().for_each(fix);
        fix_opt(&mut self.schema.attribute_syntax);
        fix_opt(&mut self.policy.data_types);
        fix_opt(&mut self.policy.syntax_mapping);
        fix_opt(&mut self.policy.index);
        fix_opt(&mut self.policy.sub_tables);
        fix_opt(&mut self.policy.directory_index);
        self.load.templates.iter_mut().for_each(fix);
        fix_opt(&mut self.load.custom_dir);
        fix_opt(&mut self.migration.plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
backend:
  dialect: mysql
  host: db
  database: jans
  user: jans
  password: pw
schema:
  files: [schema/jans_schema.json, /abs/custom_schema.json]
load:
  templates: [templates/base.ldif]
  context:
    hostname: idp.example.org
"#;

    #[test]
    fn test_from_yaml_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.backend.port_or_default(), 3306);
        assert!(config.migration.enabled);
        assert!(config.migration.sync_missing_columns);
        assert_eq!(config.lock.name, "persistence-loader-init");
        assert_eq!(config.lock.ttl_secs, 300);
        assert_eq!(config.load.context["hostname"], "idp.example.org");
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config::from_yaml(YAML).unwrap();
        config.resolve_paths(Path::new("/etc/loader"));
        assert_eq!(
            config.schema.files[0],
            PathBuf::from("/etc/loader/schema/jans_schema.json")
        );
        assert_eq!(config.schema.files[1], PathBuf::from("/abs/custom_schema.json"));
        assert_eq!(
            config.load.templates[0],
            PathBuf::from("/etc/loader/templates/base.ldif")
        );
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
