//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
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

    /// Table spec for `table`: the configured key, or `default_pk`.
    pub fn table_spec(&self, table: &str) -> TableSpec {
        self.sync
            .tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(table))
            .cloned()
            .unwrap_or_else(|| TableSpec::new(table, self.sync.default_pk.clone()))
    }

    /// Override entry for `table`, or the empty default.
    pub fn override_for(&self, table: &str) -> TableOverride {
        self.sync
            .overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, o)| o.clone())
            .unwrap_or_default()
    }
}

impl DatabaseConfig {
    /// ADO-style connection string with the password masked, for logs.
    pub fn connection_string(&self) -> String {
        format!(
            "Server=tcp:{},{};Database={};User Id={};Password=****;Encrypt={};TrustServerCertificate={}",
            self.host, self.port, self.database, self.user, self.encrypt, self.trust_server_cert
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
target:
  host: sql-a
  database: erp
  user: reader
  password: secret
clone:
  host: sql-b
  database: erp_clone
  user: writer
  password: secret
sync:
  tables:
    - { table: Orders, pk: [id] }
    - { table: saArtPrecio, pk: [co_art, co_alma_calculado] }
  overrides:
    saArtPrecio:
      generated_columns: [co_alma_calculado]
      strategy: full_replace
      temporal_precision: second
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.target.port, 1433);
        assert_eq!(config.clone.schema, "dbo");
        assert!(!config.target.encrypt);
        assert!(config.target.trust_server_cert);
        assert_eq!(config.sync.default_pk, vec!["id"]);
        assert_eq!(config.sync.generated_columns, vec!["rowguid"]);
        assert!(config
            .sync
            .compare_exclude_columns
            .contains(&"fe_us_in".to_string()));
        assert_eq!(config.sync.numeric_precision, 38);
        assert_eq!(config.sync.numeric_scale, 8);
        assert_eq!(config.sync.retry.max_retries, 3);
        assert_eq!(config.sync.batch_size, 5000);
    }

    #[test]
    fn test_table_spec_falls_back_to_default_pk() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(
            config.table_spec("saArtPrecio").pk,
            vec!["co_art", "co_alma_calculado"]
        );
        let spec = config.table_spec("Customers");
        assert_eq!(spec.table, "Customers");
        assert_eq!(spec.pk, vec!["id"]);
    }

    #[test]
    fn test_override_lookup() {
        let config = Config::from_yaml(YAML).unwrap();
        let o = config.override_for("saartprecio");
        assert_eq!(o.strategy, SyncStrategy::FullReplace);
        assert_eq!(o.temporal_precision, Some(TemporalPrecision::Second));
        assert_eq!(o.generated_columns, vec!["co_alma_calculado"]);

        let none = config.override_for("Orders");
        assert_eq!(none, TableOverride::default());
        assert_eq!(none.strategy, SyncStrategy::StageMerge);
    }

    #[test]
    fn test_connection_string_masks_password() {
        let config = Config::from_yaml(YAML).unwrap();
        let cs = config.target.connection_string();
        assert!(cs.contains("Server=tcp:sql-a,1433"));
        assert!(cs.contains("Database=erp"));
        assert!(!cs.contains("secret"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Io(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync.tables.len(), 2);
    }
}
