//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::core::identifier::validate_identifier;
use crate::error::{Result, SyncError};

fn validate_database(name: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(SyncError::Config(format!("{}.host is required", name)));
    }
    if db.database.is_empty() {
        return Err(SyncError::Config(format!("{}.database is required", name)));
    }
    if db.user.is_empty() {
        return Err(SyncError::Config(format!("{}.user is required", name)));
    }
    validate_identifier(&db.schema)
        .map_err(|e| SyncError::Config(format!("{}.schema: {}", name, e)))?;
    if db.max_connections == 0 {
        return Err(SyncError::Config(format!(
            "{}.max_connections must be at least 1",
            name
        )));
    }
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("target", &config.target)?;
    validate_database("clone", &config.clone)?;

    // Writing into the target would defeat the point
    if config.target.host.eq_ignore_ascii_case(&config.clone.host)
        && config.target.port == config.clone.port
        && config.target.database.eq_ignore_ascii_case(&config.clone.database)
    {
        return Err(SyncError::Config(
            "target and clone cannot be the same database".into(),
        ));
    }

    let sync = &config.sync;
    if sync.default_pk.is_empty() {
        return Err(SyncError::Config("sync.default_pk cannot be empty".into()));
    }
    for spec in &sync.tables {
        validate_identifier(&spec.table)
            .map_err(|e| SyncError::Config(format!("sync.tables: {}", e)))?;
        if spec.pk.is_empty() {
            return Err(SyncError::Config(format!(
                "sync.tables: table {} has an empty pk",
                spec.table
            )));
        }
    }
    for table in sync.overrides.keys() {
        validate_identifier(table)
            .map_err(|e| SyncError::Config(format!("sync.overrides: {}", e)))?;
    }

    if sync.batch_size == 0 {
        return Err(SyncError::Config(
            "sync.batch_size must be at least 1".into(),
        ));
    }
    if sync.numeric_precision == 0 || sync.numeric_precision > 38 {
        return Err(SyncError::Config(
            "sync.numeric_precision must be between 1 and 38".into(),
        ));
    }
    if sync.numeric_scale > sync.numeric_precision {
        return Err(SyncError::Config(
            "sync.numeric_scale cannot exceed sync.numeric_precision".into(),
        ));
    }
    if sync.default_text_length <= 0 || sync.default_text_length > 4000 {
        return Err(SyncError::Config(
            "sync.default_text_length must be between 1 and 4000".into(),
        ));
    }

    let retry = &sync.retry;
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(SyncError::Config(
            "sync.retry.initial_delay_ms cannot exceed max_delay_ms".into(),
        ));
    }
    if retry.operation_timeout_secs == 0 {
        return Err(SyncError::Config(
            "sync.retry.operation_timeout_secs must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SyncConfig, TableSpec};

    fn database(host: &str, database: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            port: 1433,
            database: database.to_string(),
            user: "sa".to_string(),
            password: "password".to_string(),
            schema: "dbo".to_string(),
            encrypt: false,
            trust_server_cert: true,
            max_connections: 4,
        }
    }

    fn valid_config() -> Config {
        Config {
            target: database("sql-a", "erp"),
            clone: database("sql-b", "erp"),
            sync: SyncConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_target_host() {
        let mut config = valid_config();
        config.target.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_clone_user() {
        let mut config = valid_config();
        config.clone.user = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.clone.host = "SQL-A".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("same database"));
    }

    #[test]
    fn test_same_database_on_other_port_allowed() {
        let mut config = valid_config();
        config.clone.host = "sql-a".to_string();
        config.clone.port = 1434;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_empty_table_pk_rejected() {
        let mut config = valid_config();
        config.sync.tables.push(TableSpec::new("Orders", vec![]));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_table_name_rejected() {
        let mut config = valid_config();
        config
            .sync
            .tables
            .push(TableSpec::new("Orders; DROP TABLE x", vec!["id".into()]));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        let mut config = valid_config();
        config.sync.numeric_precision = 39;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.sync.numeric_precision = 10;
        config.sync.numeric_scale = 12;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.sync.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_retry_delays_ordered() {
        let mut config = valid_config();
        config.sync.retry.initial_delay_ms = 10_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_config_debug_redacts_both_passwords() {
        let mut config = valid_config();
        config.target.password = "target_pw_xyz".to_string();
        config.clone.password = "clone_pw_xyz".to_string();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("target_pw_xyz"));
        assert!(!debug_output.contains("clone_pw_xyz"));
    }
}
