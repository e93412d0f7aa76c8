use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::settings::ConnectionSettings;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/gateway-config.json");

/// Loads the gateway configuration. A relative `settingsFile` is resolved
/// against the directory of the configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GatewayConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = load_config_from_str(&content)?;

    let settings = Path::new(&config.settings_file);
    if settings.is_relative() && !config.settings_file.starts_with('~') {
        if let Some(dir) = path.parent() {
            config.settings_file = dir.join(settings).to_string_lossy().into_owned();
        }
    }
    Ok(config)
}

pub fn load_config_from_str(content: &str) -> Result<GatewayConfig, ConfigError> {
    let value = parse_yaml(content)?;

    validate_schema(&value)?;

    let config: GatewayConfig = serde_json::from_value(value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Parses and validates a connection settings document.
pub fn load_settings_from_str(content: &str) -> Result<ConnectionSettings, ConfigError> {
    let value = parse_yaml(content)?;
    let settings: ConnectionSettings = serde_json::from_value(value)?;
    settings.validate()?;
    Ok(settings)
}

/// YAML to JSON, so both documents go through the same serde path. An
/// empty document is an empty mapping.
fn parse_yaml(content: &str) -> Result<serde_json::Value, ConfigError> {
    let value: serde_json::Value = serde_yaml::from_str(content)?;
    Ok(match value {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    })
}

fn validate_schema(value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    if config.scheduler.workers == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.workers must be at least 1".to_string(),
        });
    }
    if config.poller.interval_secs == 0 || config.scheduler.interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "intervalSecs must be at least 1".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str("settingsFile: /etc/edigate/settings.yaml\n").unwrap();
        assert_eq!(config.poller.interval_secs, 60);
        assert_eq!(config.scheduler.interval_secs, 15);
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.batch_size, 20);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, GatewayConfig {
            settings_file: "~/.edigate/settings.yaml".to_string(),
            ..Default::default()
        });
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
database:
  path: /var/lib/edigate/edigate.db
poller:
  intervalSecs: 30
scheduler:
  intervalSecs: 5
  workers: 8
  batchSize: 50
settingsFile: /etc/edigate/settings.yaml
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(
            config.database.resolved_path(),
            PathBuf::from("/var/lib/edigate/edigate.db")
        );
        assert_eq!(config.poller.interval_secs, 30);
        assert_eq!(config.scheduler.workers, 8);
        assert_eq!(config.scheduler.batch_size, 50);
    }

    #[test]
    fn test_schema_rejects_zero_workers() {
        let result = load_config_from_str("scheduler:\n  workers: 0\n");
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_unknown_keys() {
        let result = load_config_from_str("poller:\n  interval: 30\n");
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_schema_rejects_wrong_types() {
        let result = load_config_from_str("poller:\n  intervalSecs: soon\n");
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_invalid_yaml() {
        let result = load_config_from_str("poller: [unclosed");
        assert!(matches!(result, Err(ConfigError::ParseYaml(_))));
    }

    #[test]
    fn test_relative_settings_file_resolved_against_config_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edigate.yaml");
        std::fs::write(&path, "settingsFile: settings.yaml\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.settings_path(), dir.path().join("settings.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/edigate.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
