//! Configuration loading from multiple sources

use crate::{AppConfig, ConfigError, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

/// Default prefix for environment overrides
pub const ENV_PREFIX: &str = "AUTOGIFT";

/// Configuration loader with support for multiple formats and sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// Supports TOML, YAML, and JSON formats based on file extension
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading config file");

        match extension {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<AppConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from JSON string
    pub fn from_json(content: &str) -> Result<AppConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from environment variables
    ///
    /// Uses default prefix "AUTOGIFT"
    pub fn from_env() -> Result<AppConfig> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Load configuration from environment variables with custom prefix
    ///
    /// Environment variables should be in the format: PREFIX_SECTION__KEY
    /// For example: AUTOGIFT_RETRY__MAX_RETRIES=5
    pub fn from_env_with_prefix(prefix: &str) -> Result<AppConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Values are merged key by key, so an override only replaces the
    /// fields it names.
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<AppConfig> {
        if !path.exists() {
            return Err(ConfigError::LoadError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        Self::builder()
            .add_file(path, true)
            .add_env(env_prefix)
            .build()
    }

    /// Build configuration using the config crate's builder pattern
    ///
    /// This allows for more complex configuration scenarios with multiple sources
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            builder: Config::builder(),
        }
    }
}

/// Builder for complex configuration loading scenarios
pub struct ConfigLoaderBuilder {
    builder: ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoaderBuilder {
    /// Add a configuration file source
    pub fn add_file(mut self, path: &Path, required: bool) -> Self {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml, // Default to TOML
        };

        self.builder = self
            .builder
            .add_source(File::from(path).format(format).required(required));
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env(mut self, prefix: &str) -> Self {
        self.builder = self.builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        self
    }

    /// Set a default value for a key
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_default(key, value)?;
        Ok(self)
    }

    /// Build the final configuration
    pub fn build(self) -> Result<AppConfig> {
        let config = self.builder.build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment as ServiceEnvironment;
    use std::io::Write;

    #[test]
    fn test_load_from_toml() {
        let toml = r#"
            [service]
            environment = "staging"
            log_level = "debug"
            log_json = true

            [store]
            database_url = "sqlite:/var/lib/autogift/autogift.db"
            max_connections = 8

            [retry]
            max_retries = 5
            base_delay_secs = 30

            [recovery]
            stale_processing_secs = 7200
        "#;

        let config = ConfigLoader::from_toml(toml).unwrap();
        assert_eq!(config.service.environment, ServiceEnvironment::Staging);
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.store.max_connections, 8);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_secs, 30);
        // Unset keys fall back to defaults
        assert_eq!(config.retry.max_delay_secs, 3_600);
        assert_eq!(config.recovery.stale_processing_secs, 7_200);
        assert_eq!(config.recovery.payment_verification_secs, 600);
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
service:
  environment: production
  log_level: warn
approval:
  auto_approve_confidence: 0.95
scheduler:
  lookahead_days: 2
        "#;

        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(config.service.environment, ServiceEnvironment::Production);
        assert_eq!(config.approval.auto_approve_confidence, 0.95);
        assert_eq!(config.scheduler.lookahead_days, 2);
        assert_eq!(config.scheduler.interval_secs, 86_400);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"
{
  "service": { "environment": "local", "log_level": "trace" },
  "orchestrator": { "default_gift_message": "Happy day!" },
  "recovery": { "inter_item_delay_ms": 0, "batch_limit": 10 }
}
        "#;

        let config = ConfigLoader::from_json(json).unwrap();
        assert_eq!(config.service.log_level, "trace");
        assert_eq!(config.orchestrator.default_gift_message, "Happy day!");
        assert_eq!(config.recovery.batch_limit, 10);
    }

    #[test]
    fn test_load_from_file() {
        let toml = r#"
[service]
environment = "staging"
log_level = "debug"
        "#;

        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.service.log_level, "debug");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .unwrap();

        let result = ConfigLoader::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_builder_defaults() {
        let config = ConfigLoader::builder()
            .set_default("retry.max_retries", "7")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.base_delay_secs, 60);
    }
}
