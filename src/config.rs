//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::datapoints::{DOUBLE_TYPE, LEGACY_TYPE, LONG_TYPE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory for query and group partition spill files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Size of the admission permit pool
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// Entries buffered per row before a cache write
    #[serde(default = "default_write_buffer_entries")]
    pub write_buffer_entries: usize,

    /// Type tag produced when long values are built from scratch
    #[serde(default = "default_long_type")]
    pub default_long_type: String,

    /// Type tag produced when double values are built from scratch
    #[serde(default = "default_double_type")]
    pub default_double_type: String,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("strata")
}

fn default_max_concurrent_queries() -> usize {
    5
}

fn default_write_buffer_entries() -> usize {
    500
}

fn default_long_type() -> String {
    LONG_TYPE.to_string()
}

fn default_double_type() -> String {
    DOUBLE_TYPE.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_concurrent_queries: default_max_concurrent_queries(),
            write_buffer_entries: default_write_buffer_entries(),
            default_long_type: default_long_type(),
            default_double_type: default_double_type(),
        }
    }
}

impl EngineConfig {
    /// Create a config spilling into `temp_dir`, other fields defaulted
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            ..Default::default()
        }
    }

    /// Builder method: set the permit pool size
    pub fn with_max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = max;
        self
    }

    /// Builder method: set the write buffer size
    pub fn with_write_buffer_entries(mut self, entries: usize) -> Self {
        self.write_buffer_entries = entries;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_queries == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_queries must be greater than zero".into(),
            ));
        }
        if self.write_buffer_entries == 0 {
            return Err(ConfigError::Invalid(
                "engine.write_buffer_entries must be greater than zero".into(),
            ));
        }
        if self.temp_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("engine.temp_dir is empty".into()));
        }
        if ![LONG_TYPE, LEGACY_TYPE].contains(&self.default_long_type.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "engine.default_long_type must be {} or {}, got {}",
                LONG_TYPE, LEGACY_TYPE, self.default_long_type
            )));
        }
        if ![DOUBLE_TYPE, LEGACY_TYPE].contains(&self.default_double_type.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "engine.default_double_type must be {} or {}, got {}",
                DOUBLE_TYPE, LEGACY_TYPE, self.default_double_type
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("strata").join("config.toml")),
            Some(PathBuf::from("/etc/strata/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Engine overrides
        if let Ok(temp_dir) = std::env::var("STRATA_TEMP_DIR") {
            self.engine.temp_dir = PathBuf::from(temp_dir);
        }
        if let Ok(max) = std::env::var("STRATA_MAX_QUERIES") {
            if let Ok(m) = max.parse() {
                self.engine.max_concurrent_queries = m;
            }
        }
        if let Ok(entries) = std::env::var("STRATA_WRITE_BUFFER") {
            if let Ok(e) = entries.parse() {
                self.engine.write_buffer_entries = e;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("STRATA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Strata Configuration
#
# Environment variables override these settings:
# - STRATA_TEMP_DIR
# - STRATA_MAX_QUERIES
# - STRATA_WRITE_BUFFER
# - STRATA_LOG_LEVEL
# - STRATA_LOG_FORMAT

[engine]
# Directory for query spill files (defaults to <os temp dir>/strata)
# temp_dir = "/var/tmp/strata"

# Maximum number of store scans running at once
max_concurrent_queries = 5

# Entries buffered per row before writing to the spill file
write_buffer_entries = 500

# Type produced for values built from scratch: kairos_long or kairos_legacy
default_long_type = "kairos_long"

# Type produced for values built from scratch: kairos_double or kairos_legacy
default_double_type = "kairos_double"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.engine.max_concurrent_queries, 5);
        assert_eq!(config.engine.write_buffer_entries, 500);
        assert_eq!(config.engine.default_long_type, LONG_TYPE);
        assert_eq!(config.engine.temp_dir, default_temp_dir());
        assert_eq!(config.logging.format, "pretty");
        config.engine.validate().unwrap();
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[engine]\nmax_concurrent_queries = 2\n").unwrap();
        assert_eq!(config.engine.max_concurrent_queries, 2);
        assert_eq!(config.engine.write_buffer_entries, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::default()
            .with_max_concurrent_queries(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_write_buffer_entries(0)
            .validate()
            .is_err());

        let mut config = EngineConfig::default();
        config.default_long_type = "kairos_string".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.default_double_type = LEGACY_TYPE.into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
