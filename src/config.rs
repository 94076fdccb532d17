//! Configuration management for smd.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use crate::fetcher::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "smd";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Upper bound for `fetch.retries`; anything higher stalls a session for minutes.
const MAX_RETRIES: u32 = 20;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred site language (ISO 639-1 code). Empty means any.
    pub language: Option<String>,

    /// Network behavior.
    pub fetch: FetchConfig,

    /// File paths.
    pub paths: PathsConfig,

    /// Log file settings.
    pub logging: LoggingConfig,
}

/// Network retry and politeness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries after the first failed attempt of a request.
    pub retries: u32,

    /// Per-attempt timeout in seconds.
    pub timeout_sec: u64,

    /// Backoff before the first retry, doubled for each further retry.
    pub base_delay_ms: u64,

    /// Cap for the backoff delay.
    pub max_delay_ms: u64,

    /// Delay between web requests in seconds.
    pub delay_between_requests_sec: f64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout_sec: 30,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            delay_between_requests_sec: 0.0,
        }
    }
}

impl FetchConfig {
    /// Builds the retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

/// File path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory where manga folders are created.
    pub manga_directory: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manga_directory: PathBuf::from("."),
        }
    }
}

/// Log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a debug-level log file in addition to console output.
    pub file_logging: bool,

    /// Directory for log files. Defaults to the config directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_logging: true,
            directory: None,
        }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.retries > MAX_RETRIES {
            return Err(ConfigError::InvalidValue {
                key: "fetch.retries".to_string(),
                message: format!("must be at most {MAX_RETRIES}"),
            });
        }

        if self.fetch.timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch.timeout_sec".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        let delay = self.fetch.delay_between_requests_sec;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch.delay_between_requests_sec".to_string(),
                message: "must be a finite number of seconds, not negative".to_string(),
            });
        }

        if self.paths.manga_directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "paths.manga_directory".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the language filter, if one is set.
    pub fn language(&self) -> Option<&str> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }

    /// Returns the effective log directory, using config or default.
    pub fn log_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref dir) = self.logging.directory {
            Ok(dir.clone())
        } else {
            Self::config_dir()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.retries, 5);
        assert_eq!(config.paths.manga_directory, PathBuf::from("."));
        assert!(config.language().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join(CONFIG_FILENAME);

        let mut config = Config::default();
        config.language = Some("es".to_string());
        config.fetch.retries = 2;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.language(), Some("es"));
        assert_eq!(loaded.fetch.retries, 2);
    }

    #[test]
    fn test_missing_file_creates_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.fetch.timeout_sec, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[fetch]\nretries = 1\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.fetch.retries, 1);
        assert_eq!(config.fetch.timeout_sec, 30);
        assert!(config.logging.file_logging);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.fetch.retries = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.timeout_sec = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.delay_between_requests_sec = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fetch.delay_between_requests_sec = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_infinite_delay_in_file_is_rejected() {
        let config: Config = toml::from_str("[fetch]\ndelay_between_requests_sec = inf\n").unwrap();
        assert!(config.fetch.delay_between_requests_sec.is_infinite());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "fetch.delay_between_requests_sec"
        ));
    }

    #[test]
    fn test_blank_language_is_none() {
        let mut config = Config::default();
        config.language = Some("  ".to_string());
        assert!(config.language().is_none());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = FetchConfig::default();
        assert_eq!(config.retry_policy().retries(), 5);
    }
}
