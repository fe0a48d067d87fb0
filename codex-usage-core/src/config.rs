//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/codex-usage/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/codex-usage/` (~/.config/codex-usage/)
//! - Data: `$XDG_DATA_HOME/codex-usage/` (~/.local/share/codex-usage/)
//! - State/Logs: `$XDG_STATE_HOME/codex-usage/` (~/.local/state/codex-usage/)

use crate::error::{Error, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "codex-usage";

/// Zone used for local timestamps when none (or an invalid one) is configured.
pub const DEFAULT_TIMEZONE: &str = "Europe/Stockholm";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve an XDG base directory, ignoring unset or empty variables.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(fallback))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// IANA zone for local capture timestamps and reset strings
    #[serde(default)]
    pub timezone: Option<String>,

    /// Ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Override for the rollout root directory
    pub rollouts_path: Option<PathBuf>,

    /// Number of lines between store flushes
    #[serde(default = "default_batch_lines")]
    pub batch_lines: usize,

    /// Enable the content-hash fallback when mtime/size changed
    #[serde(default = "default_true")]
    pub content_hash: bool,

    /// Store message text and tool input/output text
    #[serde(default = "default_true")]
    pub capture_payloads: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rollouts_path: None,
            batch_lines: default_batch_lines(),
            content_hash: true,
            capture_payloads: true,
        }
    }
}

impl IngestConfig {
    /// Resolve the rollout root, honouring the override and `$CODEX_HOME`.
    pub fn rollouts_root(&self) -> PathBuf {
        if let Some(path) = &self.rollouts_path {
            return path.clone();
        }
        std::env::var_os("CODEX_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join(".codex"))
            .join("sessions")
    }
}

fn default_batch_lines() -> usize {
    500
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_lines == 0 {
            return Err(Error::Config(
                "ingest.batch_lines must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured zone, falling back to [`DEFAULT_TIMEZONE`].
    pub fn timezone(&self) -> Tz {
        resolve_timezone(self.timezone.as_deref())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/codex-usage/config.toml`
    pub fn config_path() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config").join(APP_DIR).join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    pub fn data_dir() -> PathBuf {
        xdg_dir("XDG_DATA_HOME", ".local/share").join(APP_DIR)
    }

    /// Returns the state directory path (for logs and sync progress)
    pub fn state_dir() -> PathBuf {
        xdg_dir("XDG_STATE_HOME", ".local/state").join(APP_DIR)
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/codex-usage/usage.sqlite`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("usage.sqlite")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("codex-usage.log")
    }

    /// Returns the sync progress file path
    pub fn progress_path() -> PathBuf {
        Self::state_dir().join("sync-progress.json")
    }
}

/// Parse an IANA zone name, falling back to [`DEFAULT_TIMEZONE`].
pub fn resolve_timezone(name: Option<&str>) -> Tz {
    let fallback = || DEFAULT_TIMEZONE.parse::<Tz>().unwrap_or(Tz::UTC);
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %name, "Unknown timezone, using default");
            fallback()
        }),
        None => fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.timezone.is_none());
        assert_eq!(config.ingest.batch_lines, 500);
        assert!(config.ingest.content_hash);
        assert!(config.ingest.capture_payloads);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
timezone = "UTC"

[ingest]
rollouts_path = "/data/rollouts"
batch_lines = 50
content_hash = false
capture_payloads = false

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.timezone(), Tz::UTC);
        assert_eq!(config.ingest.batch_lines, 50);
        assert!(!config.ingest.content_hash);
        assert!(!config.ingest.capture_payloads);
        assert_eq!(
            config.ingest.rollouts_root(),
            PathBuf::from("/data/rollouts")
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config: Config = toml::from_str("[ingest]\nbatch_lines = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_timezone_fallback() {
        assert_eq!(resolve_timezone(Some("Not/AZone")), chrono_tz::Europe::Stockholm);
        assert_eq!(resolve_timezone(None), chrono_tz::Europe::Stockholm);
        assert_eq!(resolve_timezone(Some(" UTC ")), Tz::UTC);
    }

    #[test]
    fn test_paths() {
        assert!(Config::database_path().ends_with("codex-usage/usage.sqlite"));
        assert!(Config::log_path().ends_with("codex-usage.log"));
    }
}
