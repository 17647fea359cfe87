//! Configuration for the `CareLink` client.
//!
//! Layered configuration with the following priority (highest first):
//! 1. TOML config file (`~/.config/carelink/config.toml`)
//! 2. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// Top-level TOML config file structure.
///
/// All fields are `Option` so a file may override any subset.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    calls: CallsFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[calls]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CallsFileConfig {
    dedup_window_secs: Option<u64>,
}

/// Fully resolved session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on one connect attempt; `connect` returns within this.
    pub connect_timeout: Duration,
    /// How long to wait for a request's acknowledgement.
    pub request_timeout: Duration,
    /// Reconnect attempts after a connection drop before giving up.
    pub reconnect_attempts: u32,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Settle delay after the on-demand reconnect inside a request.
    pub retry_delay: Duration,
    /// Suppression window for duplicate incoming-call alerts.
    pub dedup_window: Duration,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            dedup_window: Duration::from_secs(15),
            event_buffer: 64,
        }
    }
}

impl SessionConfig {
    /// Load configuration from the default or an explicit TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit file cannot be read, or if
    /// either file exists but cannot be parsed.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(explicit_path)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve a `SessionConfig` from a parsed config file.
    ///
    /// Priority: file > default. Separated from `load()` to enable unit
    /// testing without touching the filesystem.
    #[must_use]
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            connect_timeout: file
                .session
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .session
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            reconnect_attempts: file
                .session
                .reconnect_attempts
                .unwrap_or(defaults.reconnect_attempts),
            reconnect_delay: file
                .session
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            retry_delay: file
                .session
                .retry_delay_ms
                .map_or(defaults.retry_delay, Duration::from_millis),
            dedup_window: file
                .calls
                .dedup_window_secs
                .map_or(defaults.dedup_window, Duration::from_secs),
            event_buffer: file.session.event_buffer.unwrap_or(defaults.event_buffer),
        }
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("carelink").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
