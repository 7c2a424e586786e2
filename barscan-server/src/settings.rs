//! Service settings: defaults, optional YAML file, then `BARSCAN_` environment overrides

use barscan_eye::config::VisionConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file read when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yml";
/// Environment variable prefix
pub const ENV_PREFIX: &str = "BARSCAN";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    Validation(String),
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub service_version: String,
    pub component_name: String,
    /// Skip metrics for requests that match no route
    pub filter_unhandled_paths: bool,
    pub max_upload_bytes: usize,
    pub ram_check_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            service_version: "0.0.1".to_string(),
            component_name: "InferenceService".to_string(),
            filter_unhandled_paths: true,
            max_upload_bytes: 20 * 1024 * 1024,
            ram_check_interval_secs: 120,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Also send every record to an RFC 5424 syslog server over UDP
    pub syslog: bool,
    pub syslog_host: String,
    pub syslog_port: u16,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            syslog: true,
            syslog_host: "127.0.0.1".to_string(),
            syslog_port: 9000,
        }
    }
}

/// Complete service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub models: VisionConfig,
}

impl AppSettings {
    /// Load settings from `path` (or the default config file) and the process environment.
    ///
    /// An explicitly given file must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        Self::build(path, None)
    }

    /// Same as [`AppSettings::load`] but reads overrides from `env` instead of the process environment
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self, SettingsError> {
        Self::build(path, Some(env))
    }

    fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, SettingsError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let settings: AppSettings = Config::builder()
            .add_source(Config::try_from(&AppSettings::default())?)
            .add_source(File::from(file).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.port == 0 {
            return Err(SettingsError::Validation("server.port must be non-zero".to_string()));
        }
        if self.server.host.is_empty() {
            return Err(SettingsError::Validation("server.host must not be empty".to_string()));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(SettingsError::Validation(
                "server.max_upload_bytes must be non-zero".to_string(),
            ));
        }
        if self.server.ram_check_interval_secs == 0 {
            return Err(SettingsError::Validation(
                "server.ram_check_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.log.syslog && (self.log.syslog_host.is_empty() || self.log.syslog_port == 0) {
            return Err(SettingsError::Validation(
                "log.syslog_host and log.syslog_port must be set when log.syslog is enabled".to_string(),
            ));
        }
        self.models
            .validate()
            .map_err(|e| SettingsError::Validation(format!("models.{}", e)))
    }

    /// `host:port` string for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
