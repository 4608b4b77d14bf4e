//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! and defines the configuration of the GPX agent.
//!
//! # Usage
//!
//! ```rust,no_run
//! use gpx_common::config::{AgentConfig, ConfigError, ConfigLoader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = AgentConfig::load(Path::new("gpx_agent.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    AGENT_ADDRESS, DEFAULT_ASSETS_STREAM, DEFAULT_ENDPOINT, DEFAULT_INVENTORY_ADDRESS,
    DEFAULT_METRICS_STREAM, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STATE_FILE, DEFAULT_TEMPLATE_DIR,
    POWER_SETTLE_DELAY, REQUEST_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "gpx-agent"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier, also the agent's mailbox name.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message-bus wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Transport endpoint to connect to.
    pub endpoint: String,
    /// Stream status metrics and alerts are published on.
    pub metrics_stream: String,
    /// Stream asset events are consumed from.
    pub assets_stream: String,
    /// Subject pattern (regular expression) applied to the asset stream.
    pub assets_pattern: String,
    /// Mailbox of the inventory service answering capability requests.
    pub inventory_address: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            metrics_stream: DEFAULT_METRICS_STREAM.to_string(),
            assets_stream: DEFAULT_ASSETS_STREAM.to_string(),
            assets_pattern: ".*".to_string(),
            inventory_address: DEFAULT_INVENTORY_ADDRESS.to_string(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `<part_number>.tpl` descriptors.
    pub template_dir: PathBuf,
    /// GPO state file, loaded at start and saved at shutdown.
    pub state_file: PathBuf,
    /// Interval between two status sweeps.
    pub poll_interval_ms: u64,
    /// Bound on outbound requests.
    pub request_timeout_ms: u64,
    /// Settle time after energizing a power-source output.
    pub power_settle_ms: u64,
    /// Redirect device I/O to `test_root`.
    pub test_mode: bool,
    /// Sandbox root used in test mode.
    pub test_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
            power_settle_ms: POWER_SETTLE_DELAY.as_millis() as u64,
            test_mode: false,
            test_root: PathBuf::from("./sys/class/gpio"),
        }
    }
}

impl EngineConfig {
    /// Interval between two status sweeps.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on outbound requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Settle time after energizing a power source.
    pub fn power_settle(&self) -> Duration {
        Duration::from_millis(self.power_settle_ms)
    }
}

/// Static addressing applied after negotiation, for sites without an
/// inventory service. Every field left out keeps the negotiated value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareOverrides {
    /// Base address.
    pub base_address: Option<i32>,
    /// Offset of the input channels.
    pub input_offset: Option<i32>,
    /// Offset of the output channels.
    pub output_offset: Option<i32>,
    /// Number of input channels.
    pub input_count: Option<u32>,
    /// Number of output channels.
    pub output_count: Option<u32>,
}

impl HardwareOverrides {
    /// Whether no override is set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Complete agent configuration (`gpx_agent.toml`).
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "gpx-agent"
///
/// [bus]
/// endpoint = "inproc://gpx-bus"
/// inventory_address = "inventory"
///
/// [agent]
/// template_dir = "/usr/share/gpx/templates"
/// poll_interval_ms = 2000
///
/// [hardware]
/// base_address = 488
/// input_offset = -1
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Bus wiring.
    #[serde(default)]
    pub bus: BusConfig,
    /// Engine settings.
    #[serde(default)]
    pub agent: EngineConfig,
    /// Static addressing overrides.
    #[serde(default)]
    pub hardware: HardwareOverrides,
}

impl AgentConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    /// - `poll_interval_ms` or `request_timeout_ms` is zero
    /// - any stream name is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.agent.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.agent.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.bus.metrics_stream.is_empty() || self.bus.assets_stream.is_empty() {
            return Err(ConfigError::ValidationError(
                "stream names cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

fn default_service_name() -> String {
    AGENT_ADDRESS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        let parsed: TestWrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Warn);
        assert!(toml::from_str::<TestWrapper>("level = \"WARN\"").is_err());
    }

    #[test]
    fn test_log_level_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.service_name, AGENT_ADDRESS);
        assert_eq!(config.agent.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.agent.request_timeout(), REQUEST_TIMEOUT);
        assert_eq!(config.bus.assets_pattern, ".*");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[bus]
inventory_address = "asset-agent"

[agent]
poll_interval_ms = 500
test_mode = true
"#
        )
        .unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.bus.inventory_address, "asset-agent");
        assert_eq!(config.bus.metrics_stream, DEFAULT_METRICS_STREAM);
        assert_eq!(config.agent.poll_interval(), Duration::from_millis(500));
        assert!(config.agent.test_mode);
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = AgentConfig::default();
        config.agent.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = AgentConfig::load(Path::new("/nonexistent/gpx_agent.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }
}
