//! # Configuration Management Module
//!
//! Centralized, type-safe configuration for the bridge, loaded from TOML with
//! defaults for every section.
//!
//! ## Configuration Structure
//!
//! - [`SerialConfig`] - Gateway radio link (port, baud, poll sentinel)
//! - [`CloudConfig`] - ThingsBoard host, credentials and request timeout
//! - [`StorageConfig`] - Snapshot file locations
//! - [`ScheduleConfig`] - Calendar horizon, timestamp format, display names
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lorabridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.serial.port);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! poll_sentinel = "GET_MSG"
//!
//! [cloud]
//! host = "http://demo.thingsboard.io"
//! username = "tenant@example.com"
//! password = "secret"
//! attribute_device_id = "8aa29b50-658a-11f0-83dd-65e1b21422bc"
//!
//! [schedule]
//! horizon_seconds = 7200
//! time_format = "%Y-%m-%d %H:%M"
//! timezone = "local"
//! ```
//!
//! Precedence: CLI args > Config file > Defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    pub cloud: CloudConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout of the serial port (ms). Reads that time out are retried silently.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Exact (case-sensitive) line that asks the bridge to poll shared attributes.
    #[serde(default = "default_poll_sentinel")]
    pub poll_sentinel: String,
    /// Longest inbound line kept; longer garbage is discarded up to the next newline.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_poll_sentinel() -> String {
    "GET_MSG".to_string()
}

fn default_max_line_len() -> usize {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Device whose SHARED_SCOPE keys are deleted after delivery or expiry.
    pub attribute_device_id: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Create a dashboard for each newly provisioned device (best-effort).
    #[serde(default = "default_true")]
    pub provision_dashboard: bool,
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub device_map_file: String,
    pub schedule_file: String,
    pub counter_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            device_map_file: "device_mac_token_map.json".to_string(),
            schedule_file: "scheduled_events.json".to_string(),
            counter_file: "device_counter.txt".to_string(),
        }
    }
}

impl StorageConfig {
    fn resolve(&self, file: &str) -> PathBuf {
        let p = PathBuf::from(file);
        if p.is_absolute() {
            p
        } else {
            PathBuf::from(&self.data_dir).join(p)
        }
    }

    pub fn device_map_path(&self) -> PathBuf {
        self.resolve(&self.device_map_file)
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.resolve(&self.schedule_file)
    }

    pub fn counter_path(&self) -> PathBuf {
        self.resolve(&self.counter_file)
    }
}

/// Timezone used to interpret calendar timestamps, which carry no offset of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalendarZone {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Events starting within this many seconds from now are cached locally.
    pub horizon_seconds: i64,
    /// chrono format of the `Start:`/`End:` timestamps
    pub time_format: String,
    #[serde(default)]
    pub timezone: CalendarZone,
    /// Display names are `<prefix>_<n>`
    pub display_prefix: String,
    /// Attribute keys that are never classified (compared case-insensitively)
    pub reserved_keys: Vec<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            horizon_seconds: 2 * 3600,
            time_format: "%Y-%m-%d %H:%M".to_string(),
            timezone: CalendarZone::Local,
            display_prefix: "lora".to_string(),
            reserved_keys: ["battery", "id", "mac_address", "data"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("lorabridge.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.serial.poll_sentinel.trim().is_empty() {
            return Err(anyhow!("serial.poll_sentinel must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial.baud_rate must be positive"));
        }
        if self.serial.max_line_len == 0 {
            return Err(anyhow!("serial.max_line_len must be positive"));
        }
        if self.schedule.horizon_seconds <= 0 {
            return Err(anyhow!(
                "schedule.horizon_seconds must be positive (got {})",
                self.schedule.horizon_seconds
            ));
        }
        if self.schedule.display_prefix.is_empty() {
            return Err(anyhow!("schedule.display_prefix must not be empty"));
        }
        if self.cloud.attribute_device_id.trim().is_empty() {
            return Err(anyhow!(
                "cloud.attribute_device_id must be set to the device holding the shared attributes"
            ));
        }
        if !(self.cloud.host.starts_with("http://") || self.cloud.host.starts_with("https://")) {
            return Err(anyhow!(
                "cloud.host must be an http(s) URL (got '{}')",
                self.cloud.host
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serial: SerialConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
                read_timeout_ms: default_read_timeout_ms(),
                poll_sentinel: default_poll_sentinel(),
                max_line_len: default_max_line_len(),
            },
            cloud: CloudConfig {
                host: "http://demo.thingsboard.io".to_string(),
                username: "tenant@thingsboard.org".to_string(),
                password: "tenant".to_string(),
                attribute_device_id: String::new(),
                timeout_seconds: default_timeout_seconds(),
                provision_dashboard: true,
            },
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
