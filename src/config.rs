//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;

use crate::error::{DashError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub estimates: EstimateConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scanning and connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BleConfig {
    /// Advertised names starting with one of these are accepted
    #[serde(default = "default_name_prefixes")]
    pub name_prefixes: Vec<String>,

    /// Advertised names containing one of these are accepted
    #[serde(default = "default_name_fragments")]
    pub name_fragments: Vec<String>,

    #[serde(default = "default_scan_duration_s")]
    pub scan_duration_s: u64,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,

    #[serde(default = "default_rssi_interval_ms")]
    pub rssi_interval_ms: u64,
}

/// Poll schedule configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Time between two poll slots
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Cadence at which the binary calls `update()`
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// Wire protocol configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProtocolConfig {
    /// Drop inbound frames whose checksum does not match
    #[serde(default)]
    pub verify_checksum: bool,
}

/// Fallback estimate configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EstimateConfig {
    #[serde(default = "default_range_km_per_percent")]
    pub range_km_per_percent: f32,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Diagnostic log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stdout only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_name_prefixes() -> Vec<String> {
    vec!["MIScooter".to_string(), "Mi Electric".to_string()]
}
fn default_name_fragments() -> Vec<String> {
    vec!["M365".to_string(), "Scooter".to_string()]
}
fn default_scan_duration_s() -> u64 { 30 }
fn default_connect_timeout_s() -> u64 { 10 }
fn default_rescan_interval_ms() -> u64 { 5000 }
fn default_rssi_interval_ms() -> u64 { 5000 }

fn default_poll_interval_ms() -> u64 { 100 }
fn default_tick_ms() -> u64 { 20 }

fn default_range_km_per_percent() -> f32 { 0.45 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_interval_ms() -> u64 { 1000 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            name_prefixes: default_name_prefixes(),
            name_fragments: default_name_fragments(),
            scan_duration_s: default_scan_duration_s(),
            connect_timeout_s: default_connect_timeout_s(),
            rescan_interval_ms: default_rescan_interval_ms(),
            rssi_interval_ms: default_rssi_interval_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            range_km_per_percent: default_range_km_per_percent(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            log_interval_ms: default_log_interval_ms(),
            format: default_log_format(),
        }
    }
}

impl BleConfig {
    /// Whether an advertised name belongs to a scooter we should connect to
    pub fn matches_name(&self, name: &str) -> bool {
        self.name_prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self.name_fragments.iter().any(|f| name.contains(f.as_str()))
    }
}

fn invalid(msg: impl std::fmt::Display) -> DashError {
    DashError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use m365_dash::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate name filter
        if self.ble.name_prefixes.is_empty() && self.ble.name_fragments.is_empty() {
            return Err(invalid("at least one of name_prefixes or name_fragments is required"));
        }

        if self
            .ble
            .name_prefixes
            .iter()
            .chain(&self.ble.name_fragments)
            .any(|s| s.is_empty())
        {
            return Err(invalid("device name filters cannot be empty strings"));
        }

        // Validate timing fields
        if self.ble.scan_duration_s == 0 || self.ble.scan_duration_s > 300 {
            return Err(invalid("scan_duration_s must be between 1 and 300"));
        }

        if self.ble.connect_timeout_s == 0 || self.ble.connect_timeout_s > 60 {
            return Err(invalid("connect_timeout_s must be between 1 and 60"));
        }

        for (name, value) in [
            ("rescan_interval_ms", self.ble.rescan_interval_ms),
            ("rssi_interval_ms", self.ble.rssi_interval_ms),
            ("poll interval_ms", self.poll.interval_ms),
            ("tick_ms", self.poll.tick_ms),
            ("log_interval_ms", self.telemetry.log_interval_ms),
        ] {
            if value == 0 || value > 60000 {
                return Err(invalid(format!("{} must be between 1 and 60000", name)));
            }
        }

        if self.poll.tick_ms > self.poll.interval_ms {
            return Err(invalid("tick_ms must not exceed the poll interval_ms"));
        }

        // Validate estimates
        if !(self.estimates.range_km_per_percent > 0.0 && self.estimates.range_km_per_percent.is_finite()) {
            return Err(invalid("range_km_per_percent must be a positive number"));
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        if let Some(dir) = &self.logging.file_dir {
            if dir.is_empty() {
                return Err(invalid("logging file_dir cannot be empty when set"));
            }
        }

        Ok(())
    }
}
