//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::drive::manual::percent_to_speed;
use crate::error::{HoverlogError, Result};
use crate::telemetry::stop::{StopCondition, StopPolicy};

/// Baud rates accepted for the hoverboard link
pub const VALID_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 115200, 230400];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub drive: DriveConfig,

    #[serde(default)]
    pub battery: BatteryConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Feedback read timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Motion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default = "default_transmit_period_ms")]
    pub transmit_period_ms: u64,

    #[serde(default = "default_ramp_step")]
    pub ramp_step: i16,

    /// Speed command corresponding to 100 %
    #[serde(default = "default_full_speed")]
    pub full_speed: i16,

    /// Run speed as a percentage of `full_speed`
    #[serde(default = "default_speed_percent")]
    pub speed_percent: u8,

    #[serde(default)]
    pub steer: i16,
}

/// Battery (BMS) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BatteryConfig {
    /// Advertised name of the BMS
    #[serde(default)]
    pub device_name: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Program that talks to the BMS and prints JSON samples
    #[serde(default = "default_helper_command")]
    pub helper_command: String,

    /// Arguments passed before the device name
    #[serde(default)]
    pub helper_args: Vec<String>,
}

/// What ends a run besides Ctrl+C
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    #[default]
    Discharge,
    Charge,
    None,
}

/// Recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_cadence_hz")]
    pub cadence_hz: u32,

    #[serde(default)]
    pub stop: StopKind,

    /// Charge level (%) for the stop condition
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Wall-clock limit for the run
    #[serde(default)]
    pub max_duration_s: Option<u64>,

    /// Hold the run until the first battery sample arrives
    #[serde(default = "default_wait_for_battery")]
    pub wait_for_battery: bool,

    #[serde(default)]
    pub description: String,

    /// Extra key/value pairs stored with the run
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Also write logs to a file in the dataset directory
    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 100 }

fn default_transmit_period_ms() -> u64 { 100 }
fn default_ramp_step() -> i16 { 20 }
fn default_full_speed() -> i16 { 580 }
fn default_speed_percent() -> u8 { 20 }

fn default_poll_interval_ms() -> u64 { 500 }
fn default_helper_command() -> String { "bms-helper".to_string() }

fn default_dataset_dir() -> String { "./data".to_string() }
fn default_cadence_hz() -> u32 { 1 }
fn default_threshold() -> f64 { 30.0 }
fn default_wait_for_battery() -> bool { true }

fn default_log_file_name() -> String { "hoverlog.log".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            transmit_period_ms: default_transmit_period_ms(),
            ramp_step: default_ramp_step(),
            full_speed: default_full_speed(),
            speed_percent: default_speed_percent(),
            steer: 0,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            helper_command: default_helper_command(),
            helper_args: Vec::new(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset_dir: default_dataset_dir(),
            name: String::new(),
            cadence_hz: default_cadence_hz(),
            stop: StopKind::default(),
            threshold: default_threshold(),
            max_duration_s: None,
            wait_for_battery: default_wait_for_battery(),
            description: String::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: false,
            file_name: default_log_file_name(),
        }
    }
}

impl DriveConfig {
    /// Speed command for the configured run speed
    pub fn run_speed(&self) -> i16 {
        percent_to_speed(self.speed_percent, self.full_speed)
    }
}

impl RunConfig {
    /// Charge-level predicate for this run
    pub fn stop_condition(&self) -> StopCondition {
        match self.stop {
            StopKind::Discharge => StopCondition::Discharge { floor: self.threshold },
            StopKind::Charge => StopCondition::Charge { ceiling: self.threshold },
            StopKind::None => StopCondition::None,
        }
    }

    /// All stop predicates for this run
    pub fn stop_policy(&self) -> StopPolicy {
        let policy = StopPolicy::new(self.stop_condition());
        match self.max_duration_s {
            Some(seconds) => policy.with_max_duration(Duration::from_secs(seconds)),
            None => policy,
        }
    }
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
    /// use hoverlog::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    ///
    /// Lets command-line overrides be applied before [`Config::validate`].
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial link
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400",
            ));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        // Drive
        if self.drive.transmit_period_ms == 0 || self.drive.transmit_period_ms > 10000 {
            return Err(invalid("transmit_period_ms must be between 1 and 10000"));
        }

        if self.drive.ramp_step <= 0 {
            return Err(invalid("ramp_step must be greater than 0"));
        }

        if self.drive.full_speed <= 0 || self.drive.full_speed > 1000 {
            return Err(invalid("full_speed must be between 1 and 1000"));
        }

        if self.drive.speed_percent > 100 {
            return Err(invalid("speed_percent must be between 0 and 100"));
        }

        // Battery
        if self.battery.device_name.is_empty() {
            return Err(invalid("battery device_name cannot be empty"));
        }

        if self.battery.helper_command.is_empty() {
            return Err(invalid("battery helper_command cannot be empty"));
        }

        if self.battery.poll_interval_ms == 0 || self.battery.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1 and 60000"));
        }

        // Run
        if self.run.name.is_empty() {
            return Err(invalid("run name cannot be empty"));
        }

        if self.run.dataset_dir.is_empty() {
            return Err(invalid("dataset_dir cannot be empty"));
        }

        if self.run.cadence_hz == 0 || self.run.cadence_hz > 100 {
            return Err(invalid("cadence_hz must be between 1 and 100"));
        }

        if !(0.0..=100.0).contains(&self.run.threshold) {
            return Err(invalid("threshold must be between 0 and 100"));
        }

        if self.run.max_duration_s == Some(0) {
            return Err(invalid("max_duration_s must be greater than 0"));
        }

        if self.logging.file && self.logging.file_name.is_empty() {
            return Err(invalid("logging file_name cannot be empty when file logging is enabled"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> HoverlogError {
    HoverlogError::Config(toml::de::Error::custom(message))
}
