//! # Battery Module
//!
//! Battery management system (BMS) telemetry over a wireless link.
//!
//! This module handles:
//! - The battery sample record and its persisted fields
//! - The collaborator seam (`BatteryLink` / `BatteryConnection`) behind which
//!   the wireless protocol decoder lives
//! - A background poller that keeps the battery cache fresh
//! - A helper-process collaborator used by the binary

pub mod helper;
pub mod reader;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of temperature sensors in a seed sample
pub const DEFAULT_TEMP_SENSORS: usize = 3;

/// Default number of series cells in a seed sample (10S pack)
pub const DEFAULT_CELL_COUNT: usize = 10;

/// Errors reported by the battery collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatteryError {
    /// The named device could not be found or connected
    #[error("Device '{0}' not found")]
    NotFound(String),

    /// The link failed after connecting
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// One BMS reading
///
/// Every field defaults so partial decoder output still parses. Fields the
/// decoder reports that are not listed here land in `extra` and are not
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatterySample {
    /// Pack is currently charging
    pub battery_charging: bool,

    /// State of charge (0-100%)
    pub battery_level: f64,

    /// Pack voltage in volts
    pub voltage: f64,

    /// Pack current in amperes (negative while discharging)
    pub current: f64,

    /// Remaining charge in the current cycle (Ah)
    pub cycle_charge: f64,

    /// Number of temperature sensors reported
    pub temp_sensors: u32,

    /// Per-sensor temperatures in degrees Celsius
    pub temp_values: Vec<f64>,

    /// Power in watts
    pub power: f64,

    /// Remaining energy in the current cycle (Wh)
    pub cycle_capacity: f64,

    /// Charge cycle count
    pub cycles: u32,

    /// Spread between highest and lowest cell voltage
    pub delta_voltage: f64,

    /// Representative pack temperature in degrees Celsius
    pub temperature: f64,

    /// Number of cells reported
    pub cell_count: u32,

    /// Per-cell voltages in volts
    pub cell_voltages: Vec<f64>,

    /// Decoder fields without a dedicated slot
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl BatterySample {
    /// All-zero sample with fixed vector widths
    ///
    /// Used to seed a run before the first real reading arrives, and to
    /// declare the widths of the vector series in the run schema.
    pub fn seed(temp_sensors: usize, cells: usize) -> Self {
        Self {
            temp_values: vec![0.0; temp_sensors],
            cell_voltages: vec![0.0; cells],
            ..Default::default()
        }
    }

    /// State of charge used by stop conditions
    pub fn charge_level(&self) -> f64 {
        self.battery_level
    }
}

/// Entry point of the battery collaborator: turns a device name into a
/// live connection
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatteryLink: Send {
    /// Resolve a device name to a connection
    ///
    /// # Errors
    ///
    /// Returns [`BatteryError::NotFound`] if the device is not reachable
    async fn resolve(&mut self, device_name: &str)
        -> Result<Box<dyn BatteryConnection>, BatteryError>;
}

/// A connected battery from which samples can be pulled
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatteryConnection: Send {
    /// Human-readable address of the connected device
    fn address(&self) -> String;

    /// Pull one sample
    ///
    /// # Errors
    ///
    /// Returns [`BatteryError::Transport`] if the link is lost
    async fn poll(&mut self) -> Result<BatterySample, BatteryError>;
}
