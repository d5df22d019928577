//! # Rows
//!
//! A row is one merged observation: a wall-clock timestamp plus the motor
//! and battery snapshots current at that instant. On disk it is flattened to
//! named numeric fields grouped by source.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::battery::BatterySample;
use crate::hoverboard::protocol::MotorFeedback;

/// Group name of the motor fields
pub const HOVERBOARD_GROUP: &str = "hoverboard";

/// Group name of the battery fields
pub const BMS_GROUP: &str = "bms";

/// Value of one persisted field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl FieldValue {
    /// Shape of this value
    pub fn shape(&self) -> FieldShape {
        match self {
            Self::Scalar(_) => FieldShape::Scalar,
            Self::Vector(values) => FieldShape::Vector { len: values.len() },
        }
    }

    /// The value if it is a scalar
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Vector(_) => None,
        }
    }
}

/// Declared shape of a persisted field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldShape {
    Scalar,
    Vector { len: usize },
}

impl FieldShape {
    /// Number of values a row holds for this field
    pub fn width(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector { len } => *len,
        }
    }
}

/// Field name to value, ordered by name
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Motor feedback flattened under the wire field names
pub fn motor_fields(feedback: &MotorFeedback) -> FieldMap {
    feedback
        .named_fields()
        .map(|(name, value)| (name.to_string(), FieldValue::Scalar(f64::from(value))))
        .collect()
}

/// Persisted battery fields
///
/// Only the fixed sample fields are kept; decoder extras are dropped.
/// `battery_charging` is stored as 1.0 / 0.0.
pub fn battery_fields(sample: &BatterySample) -> FieldMap {
    let scalar = |value: f64| FieldValue::Scalar(value);
    let charging = if sample.battery_charging { 1.0 } else { 0.0 };

    [
        ("battery_charging", scalar(charging)),
        ("battery_level", scalar(sample.battery_level)),
        ("voltage", scalar(sample.voltage)),
        ("current", scalar(sample.current)),
        ("cycle_charge", scalar(sample.cycle_charge)),
        ("temp_sensors", scalar(f64::from(sample.temp_sensors))),
        ("temp_values", FieldValue::Vector(sample.temp_values.clone())),
        ("power", scalar(sample.power)),
        ("cycle_capacity", scalar(sample.cycle_capacity)),
        ("cycles", scalar(f64::from(sample.cycles))),
        ("delta_voltage", scalar(sample.delta_voltage)),
        ("temperature", scalar(sample.temperature)),
        ("cell_count", scalar(f64::from(sample.cell_count))),
        ("cell_voltages", FieldValue::Vector(sample.cell_voltages.clone())),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

/// One merged observation
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<Local>,
    pub motor: MotorFeedback,
    pub battery: BatterySample,
}

impl Row {
    pub fn new(timestamp: DateTime<Local>, motor: MotorFeedback, battery: BatterySample) -> Self {
        Self {
            timestamp,
            motor,
            battery,
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Local time of day as `HH:MM:SS.fffff`
    pub fn time_string(&self) -> String {
        let mut text = self.timestamp.format("%H:%M:%S%.6f").to_string();
        text.pop();
        text
    }

    /// Flatten into the persisted form
    pub fn to_record(&self) -> RowRecord {
        RowRecord {
            timestamp_ms: self.timestamp_ms(),
            time_string: self.time_string(),
            hoverboard: motor_fields(&self.motor),
            bms: battery_fields(&self.battery),
        }
    }
}

/// A row as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub timestamp_ms: i64,
    pub time_string: String,
    pub hoverboard: FieldMap,
    pub bms: FieldMap,
}

impl RowRecord {
    /// Look up a field by group and name
    pub fn field(&self, group: &str, name: &str) -> Option<&FieldValue> {
        match group {
            HOVERBOARD_GROUP => self.hoverboard.get(name),
            BMS_GROUP => self.bms.get(name),
            _ => None,
        }
    }
}
