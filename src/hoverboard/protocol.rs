//! # Hoverboard Protocol Constants and Types
//!
//! Core protocol definitions for the hoverboard USART link.

use serde::{Deserialize, Serialize};

/// Start-of-frame marker shared by command and feedback frames
pub const START_FRAME: u16 = 0xABCD;

/// Start-of-frame marker as it appears on the wire (low byte first)
pub const START_FRAME_BYTES: [u8; 2] = START_FRAME.to_le_bytes();

/// Default UART baud rate of the hoverboard firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Command frame size: start(2) + steer(2) + speed(2) + checksum(2)
pub const COMMAND_FRAME_LEN: usize = 8;

/// Number of signed 16-bit fields in a feedback frame
pub const FEEDBACK_FIELD_COUNT: usize = 7;

/// Feedback field bytes (7 × i16)
pub const FEEDBACK_FIELDS_LEN: usize = FEEDBACK_FIELD_COUNT * 2;

/// Feedback payload following the start marker: fields(14) + checksum(2)
pub const FEEDBACK_PAYLOAD_LEN: usize = FEEDBACK_FIELDS_LEN + 2;

/// Complete feedback frame size: start(2) + payload(16)
pub const FEEDBACK_FRAME_LEN: usize = 2 + FEEDBACK_PAYLOAD_LEN;

/// Feedback field names in wire order
pub const FEEDBACK_FIELD_NAMES: [&str; FEEDBACK_FIELD_COUNT] = [
    "cmd1",
    "cmd2",
    "speedR_meas",
    "speedL_meas",
    "batVoltage",
    "boardTemp",
    "cmdLed",
];

/// Speed/steer pair sent to the board on every transmit tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionCommand {
    /// Commanded speed (firmware units, roughly -1000..1000)
    pub speed: i16,

    /// Commanded steer (firmware units)
    pub steer: i16,
}

/// One validated feedback frame from the board
///
/// Only produced by a frame whose checksum passed, so every value here is
/// from the same frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorFeedback {
    /// Echoed steer command
    pub cmd1: i16,

    /// Echoed speed command
    pub cmd2: i16,

    /// Measured right wheel speed (rpm)
    #[serde(rename = "speedR_meas")]
    pub speed_r_meas: i16,

    /// Measured left wheel speed (rpm)
    #[serde(rename = "speedL_meas")]
    pub speed_l_meas: i16,

    /// Battery voltage measured by the board, in centivolts
    #[serde(rename = "batVoltage")]
    pub bat_voltage: i16,

    /// Board temperature in deci-degrees Celsius
    #[serde(rename = "boardTemp")]
    pub board_temp: i16,

    /// LED state bitmask
    #[serde(rename = "cmdLed")]
    pub cmd_led: i16,
}

impl MotorFeedback {
    /// Build feedback from fields in wire order
    pub fn from_fields(fields: [i16; FEEDBACK_FIELD_COUNT]) -> Self {
        Self {
            cmd1: fields[0],
            cmd2: fields[1],
            speed_r_meas: fields[2],
            speed_l_meas: fields[3],
            bat_voltage: fields[4],
            board_temp: fields[5],
            cmd_led: fields[6],
        }
    }

    /// Fields in wire order
    pub fn to_fields(&self) -> [i16; FEEDBACK_FIELD_COUNT] {
        [
            self.cmd1,
            self.cmd2,
            self.speed_r_meas,
            self.speed_l_meas,
            self.bat_voltage,
            self.board_temp,
            self.cmd_led,
        ]
    }

    /// Named fields in wire order
    pub fn named_fields(&self) -> impl Iterator<Item = (&'static str, i16)> {
        FEEDBACK_FIELD_NAMES.into_iter().zip(self.to_fields())
    }

    /// Board-measured battery voltage in volts
    pub fn voltage_volts(&self) -> f32 {
        self.bat_voltage as f32 / 100.0
    }

    /// Board temperature in degrees Celsius
    pub fn temperature_celsius(&self) -> f32 {
        self.board_temp as f32 / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(START_FRAME, 0xABCD);
        assert_eq!(START_FRAME_BYTES, [0xCD, 0xAB]);
        assert_eq!(COMMAND_FRAME_LEN, 8);
        assert_eq!(FEEDBACK_PAYLOAD_LEN, 16);
        assert_eq!(FEEDBACK_FRAME_LEN, 18);
    }

    #[test]
    fn test_fields_round_trip_order() {
        let fields = [1, 2, 3, 4, 5, 6, 7];
        let feedback = MotorFeedback::from_fields(fields);
        assert_eq!(feedback.speed_r_meas, 3);
        assert_eq!(feedback.cmd_led, 7);
        assert_eq!(feedback.to_fields(), fields);
    }

    #[test]
    fn test_named_fields_use_wire_names() {
        let feedback = MotorFeedback::from_fields([10, 20, 30, 40, 3650, 355, 1]);
        let named: Vec<_> = feedback.named_fields().collect();
        assert_eq!(named[2], ("speedR_meas", 30));
        assert_eq!(named[4], ("batVoltage", 3650));
    }

    #[test]
    fn test_unit_conversions() {
        let feedback = MotorFeedback {
            bat_voltage: 3650,
            board_temp: 355,
            ..Default::default()
        };
        assert!((feedback.voltage_volts() - 36.5).abs() < 1e-4);
        assert!((feedback.temperature_celsius() - 35.5).abs() < 1e-4);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let feedback = MotorFeedback::from_fields([0, 0, 12, -12, 0, 0, 0]);
        let json = serde_json::to_value(feedback).unwrap();
        assert_eq!(json["speedR_meas"], 12);
        assert_eq!(json["speedL_meas"], -12);
        assert!(json.get("speed_r_meas").is_none());
    }
}
