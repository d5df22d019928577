//! # Hoverboard Frame Encoder
//!
//! Encodes motion commands into the 8-byte frame the firmware accepts.

use bytes::BufMut;

use super::checksum::{command_checksum, feedback_checksum};
use super::protocol::*;

/// Encode a speed/steer command into a complete frame
///
/// # Arguments
///
/// * `speed` - Commanded speed
/// * `steer` - Commanded steer
///
/// # Returns
///
/// * `[u8; 8]` - `start(u16) | steer(i16) | speed(i16) | checksum(u16)`, little-endian
///
/// # Examples
///
/// ```
/// use hoverlog::hoverboard::encoder::encode_command;
///
/// let frame = encode_command(0, 0);
/// assert_eq!(&frame[..2], &[0xCD, 0xAB]);
/// ```
pub fn encode_command(speed: i16, steer: i16) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    let mut buf = &mut frame[..];

    buf.put_u16_le(START_FRAME);
    buf.put_i16_le(steer);
    buf.put_i16_le(speed);
    buf.put_u16_le(command_checksum(speed, steer));

    frame
}

/// Encode a [`MotionCommand`] into a complete frame
pub fn encode_motion_command(command: &MotionCommand) -> [u8; COMMAND_FRAME_LEN] {
    encode_command(command.speed, command.steer)
}

/// Encode feedback the way the board transmits it
///
/// Used to drive the feedback receiver from scripted byte streams.
pub fn encode_feedback_frame(feedback: &MotorFeedback) -> [u8; FEEDBACK_FRAME_LEN] {
    let mut frame = [0u8; FEEDBACK_FRAME_LEN];
    {
        let mut buf = &mut frame[..2 + FEEDBACK_FIELDS_LEN];
        buf.put_slice(&START_FRAME_BYTES);
        for field in feedback.to_fields() {
            buf.put_i16_le(field);
        }
    }

    let checksum = feedback_checksum(&frame[2..2 + FEEDBACK_FIELDS_LEN]);
    frame[FEEDBACK_FRAME_LEN - 2..].copy_from_slice(&checksum);

    frame
}
