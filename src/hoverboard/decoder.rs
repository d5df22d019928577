//! # Hoverboard Frame Decoder
//!
//! Decodes feedback frames sent by the board.

use bytes::Buf;

use super::checksum::feedback_checksum;
use super::protocol::*;
use crate::error::{HoverlogError, Result};

/// Decode the payload that follows a start marker
///
/// # Arguments
///
/// * `payload` - 7 little-endian i16 fields followed by the 2 checksum bytes
///
/// # Returns
///
/// * `Result<MotorFeedback>` - Decoded feedback
///
/// # Errors
///
/// Returns [`HoverlogError::Checksum`] if the recomputed checksum bytes differ
/// from the transmitted ones. The frame should be discarded.
pub fn decode_feedback(payload: &[u8; FEEDBACK_PAYLOAD_LEN]) -> Result<MotorFeedback> {
    let (field_bytes, received) = payload.split_at(FEEDBACK_FIELDS_LEN);

    let expected = feedback_checksum(field_bytes);
    if expected != received {
        return Err(HoverlogError::Checksum {
            expected,
            actual: [received[0], received[1]],
        });
    }

    let mut buf = field_bytes;
    let mut fields = [0i16; FEEDBACK_FIELD_COUNT];
    for field in fields.iter_mut() {
        *field = buf.get_i16_le();
    }

    Ok(MotorFeedback::from_fields(fields))
}

/// Decode a complete feedback frame, start marker included
///
/// # Errors
///
/// Returns error if:
/// - Frame length is not 18 bytes
/// - Start marker is wrong
/// - Checksum check fails
pub fn decode_feedback_frame(frame: &[u8]) -> Result<MotorFeedback> {
    if frame.len() != FEEDBACK_FRAME_LEN {
        return Err(HoverlogError::Serial(format!(
            "Feedback frame must be {} bytes, got {}",
            FEEDBACK_FRAME_LEN,
            frame.len()
        )));
    }

    if frame[..2] != START_FRAME_BYTES {
        return Err(HoverlogError::Serial(format!(
            "Invalid start marker: 0x{:02X}{:02X}",
            frame[1], frame[0]
        )));
    }

    let mut payload = [0u8; FEEDBACK_PAYLOAD_LEN];
    payload.copy_from_slice(&frame[2..]);
    decode_feedback(&payload)
}
