//! # XOR Checksums
//!
//! The firmware protects both frame directions with an XOR checksum, but the
//! two directions fold differently:
//!
//! - **Command**: `START_FRAME ^ steer ^ speed` over 16-bit integers
//! - **Feedback**: byte-wise XOR of the start marker bytes with each raw
//!   2-byte field

use super::protocol::{START_FRAME, START_FRAME_BYTES};

/// Checksum of a command frame
///
/// Signed values are reinterpreted as their 16-bit two's complement pattern.
///
/// # Examples
///
/// ```
/// use hoverlog::hoverboard::checksum::command_checksum;
///
/// assert_eq!(command_checksum(0, 0), 0xABCD);
/// ```
pub fn command_checksum(speed: i16, steer: i16) -> u16 {
    START_FRAME ^ (steer as u16) ^ (speed as u16)
}

/// Checksum of a feedback frame's field bytes
///
/// Starts from the start marker bytes and XORs in each consecutive byte pair.
/// A trailing odd byte is ignored.
pub fn feedback_checksum(field_bytes: &[u8]) -> [u8; 2] {
    field_bytes
        .chunks_exact(2)
        .fold(START_FRAME_BYTES, |acc, pair| [acc[0] ^ pair[0], acc[1] ^ pair[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_checksum_zero() {
        assert_eq!(command_checksum(0, 0), START_FRAME);
    }

    #[test]
    fn test_command_checksum_positive() {
        assert_eq!(command_checksum(500, 0), 0xABCD ^ 500);
        assert_eq!(command_checksum(0, 100), 0xABCD ^ 100);
    }

    #[test]
    fn test_command_checksum_negative_wraps() {
        // -1 is 0xFFFF on the wire
        assert_eq!(command_checksum(-1, 0), 0xABCD ^ 0xFFFF);
        assert_eq!(command_checksum(-300, -300), 0xABCD);
    }

    #[test]
    fn test_feedback_checksum_empty_is_marker() {
        assert_eq!(feedback_checksum(&[]), START_FRAME_BYTES);
    }

    #[test]
    fn test_feedback_checksum_bytewise() {
        let bytes = [0x01, 0x02, 0x10, 0x20];
        assert_eq!(
            feedback_checksum(&bytes),
            [0xCD ^ 0x01 ^ 0x10, 0xAB ^ 0x02 ^ 0x20]
        );
    }

    #[test]
    fn test_feedback_checksum_changes_with_data() {
        let a = feedback_checksum(&[0x00, 0x04]);
        let b = feedback_checksum(&[0x00, 0x05]);
        assert_ne!(a, b, "Checksum should change when data changes");
    }
}
