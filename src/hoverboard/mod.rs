//! # Hoverboard Serial Protocol Module
//!
//! Implementation of the hoverboard firmware's USART protocol.
//!
//! This module handles:
//! - Command frame encoding (speed + steer, 8 bytes)
//! - Feedback frame decoding (7 signed fields, 18 bytes)
//! - XOR checksums for both directions
//!
//! The two directions use different checksum conventions: commands fold
//! 16-bit integers, feedback folds raw little-endian byte pairs. Both are
//! reproduced exactly as the firmware expects them.

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod checksum;
