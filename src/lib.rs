//! # Hoverlog Library
//!
//! Drive a hoverboard over its serial protocol while recording motor
//! feedback and BMS telemetry into named runs.
//!
//! This library provides the frame codec, the serial command and feedback
//! channels, the latest-value caches shared between workers, the battery
//! poller and the sampling scheduler that merges everything into rows.

pub mod battery;
pub mod cache;
pub mod config;
pub mod context;
pub mod drive;
pub mod error;
pub mod hoverboard;
pub mod serial;
pub mod telemetry;
