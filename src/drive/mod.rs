//! # Drive Module
//!
//! Motion control of the hoverboard over its serial link.
//!
//! This module handles:
//! - The shared speed/steer target and its periodic transmitter
//! - Step-bounded speed ramps
//! - Feedback frame synchronization and publication
//! - Keyboard speed control

pub mod command;
pub mod feedback;
pub mod manual;
pub mod motor;

pub use command::CommandChannel;
pub use motor::MotorController;
