//! # Command Channel
//!
//! Holds the shared speed/steer target and transmits it to the board on a
//! fixed period.
//!
//! The ramp controller only mutates the shared target; it never writes to
//! the port. Whatever the target is at the next transmit tick goes on the
//! wire, so the speed seen by the board changes by at most one ramp step per
//! transmit period.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::StopListener;
use crate::error::Result;
use crate::hoverboard::encoder::encode_motion_command;
use crate::hoverboard::protocol::MotionCommand;
use crate::serial::port_trait::SerialPortIO;

/// Firmware command period (100 ms)
pub const DEFAULT_TRANSMIT_PERIOD: Duration = Duration::from_millis(100);

/// Default ramp step per transmit period
pub const DEFAULT_RAMP_STEP: i16 = 20;

/// Number of frames between transmitter status log messages
const LOG_INTERVAL_FRAMES: u64 = 600;

/// Move `current` one step toward `target` without overshooting
///
/// # Examples
///
/// ```
/// use hoverlog::drive::command::ramp_step;
///
/// assert_eq!(ramp_step(0, 500, 20), 20);
/// assert_eq!(ramp_step(490, 500, 20), 500);
/// assert_eq!(ramp_step(37, 0, 20), 17);
/// ```
pub fn ramp_step(current: i16, target: i16, step: i16) -> i16 {
    let step = step.max(1);
    if current < target {
        current.saturating_add(step).min(target)
    } else {
        current.saturating_sub(step).max(target)
    }
}

/// Shared motion target plus its transmit period
///
/// Clones share the same target.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    motion: Arc<Mutex<MotionCommand>>,
    period: Duration,
}

impl CommandChannel {
    /// Create a channel with a zero target
    pub fn new(period: Duration) -> Self {
        Self {
            motion: Arc::new(Mutex::new(MotionCommand::default())),
            period,
        }
    }

    /// Transmit period
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_speed(&self, speed: i16) {
        self.motion.lock().speed = speed;
    }

    pub fn set_steer(&self, steer: i16) {
        self.motion.lock().steer = steer;
    }

    pub fn set_speed_steer(&self, speed: i16, steer: i16) {
        *self.motion.lock() = MotionCommand { speed, steer };
    }

    pub fn speed(&self) -> i16 {
        self.motion.lock().speed
    }

    pub fn steer(&self) -> i16 {
        self.motion.lock().steer
    }

    pub fn speed_steer(&self) -> (i16, i16) {
        let motion = self.motion.lock();
        (motion.speed, motion.steer)
    }

    /// Current target as one consistent pair
    pub fn motion(&self) -> MotionCommand {
        *self.motion.lock()
    }

    /// Ramp the speed target toward `target`
    ///
    /// Each iteration moves the target by at most `step` under the lock, then
    /// sleeps one transmit period with the lock released. Returns once the
    /// target is reached.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of steps taken (0 if already at target)
    pub async fn ramp_speed(&self, target: i16, step: i16) -> usize {
        let mut iterations = 0;

        loop {
            {
                let mut motion = self.motion.lock();
                if motion.speed == target {
                    break;
                }
                motion.speed = ramp_step(motion.speed, target, step);
            }
            iterations += 1;
            sleep(self.period).await;
        }

        debug!("Ramped speed to {} in {} steps", target, iterations);
        iterations
    }

    /// Transmit the current target every period until stopped
    ///
    /// Write failures are logged and the next tick retries.
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Number of frames written
    pub async fn run_transmitter<P>(&self, mut port: P, mut stop: StopListener) -> Result<u64>
    where
        P: SerialPortIO,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent: u64 = 0;
        info!("Command transmitter started ({:?} period)", self.period);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {
                    let command = self.motion();
                    let frame = encode_motion_command(&command);

                    if let Err(e) = port.write_all(&frame).await {
                        warn!("Failed to send command frame: {}", e);
                        continue;
                    }
                    if let Err(e) = port.flush().await {
                        warn!("Failed to flush serial port: {}", e);
                        continue;
                    }

                    sent += 1;
                    if sent % LOG_INTERVAL_FRAMES == 0 {
                        debug!("Sent {} command frames (speed={}, steer={})",
                            sent, command.speed, command.steer);
                    }
                }
            }
        }

        info!("Command transmitter stopped after {} frames", sent);
        Ok(sent)
    }
}
