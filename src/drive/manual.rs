//! # Manual Speed Control
//!
//! Line-based keyboard control of the run speed.
//!
//! | Key | Action |
//! |-----|--------|
//! | `w` | +5 % |
//! | `s` | -5 % |
//! | `0`-`9` | set to digit × 10 % |
//! | `x` | stop (0 %) |
//! | `q` | quit the run |
//!
//! Keys are read on a plain OS thread (blocking stdin) and forwarded over a
//! channel to an async task that performs the ramps.

use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::command::CommandChannel;
use crate::context::StopSignal;

/// Percent change for `w` / `s`
const PERCENT_INCREMENT: u8 = 5;

/// One keyboard command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCommand {
    Faster,
    Slower,
    Set(u8),
    Halt,
    Quit,
}

impl ManualCommand {
    /// Parse a line of input; the first non-blank character decides
    pub fn parse(line: &str) -> Option<Self> {
        let key = line.trim().chars().next()?.to_ascii_lowercase();
        match key {
            'w' => Some(Self::Faster),
            's' => Some(Self::Slower),
            'x' => Some(Self::Halt),
            'q' => Some(Self::Quit),
            d if d.is_ascii_digit() => d.to_digit(10).map(|d| Self::Set(d as u8 * 10)),
            _ => None,
        }
    }

    /// Apply to a speed percentage; `None` for [`ManualCommand::Quit`]
    pub fn apply(self, percent: u8) -> Option<u8> {
        match self {
            Self::Faster => Some(percent.saturating_add(PERCENT_INCREMENT).min(100)),
            Self::Slower => Some(percent.saturating_sub(PERCENT_INCREMENT)),
            Self::Set(p) => Some(p.min(100)),
            Self::Halt => Some(0),
            Self::Quit => None,
        }
    }
}

/// Convert a percentage of full speed to a speed command (truncating)
pub fn percent_to_speed(percent: u8, full_speed: i16) -> i16 {
    (i32::from(percent.min(100)) * i32::from(full_speed) / 100) as i16
}

/// Spawn the stdin reader thread
///
/// The thread is detached; it ends when stdin closes or the receiver is
/// dropped.
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<ManualCommand>> {
    let (tx, rx) = mpsc::channel(8);

    thread::Builder::new()
        .name("manual-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match ManualCommand::parse(&line) {
                    Some(command) => {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    None => warn!("Unknown key {:?} (w/s/0-9/x/q)", line.trim()),
                }
            }
        })?;

    Ok(rx)
}

/// Apply keyboard commands until quit, input ends, or the run stops
///
/// A ramp in progress is abandoned as soon as the run stops.
///
/// # Returns
///
/// * `u8` - The last speed percentage
pub async fn run_manual_control(
    mut commands: mpsc::Receiver<ManualCommand>,
    channel: CommandChannel,
    full_speed: i16,
    ramp_step: i16,
    initial_percent: u8,
    run_stop: StopSignal,
) -> u8 {
    let mut stop = run_stop.subscribe();
    let mut percent = initial_percent;

    info!("Keyboard controls: w = faster, s = slower, 0-9 = set, x = stop, q = quit");

    loop {
        let command = tokio::select! {
            _ = stop.stopped() => break,
            command = commands.recv() => command,
        };

        let Some(command) = command else { break };

        match command.apply(percent) {
            Some(next) => {
                percent = next;
                let speed = percent_to_speed(percent, full_speed);
                // Shutdown owns the speed once the run stops
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break,
                    _ = channel.ramp_speed(speed, ramp_step) => {}
                }
                info!("[SPEED] {}% -> {}", percent, speed);
            }
            None => {
                info!("Quit command received");
                run_stop.raise();
                break;
            }
        }
    }

    percent
}
