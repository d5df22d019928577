//! # Sampling Scheduler
//!
//! Fixed-cadence loop that merges the two caches into rows.
//!
//! Each tick:
//! 1. Check the wall-clock limit
//! 2. Read both caches; a source that has never reported uses the last value
//!    seen this run, starting from the seed samples
//! 3. Stamp the row with the wall clock (never earlier than the previous row)
//! 4. Append it to the sink
//! 5. Check the charge level against the stop condition
//!
//! The charge level is only checked once a real battery sample has been
//! seen; the seed never ends a run. Whatever ends the loop raises the run's
//! stop signal, once.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::row::Row;
use super::stop::{StopPolicy, StopReason};
use super::store::RowSink;
use crate::battery::BatterySample;
use crate::context::RunContext;
use crate::error::Result;
use crate::hoverboard::protocol::MotorFeedback;

/// Number of rows between progress log messages
const LOG_INTERVAL_ROWS: u64 = 60;

/// Tick period for a cadence in Hz (at least 1 Hz)
pub fn cadence_period(cadence_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(cadence_hz.max(1)))
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub rows: u64,
    pub reason: StopReason,
}

/// The sampling loop and its per-run state
pub struct Sampler<S> {
    context: RunContext,
    sink: S,
    period: Duration,
    policy: StopPolicy,
    last_motor: MotorFeedback,
    last_battery: BatterySample,
    last_timestamp: Option<DateTime<Local>>,
    battery_seen: bool,
    rows: u64,
}

impl<S: RowSink> Sampler<S> {
    /// Create a sampler
    ///
    /// # Arguments
    ///
    /// * `context` - Caches to read and the stop signal to raise
    /// * `sink` - Where rows go
    /// * `period` - Tick period (see [`cadence_period`])
    /// * `policy` - Stop predicates
    /// * `seed_motor` / `seed_battery` - Stand-ins until each source reports
    pub fn new(
        context: RunContext,
        sink: S,
        period: Duration,
        policy: StopPolicy,
        seed_motor: MotorFeedback,
        seed_battery: BatterySample,
    ) -> Self {
        Self {
            context,
            sink,
            period,
            policy,
            last_motor: seed_motor,
            last_battery: seed_battery,
            last_timestamp: None,
            battery_seen: false,
            rows: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Rows appended so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Sample until a stop condition holds or the run is stopped
    ///
    /// # Errors
    ///
    /// Returns the sink's error if a row cannot be appended. The stop signal
    /// is raised first so the other workers wind down too.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut stop = self.context.stop.subscribe();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();

        info!(
            "Sampling every {:?} (stop: {}, limit: {:?})",
            self.period, self.policy.condition, self.policy.max_duration
        );

        let reason = loop {
            let ticked = tokio::select! {
                biased;
                _ = stop.stopped() => false,
                _ = ticker.tick() => true,
            };
            if !ticked {
                break StopReason::Cancelled;
            }

            // Half a period of slack so T seconds at f Hz yields round(T * f) rows
            if let Some(reason) = self.policy.check_elapsed(started.elapsed() + self.period / 2) {
                break reason;
            }

            let row = self.sample();
            if let Err(e) = self.sink.write_row(&row) {
                error!("Failed to append row {}: {}", self.rows, e);
                self.context.stop.raise();
                return Err(e);
            }
            self.rows += 1;

            debug!(
                "Row {}: {} speed={} level={}",
                self.rows,
                row.time_string(),
                row.motor.cmd2,
                row.battery.battery_level
            );
            if self.rows % LOG_INTERVAL_ROWS == 0 {
                info!("Recorded {} rows (battery {}%)", self.rows, row.battery.battery_level);
            }

            if self.battery_seen {
                if let Some(reason) = self.policy.check_level(row.battery.charge_level()) {
                    break reason;
                }
            }
        };

        if self.context.stop.raise() {
            info!("Run stopped: {}", reason);
        }

        Ok(RunSummary {
            rows: self.rows,
            reason,
        })
    }

    fn sample(&mut self) -> Row {
        if let Some(motor) = self.context.motor.get() {
            self.last_motor = motor;
        }
        if let Some(battery) = self.context.battery.get() {
            self.last_battery = battery;
            self.battery_seen = true;
        }

        let mut timestamp = Local::now();
        if let Some(last) = self.last_timestamp {
            timestamp = timestamp.max(last);
        }
        self.last_timestamp = Some(timestamp);

        Row::new(timestamp, self.last_motor, self.last_battery.clone())
    }
}
