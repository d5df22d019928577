//! # Hoverlog
//!
//! Drive a hoverboard at a fixed speed and record motor feedback plus BMS
//! telemetry until the battery reaches a charge threshold.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hoverlog::battery::helper::HelperLink;
use hoverlog::battery::reader::{wait_for_first_sample, BatteryReader};
use hoverlog::battery::{BatterySample, DEFAULT_CELL_COUNT, DEFAULT_TEMP_SENSORS};
use hoverlog::config::Config;
use hoverlog::context::RunContext;
use hoverlog::drive::manual::{run_manual_control, spawn_stdin_reader};
use hoverlog::drive::MotorController;
use hoverlog::hoverboard::protocol::MotorFeedback;
use hoverlog::telemetry::scheduler::cadence_period;
use hoverlog::telemetry::{Dataset, RunWriter, Sampler, Schema};

/// Hoverboard discharge/charge logger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Run name (overrides `[run] name`)
    #[arg(long)]
    run_name: Option<String>,

    /// Control the speed from the keyboard (w/s/0-9/x/q)
    #[arg(long)]
    manual: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,
}

/// Main entry point
///
/// 1. Load configuration and create the run (before any hardware is touched,
///    so a name collision costs nothing)
/// 2. Open the hoverboard and start the battery poller
/// 3. Ramp to the run speed and wait for the first BMS sample
/// 4. Sample until the stop condition, the time limit, `q` or Ctrl+C
/// 5. Ramp to zero, close the serial link, stop the poller
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::read(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(name) = &args.run_name {
        config.run.name = name.clone();
    }
    config.validate().context("Invalid configuration")?;

    let _log_guard = init_logging(&config)?;
    info!("Hoverlog v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.dry_run {
        info!(
            "Configuration OK: run '{}' in {}, {} Hz, stop: {}",
            config.run.name,
            config.run.dataset_dir,
            config.run.cadence_hz,
            config.run.stop_condition()
        );
        return Ok(());
    }

    let seed_motor = MotorFeedback::default();
    let seed_battery = BatterySample::seed(DEFAULT_TEMP_SENSORS, DEFAULT_CELL_COUNT);

    let dataset = Dataset::open(&config.run.dataset_dir)
        .with_context(|| format!("Failed to open dataset {}", config.run.dataset_dir))?;
    let writer = dataset
        .create_run(
            &config.run.name,
            run_metadata(&config),
            Schema::from_samples(&seed_motor, &seed_battery),
        )
        .context("Failed to create run")?;

    let context = RunContext::new();

    let motor = MotorController::open(&config.serial, &config.drive, context.motor.clone())
        .context("Failed to open hoverboard")?;
    motor.set_steer(config.drive.steer);

    let link = HelperLink::new(&config.battery.helper_command, config.battery.helper_args.clone());
    let battery = BatteryReader::start(
        link,
        config.battery.device_name.clone(),
        Duration::from_millis(config.battery.poll_interval_ms),
        context.battery.clone(),
        context.stop.clone(),
    )
    .context("Failed to start battery reader")?;

    let ctrl_c = {
        let stop = context.stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && stop.raise() {
                info!("Received Ctrl+C, shutting down...");
            }
        })
    };

    let result = record(&args, &config, &context, &motor, writer, seed_motor, seed_battery).await;

    // Shutdown runs whatever ended the run
    context.stop.raise();
    info!("Ramping down...");
    motor.ramp_speed(0, config.drive.ramp_step).await;
    motor.close().await;

    match battery.stop().await {
        Some(exit) => info!("Battery reader finished: {:?}", exit),
        None => warn!("Battery reader did not finish cleanly"),
    }
    ctrl_c.abort();

    if let Err(e) = &result {
        error!("Run failed: {:#}", e);
    }
    result
}

/// Ramp up, wait for the BMS and sample until the run stops
async fn record(
    args: &Args,
    config: &Config,
    context: &RunContext,
    motor: &MotorController,
    writer: RunWriter,
    seed_motor: MotorFeedback,
    seed_battery: BatterySample,
) -> Result<()> {
    let run_speed = config.drive.run_speed();
    info!("Ramping to {}% ({})", config.drive.speed_percent, run_speed);

    let mut stop = context.stop.subscribe();
    tokio::select! {
        _ = stop.stopped() => return Ok(()),
        _ = motor.ramp_speed(run_speed, config.drive.ramp_step) => {}
    }

    if config.run.wait_for_battery
        && !wait_for_first_sample(&context.battery, Duration::from_secs(1), context.stop.subscribe())
            .await
    {
        info!("Stopped before the first BMS sample; run '{}' is empty", config.run.name);
        return Ok(());
    }

    let manual = if args.manual {
        let keys = spawn_stdin_reader().context("Failed to start keyboard input")?;
        Some(tokio::spawn(run_manual_control(
            keys,
            motor.commands().clone(),
            config.drive.full_speed,
            config.drive.ramp_step,
            config.drive.speed_percent,
            context.stop.clone(),
        )))
    } else {
        None
    };

    let mut sampler = Sampler::new(
        context.clone(),
        writer,
        cadence_period(config.run.cadence_hz),
        config.run.stop_policy(),
        seed_motor,
        seed_battery,
    );
    let result = sampler.run().await;

    // Keyboard ramps must be over before the shutdown ramp starts
    if let Some(task) = manual {
        context.stop.raise();
        if let Ok(percent) = task.await {
            info!("Manual control ended at {}%", percent);
        }
    }

    let summary = result.context("Sampling failed")?;
    info!(
        "Run '{}' finished: {} rows ({})",
        config.run.name, summary.rows, summary.reason
    );

    Ok(())
}

/// Metadata stored with the run
fn run_metadata(config: &Config) -> BTreeMap<String, String> {
    let mut metadata = config.run.metadata.clone();
    metadata.insert("description".to_string(), config.run.description.clone());
    metadata.insert("stop_condition".to_string(), config.run.stop_condition().to_string());
    metadata.insert("cadence_hz".to_string(), config.run.cadence_hz.to_string());
    metadata.insert("speed_percent".to_string(), config.drive.speed_percent.to_string());
    metadata.insert("speed".to_string(), config.drive.run_speed().to_string());
    metadata.insert("steer".to_string(), config.drive.steer.to_string());
    metadata.insert("serial_port".to_string(), config.serial.port.clone());
    metadata.insert("bms_device".to_string(), config.battery.device_name.clone());
    if let Some(seconds) = config.run.max_duration_s {
        metadata.insert("max_duration_s".to_string(), seconds.to_string());
    }
    metadata
}

/// Install the stdout subscriber, plus a file sink in the dataset directory
/// if enabled
///
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.logging.file {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    }

    fs::create_dir_all(&config.run.dataset_dir)
        .with_context(|| format!("Failed to create {}", config.run.dataset_dir))?;
    let appender = tracing_appender::rolling::never(&config.run.dataset_dir, &config.logging.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(Some(guard))
}
