//! # Battery Reader
//!
//! Keeps the battery cache fresh by polling the collaborator in the
//! background.
//!
//! The poll loop runs on its own OS thread inside a current-thread Tokio
//! runtime, so the wireless stack never shares a scheduler with the serial
//! tasks. The rest of the program only sees the cache.
//!
//! There is no reconnection: if the device is not found, or the link drops,
//! the loop logs and exits and the cache keeps its last value (or stays
//! empty).

use std::thread;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{BatteryLink, BatterySample};
use crate::cache::LatestValue;
use crate::context::{StopListener, StopSignal};
use crate::error::{HoverlogError, Result};

/// Default poll interval (0.5 s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long `stop` waits for the poll thread to finish
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why the poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Stop was requested
    Stopped,
    /// The device could not be resolved
    NotFound,
    /// The link failed after connecting
    TransportFailed,
}

/// Poll the collaborator until stopped or the link fails
///
/// Resolves `device_name` once, then pulls one sample every `poll_interval`
/// and writes it into `cache`. Stop is observed while resolving, while a
/// poll is in flight and between polls, so a stalled link cannot hold up
/// shutdown.
pub async fn run_poll_loop<L: BatteryLink + ?Sized>(
    link: &mut L,
    device_name: &str,
    poll_interval: Duration,
    cache: &LatestValue<BatterySample>,
    mut stop: StopListener,
) -> PollExit {
    let resolved = tokio::select! {
        _ = stop.stopped() => return PollExit::Stopped,
        resolved = link.resolve(device_name) => resolved,
    };

    let mut connection = match resolved {
        Ok(connection) => connection,
        Err(e) => {
            error!("Battery reader giving up: {}", e);
            return PollExit::NotFound;
        }
    };
    info!("Connected to BMS '{}' at {}", device_name, connection.address());

    loop {
        let polled = tokio::select! {
            biased;
            _ = stop.stopped() => return PollExit::Stopped,
            polled = connection.poll() => polled,
        };

        match polled {
            Ok(sample) => cache.set(sample),
            Err(e) => {
                error!("Failed to update BMS '{}': {}", device_name, e);
                return PollExit::TransportFailed;
            }
        }

        tokio::select! {
            _ = stop.stopped() => return PollExit::Stopped,
            _ = sleep(poll_interval) => {}
        }
    }
}

/// Handle to the background battery poller
#[derive(Debug)]
pub struct BatteryReader {
    stop: StopSignal,
    handle: Option<thread::JoinHandle<PollExit>>,
}

impl BatteryReader {
    /// Start polling on a dedicated thread
    ///
    /// # Arguments
    ///
    /// * `link` - Battery collaborator
    /// * `device_name` - Device to resolve
    /// * `poll_interval` - Delay between polls
    /// * `cache` - Cache to refresh
    /// * `stop` - Stop signal the poller listens to
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn start<L>(
        mut link: L,
        device_name: String,
        poll_interval: Duration,
        cache: LatestValue<BatterySample>,
        stop: StopSignal,
    ) -> Result<Self>
    where
        L: BatteryLink + 'static,
    {
        let listener = stop.subscribe();

        let handle = thread::Builder::new()
            .name("battery-poll".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build battery runtime: {}", e);
                        return PollExit::TransportFailed;
                    }
                };

                let exit = runtime.block_on(run_poll_loop(
                    &mut link,
                    &device_name,
                    poll_interval,
                    &cache,
                    listener,
                ));
                info!("Battery reader exited: {:?}", exit);
                exit
            })
            .map_err(HoverlogError::Io)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Whether the poll thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the stop signal and wait for the poll thread
    ///
    /// Waits at most 2 s; returns `None` if the thread did not finish in time.
    pub async fn stop(mut self) -> Option<PollExit> {
        self.stop.raise();

        let handle = self.handle.take()?;
        let joined = tokio::task::spawn_blocking(move || handle.join());

        match tokio::time::timeout(JOIN_TIMEOUT, joined).await {
            Ok(Ok(Ok(exit))) => Some(exit),
            Ok(_) => {
                warn!("Battery reader thread panicked");
                None
            }
            Err(_) => {
                warn!("Battery reader did not stop within {:?}", JOIN_TIMEOUT);
                None
            }
        }
    }
}

/// Wait until the first battery sample lands in the cache
///
/// Logs once per `log_every` while waiting. Returns `false` if stop was
/// requested first.
pub async fn wait_for_first_sample(
    cache: &LatestValue<BatterySample>,
    log_every: Duration,
    mut stop: StopListener,
) -> bool {
    loop {
        if cache.is_present() {
            return true;
        }
        info!("Waiting for BMS connection...");
        tokio::select! {
            _ = stop.stopped() => return false,
            _ = sleep(log_every) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{
        BatteryConnection, BatteryError, MockBatteryConnection, MockBatteryLink,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn sample_with_level(level: f64) -> BatterySample {
        BatterySample {
            battery_level: level,
            ..BatterySample::seed(3, 10)
        }
    }

    fn link_with(connection: MockBatteryConnection) -> MockBatteryLink {
        let mut link = MockBatteryLink::new();
        link.expect_resolve()
            .times(1)
            .return_once(move |_| Ok(Box::new(connection) as Box<dyn BatteryConnection>));
        link
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_not_found_exits_and_cache_stays_empty() {
        let mut link = MockBatteryLink::new();
        link.expect_resolve()
            .withf(|name: &str| name == "EGIKE_STATION_1")
            .times(1)
            .returning(|name| Err(BatteryError::NotFound(name.to_string())));

        let cache = LatestValue::new();
        let stop = StopSignal::new();

        let exit = run_poll_loop(
            &mut link,
            "EGIKE_STATION_1",
            DEFAULT_POLL_INTERVAL,
            &cache,
            stop.subscribe(),
        )
        .await;

        assert_eq!(exit, PollExit::NotFound);
        assert!(!cache.is_present());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_keeps_last_sample() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&polls);

        let mut connection = MockBatteryConnection::new();
        connection.expect_address().return_const("AA:BB".to_string());
        connection.expect_poll().returning(move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(sample_with_level(80.0)),
                1 => Ok(sample_with_level(79.5)),
                _ => Err(BatteryError::Transport("link lost".into())),
            }
        });

        let mut link = link_with(connection);
        let cache = LatestValue::new();
        let stop = StopSignal::new();

        let exit = run_poll_loop(&mut link, "bms", DEFAULT_POLL_INTERVAL, &cache, stop.subscribe())
            .await;

        assert_eq!(exit, PollExit::TransportFailed);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get().unwrap().battery_level, 79.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_between_polls() {
        let mut connection = MockBatteryConnection::new();
        connection.expect_address().return_const("AA:BB".to_string());
        connection.expect_poll().returning(|| Ok(sample_with_level(50.0)));

        let mut link = link_with(connection);
        let cache = LatestValue::new();
        let stop = StopSignal::new();
        let listener = stop.subscribe();

        let poller_cache = cache.clone();
        let poller = tokio::spawn(async move {
            run_poll_loop(&mut link, "bms", DEFAULT_POLL_INTERVAL, &poller_cache, listener).await
        });

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        stop.raise();

        assert_eq!(poller.await.unwrap(), PollExit::Stopped);
        assert_eq!(cache.get().unwrap().battery_level, 50.0);
    }

    struct StalledConnection;

    #[async_trait::async_trait]
    impl BatteryConnection for StalledConnection {
        fn address(&self) -> String {
            "AA:BB".to_string()
        }

        async fn poll(&mut self) -> std::result::Result<BatterySample, BatteryError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_stalled_poll() {
        let mut link = MockBatteryLink::new();
        link.expect_resolve()
            .times(1)
            .return_once(|_| Ok(Box::new(StalledConnection) as Box<dyn BatteryConnection>));

        let cache = LatestValue::new();
        let stop = StopSignal::new();
        let listener = stop.subscribe();

        let poller_cache = cache.clone();
        let poller = tokio::spawn(async move {
            run_poll_loop(&mut link, "bms", DEFAULT_POLL_INTERVAL, &poller_cache, listener).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.raise();

        let exit = tokio::time::timeout(DEFAULT_POLL_INTERVAL, poller)
            .await
            .expect("stop must be observed within one poll interval")
            .unwrap();
        assert_eq!(exit, PollExit::Stopped);
        assert!(!cache.is_present());
    }

    #[tokio::test]
    async fn test_reader_thread_stops() {
        let mut connection = MockBatteryConnection::new();
        connection.expect_address().return_const("AA:BB".to_string());
        connection.expect_poll().returning(|| Ok(sample_with_level(65.0)));

        let cache = LatestValue::new();
        let reader = BatteryReader::start(
            link_with(connection),
            "bms".to_string(),
            Duration::from_millis(10),
            cache.clone(),
            StopSignal::new(),
        )
        .unwrap();

        let mut waited = 0;
        while !cache.is_present() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(reader.is_running());

        assert_eq!(reader.stop().await, Some(PollExit::Stopped));
        assert_eq!(cache.get().unwrap().battery_level, 65.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_first_sample() {
        let cache = LatestValue::new();
        let stop = StopSignal::new();

        let producer = cache.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            producer.set(sample_with_level(90.0));
        });

        assert!(wait_for_first_sample(&cache, Duration::from_secs(1), stop.subscribe()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_first_sample_aborted_by_stop() {
        let cache: LatestValue<BatterySample> = LatestValue::new();
        let stop = StopSignal::new();
        stop.raise();

        assert!(!wait_for_first_sample(&cache, Duration::from_secs(1), stop.subscribe()).await);
    }
}
