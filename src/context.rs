//! # Run Context
//!
//! The handles every worker of a run shares: the stop channel and the two
//! latest-value caches. The context is created once per run and cloned into
//! each worker at construction time.

use std::sync::Arc;

use tokio::sync::watch;

use crate::battery::BatterySample;
use crate::cache::LatestValue;
use crate::hoverboard::protocol::MotorFeedback;

/// Sending side of a one-shot stop channel
///
/// Raising is idempotent: only the first call changes the state and wakes
/// listeners.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Create a signal in the "running" state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if this call raised it, `false` if it was already raised
    pub fn raise(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Whether the signal has been raised
    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a listener for this signal
    pub fn subscribe(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of a [`StopSignal`]
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until stop is requested
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` next to a sleep or a
    /// read. Also returns if every [`StopSignal`] handle was dropped.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Shared state of one acquisition run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Run-level stop channel
    pub stop: StopSignal,

    /// Latest validated motor feedback frame
    pub motor: LatestValue<MotorFeedback>,

    /// Latest battery sample
    pub battery: LatestValue<BatterySample>,
}

impl RunContext {
    /// Create a context with empty caches and the stop signal lowered
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_raise_only_once() {
        let signal = StopSignal::new();
        assert!(!signal.is_raised());
        assert!(signal.raise());
        assert!(!signal.raise());
        assert!(signal.is_raised());
    }

    #[test]
    fn test_listener_sees_raise() {
        let signal = StopSignal::new();
        let listener = signal.subscribe();
        assert!(!listener.is_stopped());
        signal.raise();
        assert!(listener.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiter() {
        let signal = StopSignal::new();
        let mut listener = signal.subscribe();

        let waiter = tokio::spawn(async move {
            listener.stopped().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.raise();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish after raise")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_raised() {
        let signal = StopSignal::new();
        signal.raise();
        let mut listener = signal.subscribe();
        tokio::time::timeout(Duration::from_millis(100), listener.stopped())
            .await
            .expect("already raised");
    }

    #[test]
    fn test_context_clones_share_caches() {
        let ctx = RunContext::new();
        let worker = ctx.clone();
        worker.motor.set(MotorFeedback::default());
        assert!(ctx.motor.is_present());
        assert!(!ctx.battery.is_present());
    }
}
