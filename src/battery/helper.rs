//! # Helper-Process Battery Link
//!
//! Runs an external decoder program that talks to the BMS and prints one
//! JSON sample per line on stdout:
//!
//! ```text
//! <helper_command> [helper_args...] <device_name>
//! {"battery_level": 85.0, "voltage": 41.2, ...}
//! {"battery_level": 84.9, "voltage": 41.1, ...}
//! ```
//!
//! The device counts as found once the helper prints its first line. Each
//! poll returns the newest line printed so far, not the oldest unread one.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::debug;

use super::{BatteryConnection, BatteryError, BatteryLink, BatterySample};

/// Spawns the helper program on `resolve`
#[derive(Debug, Clone)]
pub struct HelperLink {
    program: String,
    args: Vec<String>,
}

impl HelperLink {
    /// Create a link that runs `program args... <device_name>`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl BatteryLink for HelperLink {
    async fn resolve(
        &mut self,
        device_name: &str,
    ) -> Result<Box<dyn BatteryConnection>, BatteryError> {
        debug!("Spawning battery helper: {} {:?} {}", self.program, self.args, device_name);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(device_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BatteryError::NotFound(format!("{} (failed to start {}: {})", device_name, self.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BatteryError::NotFound(device_name.to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let first = match lines.next_line().await {
            Ok(Some(line)) => parse_sample(&line)
                .map_err(|e| BatteryError::NotFound(format!("{} ({})", device_name, e)))?,
            Ok(None) | Err(_) => return Err(BatteryError::NotFound(device_name.to_string())),
        };

        Ok(Box::new(HelperConnection {
            _child: child,
            lines,
            pending: Some(first),
            address: device_name.to_string(),
        }))
    }
}

/// A running helper process
#[derive(Debug)]
pub struct HelperConnection {
    /// Kept so the process is killed when the connection is dropped
    _child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    pending: Option<BatterySample>,
    address: String,
}

#[async_trait]
impl BatteryConnection for HelperConnection {
    fn address(&self) -> String {
        self.address.clone()
    }

    /// Newest sample the helper has printed
    ///
    /// Waits for a line only if none is queued; any backlog is drained and
    /// all but the last line discarded, so a chatty helper cannot make the
    /// cache trail the pack.
    async fn poll(&mut self) -> Result<BatterySample, BatteryError> {
        let mut latest = match self.pending.take() {
            Some(sample) => sample,
            None => self.next_sample().await?,
        };

        loop {
            // A zero timeout still polls the read once, so queued lines are taken
            match timeout(Duration::ZERO, self.lines.next_line()).await {
                Err(_) => break,
                Ok(Ok(Some(line))) => latest = parse_sample(&line)?,
                // Exit is reported by the next poll
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(BatteryError::Transport(e.to_string())),
            }
        }

        Ok(latest)
    }
}

impl HelperConnection {
    async fn next_sample(&mut self) -> Result<BatterySample, BatteryError> {
        match self.lines.next_line().await {
            Ok(Some(line)) => parse_sample(&line),
            Ok(None) => Err(BatteryError::Transport("helper exited".to_string())),
            Err(e) => Err(BatteryError::Transport(e.to_string())),
        }
    }
}

fn parse_sample(line: &str) -> Result<BatterySample, BatteryError> {
    serde_json::from_str(line.trim())
        .map_err(|e| BatteryError::Transport(format!("invalid sample: {}", e)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_link(script: &str) -> HelperLink {
        // `sh -c <script> <device>` binds the device name to $0
        HelperLink::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let mut link = HelperLink::new("/nonexistent/bms-helper", vec![]);
        let result = link.resolve("EGIKE_STATION_1").await;
        assert!(matches!(result, Err(BatteryError::NotFound(msg)) if msg.contains("EGIKE_STATION_1")));
    }

    #[tokio::test]
    async fn test_silent_helper_is_not_found() {
        let mut link = shell_link("exit 1");
        assert!(matches!(link.resolve("bms").await, Err(BatteryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_samples_then_transport_failure() {
        let mut link = shell_link(
            r#"echo '{"battery_level": 85.0}'; sleep 0.3; echo '{"battery_level": 84.5, "cycles": 3}'"#,
        );

        let mut connection = link.resolve("bms").await.unwrap();
        assert_eq!(connection.address(), "bms");

        assert_eq!(connection.poll().await.unwrap().battery_level, 85.0);
        let second = connection.poll().await.unwrap();
        assert_eq!(second.battery_level, 84.5);
        assert_eq!(second.cycles, 3);

        assert!(matches!(
            connection.poll().await,
            Err(BatteryError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_device_name_is_passed() {
        let mut link = shell_link(r#"echo "{\"extra_name\": \"$0\"}""#);
        let mut connection = link.resolve("EGIKE_STATION_1").await.unwrap();
        let sample = connection.poll().await.unwrap();
        assert_eq!(sample.extra["extra_name"], serde_json::json!("EGIKE_STATION_1"));
    }

    #[tokio::test]
    async fn test_poll_skips_backlog_to_newest_sample() {
        let mut link = shell_link(
            r#"i=1; while [ $i -le 200 ]; do echo "{\"battery_level\": $i}"; i=$((i+1)); done; sleep 5"#,
        );
        let mut connection = link.resolve("bms").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(connection.poll().await.unwrap().battery_level, 200.0);
    }

    #[tokio::test]
    async fn test_garbage_line_is_transport_error() {
        let mut link = shell_link(r#"echo '{"battery_level": 1.0}'; sleep 0.3; echo 'not json'"#);
        let mut connection = link.resolve("bms").await.unwrap();
        connection.poll().await.unwrap();
        assert!(matches!(connection.poll().await, Err(BatteryError::Transport(_))));
    }
}
