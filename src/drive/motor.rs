//! # Motor Controller
//!
//! Owns the serial link to the hoverboard and the two tasks that use it: the
//! command transmitter and the feedback receiver.
//!
//! The controller has its own shutdown signal, separate from the run's stop
//! signal, so the speed can be ramped back to zero after a run ends while
//! the transmitter is still running.

use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::command::CommandChannel;
use super::feedback::{FeedbackReceiver, FeedbackStats};
use crate::cache::LatestValue;
use crate::config::{DriveConfig, SerialConfig};
use crate::context::StopSignal;
use crate::error::Result;
use crate::hoverboard::protocol::{MotionCommand, MotorFeedback};
use crate::serial::port_trait::SerialPortIO;
use crate::serial::HoverboardSerial;

/// How long `close` waits for each task
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Running hoverboard controller
pub struct MotorController {
    commands: CommandChannel,
    feedback: LatestValue<MotorFeedback>,
    shutdown: StopSignal,
    tx_task: JoinHandle<Result<u64>>,
    rx_task: JoinHandle<Result<FeedbackStats>>,
    device_path: String,
}

impl std::fmt::Debug for MotorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorController")
            .field("device_path", &self.device_path)
            .field("motion", &self.commands.motion())
            .finish_non_exhaustive()
    }
}

impl MotorController {
    /// Open the configured serial port and start both tasks
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the serial port cannot be opened. This is fatal: no
    /// controller exists without its port.
    pub fn open(
        serial: &SerialConfig,
        drive: &DriveConfig,
        feedback: LatestValue<MotorFeedback>,
    ) -> Result<Self> {
        let port = HoverboardSerial::open(&serial.port, serial.baud_rate)?;
        let device_path = port.device_path().to_string();
        let (reader, writer) = port.into_split();

        Ok(Self::start(
            reader,
            writer,
            Duration::from_millis(drive.transmit_period_ms),
            Duration::from_millis(serial.timeout_ms),
            feedback,
            device_path,
        ))
    }

    /// Start the transmitter and receiver over an already-open link
    pub fn start<R, P>(
        reader: R,
        writer: P,
        transmit_period: Duration,
        read_timeout: Duration,
        feedback: LatestValue<MotorFeedback>,
        device_path: impl Into<String>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        P: SerialPortIO + 'static,
    {
        let commands = CommandChannel::new(transmit_period);
        let shutdown = StopSignal::new();

        let tx_task = {
            let commands = commands.clone();
            let stop = shutdown.subscribe();
            tokio::spawn(async move { commands.run_transmitter(writer, stop).await })
        };

        let receiver = FeedbackReceiver::new(reader, feedback.clone(), read_timeout);
        let rx_task = tokio::spawn(receiver.run(shutdown.subscribe()));

        let device_path = device_path.into();
        info!("Hoverboard controller started on {}", device_path);

        Self {
            commands,
            feedback,
            shutdown,
            tx_task,
            rx_task,
            device_path,
        }
    }

    /// Handle to the shared motion target
    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn set_speed(&self, speed: i16) {
        self.commands.set_speed(speed);
    }

    pub fn set_steer(&self, steer: i16) {
        self.commands.set_steer(steer);
    }

    pub fn set_speed_steer(&self, speed: i16, steer: i16) {
        self.commands.set_speed_steer(speed, steer);
    }

    pub fn speed(&self) -> i16 {
        self.commands.speed()
    }

    pub fn steer(&self) -> i16 {
        self.commands.steer()
    }

    pub fn speed_steer(&self) -> (i16, i16) {
        self.commands.speed_steer()
    }

    pub fn motion(&self) -> MotionCommand {
        self.commands.motion()
    }

    /// Ramp the speed target; see [`CommandChannel::ramp_speed`]
    pub async fn ramp_speed(&self, target: i16, step: i16) -> usize {
        self.commands.ramp_speed(target, step).await
    }

    /// Latest validated feedback frame, if any has arrived
    pub fn feedback(&self) -> Option<MotorFeedback> {
        self.feedback.get()
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Stop both tasks and release the port
    ///
    /// Each task gets 2 s to finish; one that does not is aborted.
    pub async fn close(self) {
        info!("Closing hoverboard controller...");
        self.shutdown.raise();

        match join_with_timeout(self.tx_task, "transmitter").await {
            Some(Ok(sent)) => info!("Transmitter sent {} frames", sent),
            Some(Err(e)) => warn!("Transmitter failed: {}", e),
            None => {}
        }

        match join_with_timeout(self.rx_task, "receiver").await {
            Some(Ok(stats)) => info!(
                "Receiver decoded {} frames ({} checksum errors)",
                stats.frames, stats.checksum_errors
            ),
            Some(Err(e)) => warn!("Receiver failed: {}", e),
            None => {}
        }
    }
}

async fn join_with_timeout<T>(mut task: JoinHandle<T>, name: &str) -> Option<T> {
    match tokio::time::timeout(JOIN_TIMEOUT, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("{} task panicked: {}", name, e);
            None
        }
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, JOIN_TIMEOUT);
            task.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hoverboard::encoder::{encode_command, encode_feedback_frame};
    use crate::serial::port_trait::mocks::MockSerialPort;
    use tokio::io::AsyncWriteExt;

    fn start_mock() -> (MotorController, MockSerialPort, tokio::io::DuplexStream) {
        let (board, host) = tokio::io::duplex(256);
        let port = MockSerialPort::new();
        let controller = MotorController::start(
            host,
            port.clone(),
            Duration::from_millis(100),
            Duration::from_millis(100),
            LatestValue::new(),
            "mock",
        );
        (controller, port, board)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_is_seen_on_the_wire() {
        let (controller, port, _board) = start_mock();

        assert_eq!(controller.ramp_speed(100, 20).await, 5);
        tokio::time::sleep(Duration::from_millis(300)).await;
        controller.close().await;

        let frames = port.get_written_data();
        assert!(frames.len() >= 5);
        assert_eq!(frames.last().unwrap().as_slice(), &encode_command(100, 0));

        let speeds: Vec<i16> = frames
            .iter()
            .map(|f| i16::from_le_bytes([f[4], f[5]]))
            .collect();
        assert!(speeds[0] <= 20);
        assert!(speeds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feedback_reaches_cache() {
        let (controller, _port, mut board) = start_mock();
        assert_eq!(controller.feedback(), None);

        let feedback = MotorFeedback::from_fields([0, 116, 110, -112, 3980, 290, 0]);
        board.write_all(&[0x42, 0x42]).await.unwrap();
        board.write_all(&encode_feedback_frame(&feedback)).await.unwrap();

        let mut waited = 0;
        while controller.feedback().is_none() && waited < 10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }

        assert_eq!(controller.feedback(), Some(feedback));
        controller.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_setters_reach_transmitter() {
        let (controller, port, _board) = start_mock();
        controller.set_speed_steer(50, -10);
        assert_eq!(controller.speed_steer(), (50, -10));

        tokio::time::sleep(Duration::from_millis(150)).await;
        controller.close().await;

        let frames = port.get_written_data();
        assert_eq!(frames.last().unwrap().as_slice(), &encode_command(50, -10));
    }

    #[test]
    fn test_open_invalid_port_is_fatal() {
        let serial = SerialConfig {
            port: "/dev/nonexistent_hoverboard".to_string(),
            ..SerialConfig::default()
        };
        let result = MotorController::open(&serial, &DriveConfig::default(), LatestValue::new());
        assert!(result.is_err());
    }
}
