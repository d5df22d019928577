//! # Feedback Channel
//!
//! Receives feedback frames from the board and publishes them to the motor
//! cache.
//!
//! The byte stream has no guaranteed frame boundaries, so the receiver
//! scans for the start marker one byte at a time:
//!
//! - **Seeking**: keep a one-byte lookback; when `(lookback, byte)` equals the
//!   marker, switch to Locked.
//! - **Locked**: collect the fixed 16-byte payload, decode it, then go back to
//!   Seeking whether or not the checksum passed.
//!
//! Garbage costs one byte per step, so recovering from N bad bytes is O(N).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::LatestValue;
use crate::context::StopListener;
use crate::error::{HoverlogError, Result};
use crate::hoverboard::decoder::decode_feedback;
use crate::hoverboard::protocol::{MotorFeedback, FEEDBACK_PAYLOAD_LEN, START_FRAME_BYTES};

/// Default read timeout; matches the transmit period
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Seeking,
    Locked,
}

/// Byte-at-a-time frame synchronizer
#[derive(Debug, Clone)]
pub struct FrameSync {
    state: SyncState,
    lookback: Option<u8>,
    payload: [u8; FEEDBACK_PAYLOAD_LEN],
    filled: usize,
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            state: SyncState::Seeking,
            lookback: None,
            payload: [0u8; FEEDBACK_PAYLOAD_LEN],
            filled: 0,
        }
    }

    /// Whether a start marker has been matched and a payload is being read
    pub fn is_locked(&self) -> bool {
        self.state == SyncState::Locked
    }

    /// Feed one byte
    ///
    /// # Returns
    ///
    /// * `None` - No frame completed with this byte
    /// * `Some(Ok(feedback))` - A frame completed and passed its checksum
    /// * `Some(Err(_))` - A frame completed and failed its checksum
    pub fn push(&mut self, byte: u8) -> Option<Result<MotorFeedback>> {
        match self.state {
            SyncState::Seeking => {
                if self.lookback == Some(START_FRAME_BYTES[0]) && byte == START_FRAME_BYTES[1] {
                    self.state = SyncState::Locked;
                    self.lookback = None;
                    self.filled = 0;
                } else {
                    self.lookback = Some(byte);
                }
                None
            }
            SyncState::Locked => {
                self.payload[self.filled] = byte;
                self.filled += 1;

                if self.filled < FEEDBACK_PAYLOAD_LEN {
                    return None;
                }

                self.state = SyncState::Seeking;
                self.filled = 0;
                Some(decode_feedback(&self.payload))
            }
        }
    }
}

/// Counters reported when the receiver exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    /// Frames that passed the checksum
    pub frames: u64,
    /// Frames discarded for a bad checksum
    pub checksum_errors: u64,
}

/// Serial receiver publishing validated feedback
pub struct FeedbackReceiver<R> {
    reader: BufReader<R>,
    sync: FrameSync,
    cache: LatestValue<MotorFeedback>,
    read_timeout: Duration,
}

impl<R> FeedbackReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a receiver over `reader` publishing into `cache`
    pub fn new(reader: R, cache: LatestValue<MotorFeedback>, read_timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            sync: FrameSync::new(),
            cache,
            read_timeout,
        }
    }

    /// Receive until stopped or the stream ends
    ///
    /// A read that times out just loops back to check for stop. Checksum
    /// failures are logged and the frame is dropped.
    ///
    /// # Errors
    ///
    /// Returns error on a read failure other than end-of-stream
    pub async fn run(mut self, mut stop: StopListener) -> Result<FeedbackStats> {
        let mut stats = FeedbackStats::default();
        info!("Feedback receiver started");

        loop {
            let read = tokio::select! {
                biased;
                _ = stop.stopped() => break,
                read = timeout(self.read_timeout, self.reader.read_u8()) => read,
            };

            let byte = match read {
                Err(_elapsed) => continue,
                Ok(Ok(byte)) => byte,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("Feedback stream closed");
                    break;
                }
                Ok(Err(e)) => {
                    return Err(HoverlogError::Serial(format!("Failed to read feedback: {}", e)));
                }
            };

            match self.sync.push(byte) {
                None => {}
                Some(Ok(feedback)) => {
                    debug!("Feedback: {:?}", feedback);
                    self.cache.set(feedback);
                    stats.frames += 1;
                }
                Some(Err(e)) => {
                    warn!("Ignoring feedback frame: {}", e);
                    stats.checksum_errors += 1;
                }
            }
        }

        info!(
            "Feedback receiver stopped ({} frames, {} checksum errors)",
            stats.frames, stats.checksum_errors
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StopSignal;
    use crate::hoverboard::encoder::encode_feedback_frame;
    use crate::hoverboard::protocol::FEEDBACK_FRAME_LEN;

    fn feedback(speed: i16) -> MotorFeedback {
        MotorFeedback::from_fields([0, speed, speed - 3, -(speed - 5), 3912, 312, 1])
    }

    fn push_all(sync: &mut FrameSync, bytes: &[u8]) -> Vec<Result<MotorFeedback>> {
        bytes.iter().filter_map(|&b| sync.push(b)).collect()
    }

    #[test]
    fn test_single_frame() {
        let mut sync = FrameSync::new();
        let results = push_all(&mut sync, &encode_feedback_frame(&feedback(464)));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &feedback(464));
        assert!(!sync.is_locked());
    }

    #[test]
    fn test_garbage_prefix_does_not_matter() {
        let frame = encode_feedback_frame(&feedback(200));

        for k in [0usize, 1, 7, 100, 1000] {
            let mut stream: Vec<u8> = (0..k).map(|i| (i % 200) as u8 + 0x10).collect();
            assert!(!stream.windows(2).any(|w| w == START_FRAME_BYTES));
            stream.extend_from_slice(&frame);

            let mut sync = FrameSync::new();
            let results = push_all(&mut sync, &stream);
            assert_eq!(results.len(), 1, "garbage length {}", k);
            assert_eq!(results[0].as_ref().unwrap(), &feedback(200));
        }
    }

    #[test]
    fn test_corrupt_frame_then_recovers() {
        let mut corrupt = encode_feedback_frame(&feedback(100));
        corrupt[8] ^= 0x55;
        let good = encode_feedback_frame(&feedback(120));

        let mut stream = corrupt.to_vec();
        stream.extend_from_slice(&good);

        let mut sync = FrameSync::new();
        let results = push_all(&mut sync, &stream);

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(HoverlogError::Checksum { .. })));
        assert_eq!(results[1].as_ref().unwrap(), &feedback(120));
    }

    #[test]
    fn test_truncated_frame_resyncs_on_marker_inside_payload() {
        // A frame cut short is followed by a full one; the lost bytes shift
        // the first payload, which fails its checksum, and the next marker
        // is found once the sync returns to seeking.
        let first = encode_feedback_frame(&feedback(50));
        let second = encode_feedback_frame(&feedback(60));
        let third = encode_feedback_frame(&feedback(70));

        let mut stream = first[..10].to_vec();
        stream.extend_from_slice(&second);
        stream.extend_from_slice(&third);

        let mut sync = FrameSync::new();
        let results = push_all(&mut sync, &stream);

        assert!(results.iter().any(|r| r.is_err()));
        assert_eq!(results.last().unwrap().as_ref().unwrap(), &feedback(70));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = Vec::new();
        for speed in [10, 20, 30] {
            stream.extend_from_slice(&encode_feedback_frame(&feedback(speed)));
        }

        let mut sync = FrameSync::new();
        let decoded: Vec<_> = push_all(&mut sync, &stream)
            .into_iter()
            .map(|r| r.unwrap().cmd2)
            .collect();
        assert_eq!(decoded, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_receiver_publishes_latest_frame() {
        let mut stream = vec![0x00, 0x11, 0xCD];
        stream.extend_from_slice(&encode_feedback_frame(&feedback(300)));
        stream.extend_from_slice(&encode_feedback_frame(&feedback(310)));

        let cache = LatestValue::new();
        let receiver = FeedbackReceiver::new(&stream[..], cache.clone(), DEFAULT_READ_TIMEOUT);
        let stats = receiver.run(StopSignal::new().subscribe()).await.unwrap();

        assert_eq!(stats, FeedbackStats { frames: 2, checksum_errors: 0 });
        assert_eq!(cache.get(), Some(feedback(310)));
    }

    #[tokio::test]
    async fn test_receiver_skips_bad_checksum() {
        let good = encode_feedback_frame(&feedback(300));
        let mut bad = encode_feedback_frame(&feedback(999));
        bad[FEEDBACK_FRAME_LEN - 1] ^= 0x01;

        let mut stream = good.to_vec();
        stream.extend_from_slice(&bad);

        let cache = LatestValue::new();
        let receiver = FeedbackReceiver::new(&stream[..], cache.clone(), DEFAULT_READ_TIMEOUT);
        let stats = receiver.run(StopSignal::new().subscribe()).await.unwrap();

        assert_eq!(stats.checksum_errors, 1);
        assert_eq!(cache.get(), Some(feedback(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_tolerates_read_timeouts() {
        let frame = encode_feedback_frame(&feedback(80));
        let reader = tokio_test::io::Builder::new()
            .read(&frame[..5])
            .wait(Duration::from_millis(350))
            .read(&frame[5..])
            .build();

        let cache = LatestValue::new();
        let receiver = FeedbackReceiver::new(reader, cache.clone(), DEFAULT_READ_TIMEOUT);
        let stats = receiver.run(StopSignal::new().subscribe()).await.unwrap();

        assert_eq!(stats.frames, 1);
        assert_eq!(cache.get(), Some(feedback(80)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_stops_on_signal() {
        let (_board, host) = tokio::io::duplex(64);
        let cache: LatestValue<MotorFeedback> = LatestValue::new();
        let stop = StopSignal::new();

        let receiver = FeedbackReceiver::new(host, cache.clone(), DEFAULT_READ_TIMEOUT);
        let task = tokio::spawn(receiver.run(stop.subscribe()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        stop.raise();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, FeedbackStats::default());
        assert!(!cache.is_present());
    }
}
