//! # Serial Communication Module
//!
//! Handles the USART link to the hoverboard mainboard.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control)
//! - Splitting the port into a read half for the feedback receiver and a
//!   write half for the command transmitter
//!
//! Failing to open the port is fatal: no controller can be built without it.

pub mod port_trait;

use tokio::io::{ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use crate::error::{HoverlogError, Result};
use port_trait::TokioSerialPort;

pub use crate::hoverboard::protocol::DEFAULT_BAUD_RATE;

/// Read half of the serial link, owned by the feedback receiver
pub type SerialReader = ReadHalf<SerialStream>;

/// Write half of the serial link, owned by the command transmitter
pub type SerialWriter = TokioSerialPort<WriteHalf<SerialStream>>;

/// Hoverboard Serial Port Handler
///
/// Manages the connection to the hoverboard mainboard via a USB-UART adapter.
pub struct HoverboardSerial {
    /// Serial port handle
    port: SerialStream,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    /// Configured baud rate
    baud_rate: u32,
}

impl std::fmt::Debug for HoverboardSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoverboardSerial")
            .field("device_path", &self.device_path)
            .field("baud_rate", &self.baud_rate)
            .finish_non_exhaustive()
    }
}

impl HoverboardSerial {
    /// Open the hoverboard serial port
    ///
    /// # Arguments
    ///
    /// * `path` - Device path (e.g., "/dev/ttyUSB0" or "COM5")
    /// * `baud_rate` - Baud rate, 115200 for stock firmware
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hoverlog::serial::{HoverboardSerial, DEFAULT_BAUD_RATE};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let serial = HoverboardSerial::open("/dev/ttyUSB0", DEFAULT_BAUD_RATE)?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&[path], baud_rate)
    }

    /// Open the first device that succeeds from a list of candidate paths
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened hoverboard serial port {} at {} baud", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                        baud_rate,
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(HoverlogError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HoverlogError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Split the port into its receiver and transmitter halves
    pub fn into_split(self) -> (SerialReader, SerialWriter) {
        let (reader, writer) = tokio::io::split(self.port);
        (reader, TokioSerialPort::new(writer))
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Get the configured baud rate
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}
