//! # Serial Communication Module
//!
//! Handles communication with the USB to RS-485 bridge.
//!
//! This module handles:
//! - Opening the bridge serial port (default 115200 8N1)
//! - Waiting for the bridge MCU to reset after the port opens
//! - Wrapping outbound frames in `TX:` request lines
//! - Turning `[RX<-485]` and `FRAME,` lines back into bus bytes
//! - Logging bridge `STATUS,` and `ERROR,` lines

pub mod line;
pub mod port_trait;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{EscBridgeError, Result};
use line::{format_tx_line, parse_line, BridgeLine};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Bytes requested per port read
const READ_CHUNK_SIZE: usize = 256;

/// Longest line kept while waiting for its terminator
const MAX_LINE_LEN: usize = 2048;

/// Moves raw frames on and off the RS-485 bus
///
/// Implementations must be cancel safe in [`receive`](FrameTransport::receive):
/// the scheduler bounds every receive with a deadline and drops the future
/// when it expires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameTransport: Send {
    /// Transmit one complete frame
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Next chunk of bytes received from the bus
    ///
    /// Stays pending while the bus is idle.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Flush and release the link
    async fn close(&mut self) -> Result<()>;
}

/// Line counters for the bridge link
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    pub lines_sent: u64,
    pub rx_lines: u64,
    pub status_lines: u64,
    pub error_lines: u64,
    pub other_lines: u64,
    pub oversized_lines: u64,
}

/// Frame transport over the ASCII bridge protocol
pub struct Rs485Bridge<P: SerialPortIO> {
    /// Serial port handle
    port: P,
    /// Device path (e.g., /dev/ttyACM0)
    device_path: String,
    /// Partial line received so far
    line_buf: BytesMut,
    stats: BridgeStats,
}

impl<P: SerialPortIO> std::fmt::Debug for Rs485Bridge<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rs485Bridge")
            .field("device_path", &self.device_path)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Rs485Bridge<TokioSerialPort> {
    /// Open the bridge and wait for it to come out of reset
    ///
    /// Opening the port toggles DTR on most USB bridges, which resets the
    /// MCU; frames sent during `startup_delay` are lost.
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if the device does not exist, or
    /// `Serial` if it cannot be configured.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use esc_bridge::config::SerialConfig;
    /// use esc_bridge::serial::Rs485Bridge;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let bridge = Rs485Bridge::open(&SerialConfig::default()).await?;
    ///     println!("Connected to: {}", bridge.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub async fn open(config: &SerialConfig) -> Result<Self> {
        debug!("Opening serial port: {} at {} baud", config.port, config.baud_rate);

        let port = Self::open_port(config)?;
        info!("Opened RS-485 bridge at {}", config.port);

        if !config.startup_delay().is_zero() {
            debug!("Waiting {:?} for bridge reset", config.startup_delay());
            tokio::time::sleep(config.startup_delay()).await;
        }

        Ok(Rs485Bridge::new(TokioSerialPort::new(port), &config.port))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(config: &SerialConfig) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(config.timeout())
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => EscBridgeError::SerialPortNotFound(
                    format!("{}: {}", config.port, e)
                ),
                _ => EscBridgeError::Serial(format!("Failed to open {}: {}", config.port, e)),
            })
    }
}

impl<P: SerialPortIO> Rs485Bridge<P> {
    /// Wrap an already opened port
    pub fn new(port: P, device_path: &str) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            line_buf: BytesMut::with_capacity(MAX_LINE_LEN),
            stats: BridgeStats::default(),
        }
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Consume complete lines from the buffer, returning any bus bytes
    fn take_lines(&mut self) -> Vec<u8> {
        let mut received = Vec::new();

        while let Some(pos) = self.line_buf.iter().position(|b| *b == b'\n') {
            let raw = self.line_buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw);

            match parse_line(&text) {
                BridgeLine::Rx(bytes) => {
                    self.stats.rx_lines += 1;
                    received.extend(bytes);
                }
                BridgeLine::Captured { timestamp_ms, bytes } => {
                    self.stats.rx_lines += 1;
                    debug!("Bus capture at {} ms ({} bytes)", timestamp_ms, bytes.len());
                    received.extend(bytes);
                }
                BridgeLine::Status(status) => {
                    self.stats.status_lines += 1;
                    info!("Bridge status: {}", status);
                }
                BridgeLine::Error(error) => {
                    self.stats.error_lines += 1;
                    warn!("Bridge error: {}", error);
                }
                BridgeLine::Other(other) => {
                    if !other.is_empty() {
                        self.stats.other_lines += 1;
                        debug!("Bridge: {}", other);
                    }
                }
            }
        }

        // A line this long is noise, not protocol
        if self.line_buf.len() > MAX_LINE_LEN {
            self.stats.oversized_lines += 1;
            warn!("Discarding {} bytes without line terminator", self.line_buf.len());
            self.line_buf.clear();
        }

        received
    }
}

#[async_trait]
impl<P: SerialPortIO> FrameTransport for Rs485Bridge<P> {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let line = format_tx_line(frame);

        self.port.write_all(line.as_bytes()).await
            .map_err(|e| EscBridgeError::Serial(format!("Failed to write frame: {}", e)))?;

        self.port.flush().await
            .map_err(|e| EscBridgeError::Serial(format!("Failed to flush serial port: {}", e)))?;

        self.stats.lines_sent += 1;
        debug!("Sent frame ({} bytes)", frame.len());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            let received = self.take_lines();
            if !received.is_empty() {
                return Ok(received);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.port.read(&mut chunk).await
                .map_err(|e| EscBridgeError::Serial(format!("Failed to read serial port: {}", e)))?;

            if n == 0 {
                return Err(EscBridgeError::Serial(format!("{} closed", self.device_path)));
            }

            self.line_buf.extend_from_slice(&chunk[..n]);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.port.flush().await
            .map_err(|e| EscBridgeError::Serial(format!("Failed to flush serial port: {}", e)))?;
        info!("Closed RS-485 bridge at {}", self.device_path);
        Ok(())
    }
}
