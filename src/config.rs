//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; missing values fall back to the
//! settings observed on the bench.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::esc::protocol::{Throttle, DEFAULT_RESERVED, DEFAULT_STATE_BYTE, IDLE_THROTTLE};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Serial bridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Wait after opening while the bridge MCU resets
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

/// Frame header configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_reserved")]
    pub reserved: u16,
}

/// Command cadence and burst configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Interval between command frames
    #[serde(default = "default_cadence_ms")]
    pub cadence_ms: u64,

    #[serde(default = "default_arm_burst_frames")]
    pub arm_burst_frames: u32,

    #[serde(default = "default_disarm_burst_frames")]
    pub disarm_burst_frames: u32,

    #[serde(default = "default_state_byte")]
    pub state_byte: u8,

    /// Throttle sent while armed and idle
    #[serde(default = "default_idle_throttle")]
    pub idle_throttle: Throttle,

    /// Read inbound frames between transmissions
    #[serde(default = "default_listen")]
    pub listen: bool,
}

/// Telemetry output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Print readings as JSON Lines
    #[serde(default)]
    pub jsonl: bool,

    #[serde(default = "default_warn_on_drops")]
    pub warn_on_drops: bool,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_startup_delay_ms() -> u64 { 2000 }

fn default_reserved() -> u16 { DEFAULT_RESERVED }

fn default_cadence_ms() -> u64 { 80 }
fn default_arm_burst_frames() -> u32 { 5 }
fn default_disarm_burst_frames() -> u32 { 5 }
fn default_state_byte() -> u8 { DEFAULT_STATE_BYTE }
fn default_idle_throttle() -> Throttle { IDLE_THROTTLE }
fn default_listen() -> bool { true }

fn default_warn_on_drops() -> bool { true }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            reserved: default_reserved(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cadence_ms: default_cadence_ms(),
            arm_burst_frames: default_arm_burst_frames(),
            disarm_burst_frames: default_disarm_burst_frames(),
            state_byte: default_state_byte(),
            idle_throttle: default_idle_throttle(),
            listen: default_listen(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            jsonl: false,
            warn_on_drops: default_warn_on_drops(),
        }
    }
}

impl SchedulerConfig {
    /// Interval between command frames
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

impl SerialConfig {
    /// Receive timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bridge reset delay after opening the port
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use esc_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600")
            ));
        }

        // Validate timing fields
        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("timeout_ms must be between 1 and 10000")
            ));
        }

        if self.serial.startup_delay_ms > 10000 {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("startup_delay_ms must be at most 10000")
            ));
        }

        // The ESC disarms itself after a short command silence
        if self.scheduler.cadence_ms < 10 || self.scheduler.cadence_ms > 200 {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("cadence_ms must be between 10 and 200")
            ));
        }

        if self.scheduler.arm_burst_frames == 0 || self.scheduler.arm_burst_frames > 100 {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("arm_burst_frames must be between 1 and 100")
            ));
        }

        if self.scheduler.disarm_burst_frames == 0 || self.scheduler.disarm_burst_frames > 100 {
            return Err(crate::error::EscBridgeError::Config(
                toml::de::Error::custom("disarm_burst_frames must be between 1 and 100")
            ));
        }

        Ok(())
    }
}
