//! # ESC Protocol Constants and Types
//!
//! Core protocol definitions for the flight controller / ESC RS-485 bus.
//!
//! ```text
//! Offset  Field     Notes
//! 0       sync      fixed 0x55
//! 1       length    6 + len(payload) + 2
//! 2       flags     0x00 observed
//! 3-4     cmd_id    0xA021 FC->ESC, 0xA0D0 ESC->FC telemetry
//! 5-6     reserved  typically 0x0001
//! 7       sequence  free-running byte counter
//! 8..len  payload
//! len..   checksum  CRC-16 over all preceding bytes
//! ```
//!
//! All multi-byte integers are little-endian.

use serde::Serialize;

/// Frame sync byte (always 0x55)
pub const SYNC_BYTE: u8 = 0x55;

/// Sync + length + flags + cmd_id + reserved + sequence
pub const HEADER_LEN: usize = 8;

/// Checksum size in bytes
pub const CHECKSUM_LEN: usize = 2;

/// Smallest frame on the wire (empty payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Bytes counted by the length field on top of the payload
/// (flags, cmd_id, reserved, sequence, checksum)
pub const LENGTH_OVERHEAD: usize = 6 + CHECKSUM_LEN;

/// Maximum payload representable by the 8-bit length field
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - LENGTH_OVERHEAD;

/// Flags value observed on every frame
pub const DEFAULT_FLAGS: u8 = 0x00;

/// Reserved field value observed on command frames
pub const DEFAULT_RESERVED: u16 = 0x0001;

/// Motor command, flight controller to ESC
pub const CMD_ID_ESC_COMMAND: u16 = 0xA021;

/// ESC telemetry, ESC to flight controller
pub const CMD_ID_ESC_TELEMETRY: u16 = 0xA0D0;

/// 0xA021 payload size
pub const A021_PAYLOAD_SIZE: usize = 26;

/// Number of throttle slots in an 0xA021 payload
pub const NUM_MOTORS: usize = 4;

/// Byte offsets of the four throttle slots in an 0xA021 payload
pub const A021_THROTTLE_OFFSETS: [usize; NUM_MOTORS] = [2, 6, 8, 10];

/// Arm flag offset in an 0xA021 payload
pub const A021_ARM_FLAG_OFFSET: usize = 15;

/// Counter offset (u16 LE) in an 0xA021 payload
pub const A021_COUNTER_OFFSET: usize = 16;

/// State byte offset in an 0xA021 payload
pub const A021_STATE_OFFSET: usize = 22;

/// Offset of the voltage feedback word (shares the third throttle slot)
pub const A021_VOLTAGE_OFFSET: usize = 8;

/// Arm flag value when armed
pub const ARM_FLAG_ARMED: u8 = 0x80;

/// Arm flag value when disarmed
pub const ARM_FLAG_DISARMED: u8 = 0x00;

/// State byte observed during normal operation
pub const DEFAULT_STATE_BYTE: u8 = 0x40;

/// Last-known-good 0xA021 payload bytes.
///
/// Bytes 0-1 (5454 LE) and 4-5 (152 LE) are constant on the bus but not
/// understood. Every field not overwritten by the command builder keeps the
/// value from this template.
pub const A021_OBSERVED_TEMPLATE: [u8; A021_PAYLOAD_SIZE] = [
    0x4E, 0x15, // unknown, 5454
    0x00, 0x00, // throttle slot 1
    0x98, 0x00, // unknown, 152
    0x00, 0x00, // throttle slot 2
    0x00, 0x00, // throttle slot 3
    0x00, 0x00, // throttle slot 4
    0x00, 0x00, 0x00, // zeros
    0x00, // arm flag
    0x00, 0x00, // counter
    0x00, 0x00, 0x00, 0x00, // zeros
    0x00, // state byte
    0x00, 0x00, 0x00, // unknown
];

/// Armed-idle throttle sent during the arm burst
pub const IDLE_THROTTLE: [u16; NUM_MOTORS] = [7, 0, 944, 0];

/// 0xA0D0 payload needed to decode all eight values
pub const A0D0_MIN_PAYLOAD_SIZE: usize = 16;

/// Number of u16 values in an 0xA0D0 payload
pub const A0D0_VALUE_COUNT: usize = 8;

/// 0xA021 payload needed for feedback decoding (through the state byte)
pub const A021_FEEDBACK_MIN_PAYLOAD_SIZE: usize = A021_STATE_OFFSET + 1;

/// Volts per raw unit (calibrated against a 48 V pack)
pub const VOLTAGE_SCALE: f32 = 0.051;

/// Amperes per raw unit (unverified)
pub const CURRENT_SCALE: f32 = 0.01;

/// RPM per raw unit (unverified)
pub const RPM_SCALE: u32 = 10;

/// Degrees Celsius per raw unit (unverified)
pub const TEMPERATURE_SCALE: f32 = 0.1;

/// Per-motor throttle values
pub type Throttle = [u16; NUM_MOTORS];

/// Decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flags byte
    pub flags: u8,

    /// Command identifier
    pub cmd_id: u16,

    /// Reserved word
    pub reserved: u16,

    /// Sequence byte
    pub sequence: u8,

    /// Payload data
    pub payload: Vec<u8>,

    /// Checksum as received
    pub checksum: u16,
}

impl Frame {
    /// Length field value (flags through checksum)
    pub fn length(&self) -> u8 {
        (LENGTH_OVERHEAD + self.payload.len()) as u8
    }

    /// Total size on the wire
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + CHECKSUM_LEN
    }
}

/// Semantic 0xA021 motor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Motors permitted to spin
    pub armed: bool,

    /// Throttle slots 1-4
    pub throttle: Throttle,

    /// Rolling counter, wraps at 65536
    pub counter: u16,

    /// Phase/state indicator
    pub state_byte: u8,
}

impl Command {
    /// Armed command with the observed idle throttle
    pub fn armed_idle(counter: u16, state_byte: u8) -> Self {
        Self {
            armed: true,
            throttle: IDLE_THROTTLE,
            counter,
            state_byte,
        }
    }

    /// Disarmed command with all throttle slots zeroed
    pub fn disarmed(counter: u16, state_byte: u8) -> Self {
        Self {
            armed: false,
            throttle: [0; NUM_MOTORS],
            counter,
            state_byte,
        }
    }
}

/// ESC telemetry (0xA0D0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryReading {
    /// Sequence byte of the originating frame
    pub sequence: u8,

    /// All eight raw words in payload order
    pub raw: [u16; A0D0_VALUE_COUNT],

    /// Bus voltage in volts
    pub voltage: f32,

    /// Current in amperes
    pub current: f32,

    /// Motor speed in RPM
    pub rpm: u32,

    /// Temperature in degrees Celsius
    pub temperature: f32,
}

impl TelemetryReading {
    /// Words 4-7, not yet decoded
    pub fn undecoded(&self) -> &[u16] {
        &self.raw[4..]
    }
}

/// Feedback fields carried in an 0xA021 payload seen on the bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct A021Feedback {
    /// Bytes 0-3 as u32 LE, full 26-byte payloads only
    pub timestamp: Option<u32>,

    /// Voltage in volts
    pub voltage: f32,

    /// Raw voltage word
    pub voltage_raw: u16,

    /// Arm flag set
    pub armed: bool,

    /// Rolling counter
    pub counter: u16,

    /// State byte
    pub state: u8,
}
