//! # Error Types
//!
//! Custom error types for ESC Bridge using `thiserror`.
//!
//! Decode-side failures ([`ProtocolError`]) are recoverable: the stream framer
//! resynchronizes and the session continues. Encode-side failures are caller
//! bugs, and transport failures end the session after the disarm burst.

use thiserror::Error;

use crate::esc::protocol::{MAX_PAYLOAD_SIZE, MIN_FRAME_LEN};
use crate::scheduler::ArmState;

/// Wire-level protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First byte of a candidate frame is not the sync byte
    #[error("invalid sync byte: 0x{0:02X}")]
    BadSync(u8),

    /// Fewer bytes than the smallest possible frame
    #[error("frame too short: {len} bytes (minimum {min})", min = MIN_FRAME_LEN)]
    ShortFrame { len: usize },

    /// Declared length does not fit the available bytes
    #[error("declared length {declared} does not fit in {available} bytes")]
    LengthMismatch { declared: u8, available: usize },

    /// Recomputed CRC disagrees with the received checksum.
    ///
    /// `legacy_sum` is set when the received value matches the additive-sum
    /// checksum instead, which points at stale or incompatible firmware.
    #[error("checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}{}",
        legacy_note(.legacy_sum))]
    ChecksumMismatch {
        computed: u16,
        received: u16,
        legacy_sum: bool,
    },

    /// Payload too short for the requested decoder
    #[error("payload too short: {len} bytes, need at least {needed}")]
    ShortPayload { len: usize, needed: usize },

    /// Payload cannot be represented by the 8-bit length field
    #[error("payload too large: {0} bytes (maximum {max})", max = MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

fn legacy_note(legacy_sum: &bool) -> &'static str {
    if *legacy_sum {
        " (matches legacy additive sum)"
    } else {
        ""
    }
}

/// Main error type for ESC Bridge
#[derive(Debug, Error)]
pub enum EscBridgeError {
    /// Frame and payload codec errors
    #[error("ESC protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial port could not be opened
    #[error("Serial port not found: {0}")]
    SerialPortNotFound(String),

    /// Operation not permitted in the current arm state
    #[error("cannot {operation} while {state}")]
    InvalidState {
        state: ArmState,
        operation: &'static str,
    },

    /// Rejected operation parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Coarse classification of [`EscBridgeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadSync,
    ShortFrame,
    LengthMismatch,
    ChecksumMismatch,
    ShortPayload,
    PayloadTooLarge,
    TransportIo,
    Config,
    InvalidState,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::BadSync(_) => ErrorKind::BadSync,
            ProtocolError::ShortFrame { .. } => ErrorKind::ShortFrame,
            ProtocolError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            ProtocolError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            ProtocolError::ShortPayload { .. } => ErrorKind::ShortPayload,
            ProtocolError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
        }
    }
}

impl EscBridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscBridgeError::Protocol(e) => e.kind(),
            EscBridgeError::Config(_) | EscBridgeError::InvalidArgument(_) => ErrorKind::Config,
            EscBridgeError::Io(_)
            | EscBridgeError::Serial(_)
            | EscBridgeError::SerialPortNotFound(_) => ErrorKind::TransportIo,
            EscBridgeError::InvalidState { .. } => ErrorKind::InvalidState,
        }
    }

    /// Whether a session may continue after this error.
    ///
    /// Only decode-side errors are recoverable; the framer resynchronizes.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BadSync
                | ErrorKind::ShortFrame
                | ErrorKind::LengthMismatch
                | ErrorKind::ChecksumMismatch
                | ErrorKind::ShortPayload
        )
    }
}

/// Result type alias for ESC Bridge
pub type Result<T> = std::result::Result<T, EscBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_recoverable() {
        let errors: Vec<EscBridgeError> = vec![
            ProtocolError::BadSync(0x00).into(),
            ProtocolError::ShortFrame { len: 3 }.into(),
            ProtocolError::LengthMismatch { declared: 40, available: 12 }.into(),
            ProtocolError::ChecksumMismatch { computed: 1, received: 2, legacy_sum: false }.into(),
            ProtocolError::ShortPayload { len: 4, needed: 16 }.into(),
        ];

        for err in errors {
            assert!(err.is_recoverable(), "{:?} should be recoverable", err);
        }
    }

    #[test]
    fn test_fatal_errors_are_not_recoverable() {
        let too_large: EscBridgeError = ProtocolError::PayloadTooLarge(300).into();
        assert_eq!(too_large.kind(), ErrorKind::PayloadTooLarge);
        assert!(!too_large.is_recoverable());

        let io: EscBridgeError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(io.kind(), ErrorKind::TransportIo);
        assert!(!io.is_recoverable());

        let serial = EscBridgeError::Serial("unplugged".to_string());
        assert_eq!(serial.kind(), ErrorKind::TransportIo);
    }

    #[test]
    fn test_checksum_message_flags_legacy_sum() {
        let err = ProtocolError::ChecksumMismatch {
            computed: 0x9988,
            received: 0x01F8,
            legacy_sum: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x9988"));
        assert!(msg.contains("0x01F8"));
        assert!(msg.contains("legacy additive sum"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = EscBridgeError::InvalidState {
            state: ArmState::Disarmed,
            operation: "set throttle",
        };
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.to_string(), "cannot set throttle while disarmed");
    }
}
