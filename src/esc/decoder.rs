//! # ESC Frame Decoder
//!
//! Decodes frames, ESC telemetry (0xA0D0) and command feedback (0xA021).

use super::crc::{crc16, legacy_sum16};
use super::protocol::*;
use crate::error::{ProtocolError, Result};

/// Decode a complete frame
///
/// # Arguments
///
/// * `data` - Frame bytes starting at the sync byte. Bytes past the declared
///   length are ignored.
///
/// # Returns
///
/// * `Result<Frame>` - Decoded frame, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Fewer than 10 bytes are given (`ShortFrame`)
/// - Sync byte is incorrect (`BadSync`)
/// - The length field does not fit the data (`LengthMismatch`)
/// - CRC check fails (`ChecksumMismatch`)
pub fn decode_frame(data: &[u8]) -> Result<Frame> {
    if data.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::ShortFrame { len: data.len() }.into());
    }

    if data[0] != SYNC_BYTE {
        return Err(ProtocolError::BadSync(data[0]).into());
    }

    // length counts flags through checksum, so the frame is length + 2 bytes
    // and the checksum sits at offset `length`
    let declared = data[1];
    let length = declared as usize;
    if length < LENGTH_OVERHEAD || length + 2 > data.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            available: data.len(),
        }
        .into());
    }

    let received = u16::from_le_bytes([data[length], data[length + 1]]);
    let computed = crc16(&data[..length]);

    if computed != received {
        return Err(ProtocolError::ChecksumMismatch {
            computed,
            received,
            legacy_sum: legacy_sum16(&data[..length]) == received,
        }
        .into());
    }

    Ok(Frame {
        flags: data[2],
        cmd_id: u16::from_le_bytes([data[3], data[4]]),
        reserved: u16::from_le_bytes([data[5], data[6]]),
        sequence: data[7],
        payload: data[HEADER_LEN..length].to_vec(),
        checksum: received,
    })
}

/// Decode an ESC telemetry payload (0xA0D0)
///
/// # Arguments
///
/// * `sequence` - Sequence byte of the carrying frame
/// * `payload` - Telemetry payload (at least 16 bytes)
///
/// # Returns
///
/// * `Result<TelemetryReading>` - Eight raw words plus scaled channels
///
/// # Examples
///
/// ```
/// use esc_bridge::esc::decoder::decode_a0d0;
///
/// let mut payload = [0u8; 16];
/// payload[0..2].copy_from_slice(&944u16.to_le_bytes());
///
/// let reading = decode_a0d0(7, &payload)?;
/// assert!((reading.voltage - 48.144).abs() < 0.001);
/// # Ok::<(), esc_bridge::error::EscBridgeError>(())
/// ```
pub fn decode_a0d0(sequence: u8, payload: &[u8]) -> Result<TelemetryReading> {
    if payload.len() < A0D0_MIN_PAYLOAD_SIZE {
        return Err(ProtocolError::ShortPayload {
            len: payload.len(),
            needed: A0D0_MIN_PAYLOAD_SIZE,
        }
        .into());
    }

    let mut raw = [0u16; A0D0_VALUE_COUNT];
    for (i, word) in raw.iter_mut().enumerate() {
        *word = u16::from_le_bytes([payload[2 * i], payload[2 * i + 1]]);
    }

    Ok(TelemetryReading {
        sequence,
        raw,
        voltage: raw[0] as f32 * VOLTAGE_SCALE,
        current: raw[1] as f32 * CURRENT_SCALE,
        rpm: raw[2] as u32 * RPM_SCALE,
        temperature: raw[3] as f32 * TEMPERATURE_SCALE,
    })
}

/// Decode the feedback subset of an 0xA021 payload
///
/// Used when monitoring a bus driven by another flight controller. The
/// leading four bytes are reported as a timestamp only when the full
/// 26-byte payload is present.
///
/// # Errors
///
/// Returns `ShortPayload` if the payload ends before the state byte.
pub fn decode_a021_feedback(payload: &[u8]) -> Result<A021Feedback> {
    if payload.len() < A021_FEEDBACK_MIN_PAYLOAD_SIZE {
        return Err(ProtocolError::ShortPayload {
            len: payload.len(),
            needed: A021_FEEDBACK_MIN_PAYLOAD_SIZE,
        }
        .into());
    }

    let timestamp = if payload.len() >= A021_PAYLOAD_SIZE {
        Some(u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]))
    } else {
        None
    };

    let voltage_raw = u16::from_le_bytes([
        payload[A021_VOLTAGE_OFFSET],
        payload[A021_VOLTAGE_OFFSET + 1],
    ]);

    Ok(A021Feedback {
        timestamp,
        voltage: voltage_raw as f32 * VOLTAGE_SCALE,
        voltage_raw,
        armed: payload[A021_ARM_FLAG_OFFSET] == ARM_FLAG_ARMED,
        counter: u16::from_le_bytes([
            payload[A021_COUNTER_OFFSET],
            payload[A021_COUNTER_OFFSET + 1],
        ]),
        state: payload[A021_STATE_OFFSET],
    })
}

impl TelemetryReading {
    /// Decode a telemetry reading from an 0xA0D0 frame
    ///
    /// Returns `None` for frames carrying any other command id.
    pub fn from_frame(frame: &Frame) -> Option<Result<Self>> {
        if frame.cmd_id != CMD_ID_ESC_TELEMETRY {
            return None;
        }
        Some(decode_a0d0(frame.sequence, &frame.payload))
    }
}
