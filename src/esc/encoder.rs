//! # ESC Frame Encoder
//!
//! Encodes frames and builds 0xA021 motor command payloads.

use super::crc::crc16;
use super::protocol::*;
use crate::error::{ProtocolError, Result};

/// Encode a complete frame
///
/// # Arguments
///
/// * `cmd_id` - Command identifier
/// * `reserved` - Reserved word (commands use [`DEFAULT_RESERVED`])
/// * `sequence` - Sequence byte
/// * `payload` - Payload bytes (at most [`MAX_PAYLOAD_SIZE`])
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Frame bytes: header + payload + CRC-16 (LE)
///
/// # Errors
///
/// Returns `PayloadTooLarge` if the payload does not fit the length field.
///
/// # Examples
///
/// ```
/// use esc_bridge::esc::encoder::encode_frame;
///
/// let frame = encode_frame(0xA0D0, 0x0001, 0x2A, &[])?;
/// assert_eq!(frame, vec![0x55, 0x08, 0x00, 0xD0, 0xA0, 0x01, 0x00, 0x2A, 0x06, 0xE5]);
/// # Ok::<(), esc_bridge::error::EscBridgeError>(())
/// ```
pub fn encode_frame(cmd_id: u16, reserved: u16, sequence: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload.len()).into());
    }

    let length = (LENGTH_OVERHEAD + payload.len()) as u8;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.push(SYNC_BYTE);
    frame.push(length);
    frame.push(DEFAULT_FLAGS);
    frame.extend_from_slice(&cmd_id.to_le_bytes());
    frame.extend_from_slice(&reserved.to_le_bytes());
    frame.push(sequence);
    frame.extend_from_slice(payload);

    // CRC covers sync through payload
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());

    Ok(frame)
}

/// Build a 26-byte 0xA021 payload
///
/// Starts from [`A021_OBSERVED_TEMPLATE`] and overwrites the throttle slots,
/// arm flag, counter and state byte. Throttle values are not clamped; safe
/// ranges depend on the ESC.
///
/// # Examples
///
/// ```
/// use esc_bridge::esc::encoder::build_a021;
///
/// let payload = build_a021(true, [7, 0, 944, 0], 0x40, 0);
/// assert_eq!(payload[15], 0x80);
/// assert_eq!(&payload[8..10], &944u16.to_le_bytes());
/// ```
pub fn build_a021(armed: bool, throttle: Throttle, state_byte: u8, counter: u16) -> [u8; A021_PAYLOAD_SIZE] {
    let mut payload = A021_OBSERVED_TEMPLATE;

    for (offset, value) in A021_THROTTLE_OFFSETS.iter().zip(throttle.iter()) {
        payload[*offset..*offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    payload[A021_ARM_FLAG_OFFSET] = if armed { ARM_FLAG_ARMED } else { ARM_FLAG_DISARMED };
    payload[A021_COUNTER_OFFSET..A021_COUNTER_OFFSET + 2].copy_from_slice(&counter.to_le_bytes());
    payload[A021_STATE_OFFSET] = state_byte;

    payload
}

/// Build the 0xA021 payload for a [`Command`]
pub fn build_a021_payload(command: &Command) -> [u8; A021_PAYLOAD_SIZE] {
    build_a021(command.armed, command.throttle, command.state_byte, command.counter)
}

/// Encode a [`Command`] as a complete 0xA021 frame
pub fn encode_command(command: &Command, reserved: u16, sequence: u8) -> Result<Vec<u8>> {
    encode_frame(CMD_ID_ESC_COMMAND, reserved, sequence, &build_a021_payload(command))
}
