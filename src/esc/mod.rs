//! # ESC Protocol Module
//!
//! Implementation of the RS-485 flight controller / ESC bus protocol.
//!
//! This module handles:
//! - Frame encoding and decoding (sync, length, header, payload, checksum)
//! - CRC-16 checksum calculation (init 0x3692, poly 0x8005, reflected)
//! - 0xA021 command payload building (arm flag, throttle slots, counter)
//! - 0xA0D0 telemetry and 0xA021 feedback decoding
//! - Frame synchronization and recovery on a continuous byte stream

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod framer;
