//! # Stream Framer
//!
//! Recovers frame boundaries from a continuous, possibly corrupted byte
//! stream. The only delimiter is the sync byte, which can also appear inside
//! payloads, so every candidate is validated by [`decode_frame`].
//!
//! A candidate that fails to decode is a resynchronization event: the framer
//! moves exactly one byte past the failed sync position and scans again. It
//! never skips the presumed frame length, because the length byte itself is
//! a likely casualty of corruption.
//!
//! ## Usage
//!
//! ```
//! use esc_bridge::esc::encoder::encode_frame;
//! use esc_bridge::esc::framer::{FramerEvent, StreamFramer};
//!
//! let frame = encode_frame(0xA0D0, 1, 0, &[0u8; 16])?;
//!
//! let mut framer = StreamFramer::new();
//! framer.push(&[0x00, 0x13, 0x37]);
//! framer.push(&frame);
//!
//! let frames: Vec<_> = framer
//!     .drain()
//!     .filter_map(|event| match event {
//!         FramerEvent::Frame(frame) => Some(frame),
//!         FramerEvent::Resync { .. } => None,
//!     })
//!     .collect();
//! assert_eq!(frames.len(), 1);
//! # Ok::<(), esc_bridge::error::EscBridgeError>(())
//! ```

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use super::decoder::decode_frame;
use super::protocol::{Frame, SYNC_BYTE};
use crate::error::{EscBridgeError, ProtocolError};

/// Initial buffer capacity (a few maximum-size frames)
const INITIAL_CAPACITY: usize = 1024;

/// Output of the framer
#[derive(Debug, Clone, PartialEq)]
pub enum FramerEvent {
    /// A frame that passed every check
    Frame(Frame),

    /// A candidate starting at a sync byte failed to decode
    Resync {
        /// Stream offset of the rejected sync byte
        offset: u64,
        /// Why the candidate was rejected
        error: ProtocolError,
    },
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Frames decoded
    pub frames: u64,
    /// Candidates rejected
    pub resyncs: u64,
    /// Rejections caused by a CRC mismatch
    pub checksum_mismatches: u64,
    /// CRC mismatches whose checksum equals the legacy additive sum
    pub legacy_checksums: u64,
    /// Bytes discarded while hunting for a sync byte
    pub skipped_bytes: u64,
}

/// Incremental frame synchronizer
#[derive(Debug)]
pub struct StreamFramer {
    buf: BytesMut,
    /// Stream offset of `buf[0]`
    offset: u64,
    /// No more bytes will arrive
    finished: bool,
    stats: FramerStats,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    /// Create a framer for a live stream
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            offset: 0,
            finished: false,
            stats: FramerStats::default(),
        }
    }

    /// Create a framer over a complete capture
    ///
    /// The framer is already finished: a truncated candidate at the end is
    /// skipped instead of waited for.
    pub fn from_capture(data: &[u8]) -> Self {
        let mut framer = Self::new();
        framer.push(data);
        framer.finish();
        framer
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mark the end of input
    ///
    /// Subsequent scans skip incomplete candidates rather than wait for them.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Counters since creation
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Produce the next event, or `None` when more input is needed
    pub fn next_event(&mut self) -> Option<FramerEvent> {
        // Hunt for the next sync byte
        match self.buf.iter().position(|&b| b == SYNC_BYTE) {
            Some(garbage) => self.discard(garbage),
            None => {
                self.discard(self.buf.len());
                return None;
            }
        }

        if self.buf.len() < 2 {
            if self.finished {
                // Lone trailing sync byte
                let error = ProtocolError::ShortFrame { len: self.buf.len() };
                return Some(self.resync(error));
            }
            return None;
        }

        let declared = self.buf[1];
        let frame_len = declared as usize + 2;

        if self.buf.len() < frame_len {
            if self.finished {
                let error = ProtocolError::LengthMismatch {
                    declared,
                    available: self.buf.len(),
                };
                return Some(self.resync(error));
            }
            return None;
        }

        match decode_frame(&self.buf[..frame_len]) {
            Ok(frame) => {
                self.buf.advance(frame_len);
                self.offset += frame_len as u64;
                self.stats.frames += 1;
                debug!(
                    "Frame cmd=0x{:04X} seq={} ({} bytes)",
                    frame.cmd_id, frame.sequence, frame_len
                );
                Some(FramerEvent::Frame(frame))
            }
            Err(EscBridgeError::Protocol(error)) => Some(self.resync(error)),
            Err(other) => {
                // decode_frame only yields protocol errors
                warn!("Unexpected decode error: {}", other);
                Some(self.resync(ProtocolError::ShortFrame { len: frame_len }))
            }
        }
    }

    /// Iterate over every event available from the buffered bytes
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { framer: self }
    }

    /// Drop `count` leading bytes that cannot start a frame
    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.buf.advance(count);
        self.offset += count as u64;
        self.stats.skipped_bytes += count as u64;
    }

    /// Reject the candidate at `buf[0]` and step one byte past its sync
    fn resync(&mut self, error: ProtocolError) -> FramerEvent {
        let offset = self.offset;

        self.stats.resyncs += 1;
        if let ProtocolError::ChecksumMismatch { legacy_sum, .. } = error {
            self.stats.checksum_mismatches += 1;
            if legacy_sum {
                self.stats.legacy_checksums += 1;
                warn!("Checksum at offset {} matches the legacy additive sum; incompatible firmware?", offset);
            }
        }
        debug!("Resync at offset {}: {}", offset, error);

        self.buf.advance(1);
        self.offset += 1;

        FramerEvent::Resync { offset, error }
    }
}

/// Iterator returned by [`StreamFramer::drain`]
///
/// Ends when the framer needs more input; push more bytes and drain again.
pub struct Drain<'a> {
    framer: &'a mut StreamFramer,
}

impl Iterator for Drain<'_> {
    type Item = FramerEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_event()
    }
}

/// Decode every frame in a complete capture
///
/// # Returns
///
/// * `(Vec<Frame>, FramerStats)` - Frames in stream order and the counters
pub fn decode_capture(data: &[u8]) -> (Vec<Frame>, FramerStats) {
    let mut framer = StreamFramer::from_capture(data);
    let frames = framer
        .drain()
        .filter_map(|event| match event {
            FramerEvent::Frame(frame) => Some(frame),
            FramerEvent::Resync { .. } => None,
        })
        .collect();
    (frames, framer.stats())
}
