//! Sequence gap detection for ESC telemetry

/// Counts telemetry frames missed between consecutive sequence bytes
///
/// The sequence byte wraps at 256, so a gap larger than 255 frames is
/// indistinguishable from a short one. A repeated sequence byte is counted
/// as a duplicate, not as a 255-frame gap; ESCs that never advance the
/// sequence therefore report no drops.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u8>,
    received: u64,
    dropped: u64,
    duplicates: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received sequence byte
    ///
    /// # Returns
    ///
    /// * `u8` - Frames missed since the previous one (0 for the first frame
    ///   and for duplicates)
    pub fn observe(&mut self, sequence: u8) -> u8 {
        self.received += 1;

        let missed = match self.last {
            None => 0,
            Some(last) if last == sequence => {
                self.duplicates += 1;
                0
            }
            Some(last) => sequence.wrapping_sub(last).wrapping_sub(1),
        };

        self.last = Some(sequence);
        self.dropped += u64::from(missed);
        missed
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Last sequence byte seen
    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
