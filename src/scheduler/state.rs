//! Arm state and link counters

use std::fmt;
use tracing::error;

/// Arm state of a scheduler session
///
/// ```text
///            arm()               burst done
/// Disarmed ---------> Arming ---------------> Armed
///    ^                                          |
///    |   burst done                  disarm()   |
///    +------------- Disarming <-----------------+
/// ```
///
/// `Arming` and `Disarming` are only observable while a burst is in flight,
/// or after its future was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmState {
    Disarmed,
    Arming,
    Armed,
    Disarming,
}

impl ArmState {
    /// Whether frames sent in this state carry the arm flag
    pub fn sends_armed(self) -> bool {
        matches!(self, ArmState::Arming | ArmState::Armed)
    }
}

impl fmt::Display for ArmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArmState::Disarmed => "disarmed",
            ArmState::Arming => "arming",
            ArmState::Armed => "armed",
            ArmState::Disarming => "disarming",
        };
        f.write_str(name)
    }
}

/// Holds the session's [`ArmState`] and logs if it is dropped outside
/// `Disarmed`
///
/// No frame can be sent from `drop`, so this only makes a skipped
/// [`shutdown`](super::CommandScheduler::shutdown) visible.
#[derive(Debug)]
pub(crate) struct TrackedState(ArmState);

impl TrackedState {
    pub(crate) fn new() -> Self {
        Self(ArmState::Disarmed)
    }

    pub(crate) fn get(&self) -> ArmState {
        self.0
    }

    pub(crate) fn set(&mut self, state: ArmState) {
        self.0 = state;
    }
}

impl Drop for TrackedState {
    fn drop(&mut self) {
        if self.0 != ArmState::Disarmed {
            error!("Scheduler dropped while {} without shutdown, no disarm burst sent", self.0);
        }
    }
}

/// Counters for one scheduler session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    /// Command frames handed to the transport
    pub frames_sent: u64,
    /// Sends that failed, including best-effort disarm frames
    pub send_errors: u64,
    /// 0xA0D0 frames decoded
    pub telemetry_frames: u64,
    /// Telemetry frames missing from the sequence
    pub telemetry_dropped: u64,
    /// 0xA021 frames seen on the bus
    pub command_frames_seen: u64,
    /// Frames with other command ids
    pub unknown_frames: u64,
    /// Valid frames whose payload failed to decode
    pub payload_errors: u64,
}
