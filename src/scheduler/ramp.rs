//! Single-motor throttle ramp for bench testing
//!
//! One throttle slot walks from `min` up to `max` and back down in fixed
//! steps while the other slots stay at their idle values. The slot then
//! returns to its own idle value for a short settle period.

use tokio::time::Duration;

use crate::error::{EscBridgeError, Result};
use crate::esc::protocol::{Throttle, NUM_MOTORS};

/// Time spent back at idle after the ramp
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// Parameters of a single-motor ramp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampPlan {
    /// Throttle slot index (0-based)
    slot: usize,
    min: u16,
    max: u16,
    step: u16,
    /// Time held at each step
    pub step_duration: Duration,
    /// Time held at idle once the ramp is done
    pub settle: Duration,
}

impl RampPlan {
    /// Plan a ramp on `motor` (numbered 1 to 4, as printed on the ESC)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown motor, a zero step or `min > max`.
    pub fn new(motor: usize, min: u16, max: u16, step: u16, step_duration: Duration) -> Result<Self> {
        if motor == 0 || motor > NUM_MOTORS {
            return Err(EscBridgeError::InvalidArgument(format!(
                "motor must be between 1 and {}, got {}",
                NUM_MOTORS, motor
            )));
        }
        if step == 0 {
            return Err(EscBridgeError::InvalidArgument("ramp step must be non-zero".to_string()));
        }
        if min > max {
            return Err(EscBridgeError::InvalidArgument(format!(
                "ramp minimum {} is above maximum {}",
                min, max
            )));
        }

        Ok(Self {
            slot: motor - 1,
            min,
            max,
            step,
            step_duration,
            settle: DEFAULT_SETTLE,
        })
    }

    /// Motor number (1-based)
    pub fn motor(&self) -> usize {
        self.slot + 1
    }

    /// Slot values in order: `min` up to `max`, then `max` back down to `min`
    pub fn steps(&self) -> Vec<u16> {
        let step = usize::from(self.step);
        let up = (self.min..=self.max).step_by(step);
        let down = (self.min..=self.max).rev().step_by(step);
        up.chain(down).collect()
    }

    /// Full throttle commands with their hold times, starting from `idle`
    ///
    /// The last entry puts the ramped slot back to its idle value for
    /// [`settle`](Self::settle).
    pub fn schedule(&self, idle: Throttle) -> Vec<(Throttle, Duration)> {
        let mut throttle = idle;
        let mut schedule: Vec<(Throttle, Duration)> = self
            .steps()
            .into_iter()
            .map(|value| {
                throttle[self.slot] = value;
                (throttle, self.step_duration)
            })
            .collect();

        schedule.push((idle, self.settle));
        schedule
    }
}
