//! Polling schedule: how long to wait between sweeps.
//!
//! The engine never sleeps inside job logic. It asks the schedule for the
//! next delay and sleeps between sweeps, so a push-based driver can replace
//! the loop without touching how jobs move between states.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay policy between polling sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollSchedule {
    /// Same delay every cycle.
    Fixed(Duration),
    /// `initial * 2^cycle`, capped at `max`.
    Backoff { initial: Duration, max: Duration },
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule::Fixed(Duration::from_secs(15))
    }
}

impl PollSchedule {
    /// Delay to wait after sweep number `cycle` (0-based) before the next one.
    pub fn delay(&self, cycle: u32) -> Duration {
        match self {
            PollSchedule::Fixed(d) => *d,
            PollSchedule::Backoff { initial, max } => {
                let factor = 2u32.saturating_pow(cycle.min(31));
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}
