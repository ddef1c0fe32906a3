//! Approach session bookkeeping

use serde::Serialize;

/// A single approach, from hearing the wake phrase until contact, timeout or cancel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApproachSession {
    /// Time the approach started
    ///
    /// Units: seconds, controller clock
    pub start_time_s: f64,

    /// Time after which the approach is abandoned
    ///
    /// Units: seconds, controller clock
    pub deadline_s: f64,
}

impl ApproachSession {
    pub fn start(now_s: f64, timeout_s: f64) -> Self {
        Self {
            start_time_s: now_s,
            deadline_s: now_s + timeout_s,
        }
    }

    pub fn elapsed_s(&self, now_s: f64) -> f64 {
        now_s - self.start_time_s
    }

    /// True once `now_s` is strictly past the deadline.
    pub fn is_expired(&self, now_s: f64) -> bool {
        now_s > self.deadline_s
    }
}
