//! # Clocks
//!
//! The controller measures time and sleeps through a [`Clock`] so that the approach timeout and
//! hold duration can be exercised without waiting in real time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Monotonic time source.
pub trait Clock {
    /// Seconds elapsed since the clock's epoch.
    fn now_s(&self) -> f64;

    /// Block for the given duration.
    fn sleep(&self, dur: Duration);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wall clock, with the epoch at construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

/// A clock which only moves when slept on or explicitly advanced.
///
/// Shareable between threads, so a simulated listener can advance the same time as the
/// controller.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn sleep(&self, dur: Duration) {
        thread::sleep(dur)
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, dur: Duration) {
        self.nanos.fetch_add(dur.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> f64 {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst)).as_secs_f64()
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_s(&self) -> f64 {
        (**self).now_s()
    }

    fn sleep(&self, dur: Duration) {
        (**self).sleep(dur)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = Arc::new(ManualClock::new());
        assert_eq!(clock.now_s(), 0.0);

        clock.sleep(Duration::from_millis(100));
        clock.advance(Duration::from_millis(1100));
        assert!((clock.now_s() - 1.2).abs() < 1e-9);
    }
}
