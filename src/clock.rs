//! Discrete tick clock and timeout authorization.
//!
//! The engine measures elapsed time in abstract ticks (block-equivalent
//! units). An external driver advances the clock; nothing in the engine
//! blocks on wall time.

use crate::errors::{EngineResult, TimingError};
use crate::types::Tick;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic tick counter shared by all components.
#[derive(Debug, Default)]
pub struct TickClock {
    tick: AtomicU64,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick.
    pub fn now(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }

    /// Advance the clock by `ticks`.
    pub fn advance(&self, ticks: Tick) {
        self.tick.fetch_add(ticks, Ordering::SeqCst);
    }
}

/// Authorizes timeout-based terminal transitions once a threshold of ticks
/// has elapsed since a request was issued.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    threshold: Tick,
}

impl TimeoutGuard {
    pub fn new(threshold: Tick) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Tick {
        self.threshold
    }

    /// Errors unless at least `threshold` ticks have passed since `since`.
    pub fn check(&self, now: Tick, since: Tick) -> EngineResult<()> {
        let elapsed = now.saturating_sub(since);
        if elapsed < self.threshold {
            return Err(TimingError::TimeoutNotElapsed {
                elapsed,
                required: self.threshold,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TickClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(5);
        clock.advance(3);
        assert_eq!(clock.now(), 8);
    }

    #[test]
    fn test_guard_rejects_early() {
        let guard = TimeoutGuard::new(10);
        let err = guard.check(9, 0).unwrap_err();
        assert!(err.to_string().contains("timeout not elapsed"));
        assert!(guard.check(10, 0).is_ok());
        assert!(guard.check(25, 15).is_ok());
    }

    #[test]
    fn test_guard_saturates_on_clock_skew() {
        let guard = TimeoutGuard::new(10);
        // `since` after `now` must not panic and must count as zero elapsed.
        assert!(guard.check(5, 20).is_err());
    }
}
