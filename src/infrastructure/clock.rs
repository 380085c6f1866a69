//! Production clock.
//!
//! Components read two time sources through the [`Clock`] port: a monotonic
//! `Instant` for token refill, breaker timing and operation durations, and
//! the UTC wall clock for event timestamps, alert windows and error groups.
//! Tests substitute `MockClock` from `infrastructure::mocks`.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Reads the operating system's monotonic and wall clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_both_sources_move_forward() {
        let clock = SystemClock::new();
        let (instant, wall) = (clock.now(), clock.utc_now());
        std::thread::sleep(Duration::from_millis(5));

        assert!(clock.now() > instant);
        assert!(clock.utc_now() >= wall);
    }
}
