//! Controllable clock for deterministic time in tests.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Clock whose time only moves when a test says so.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of refill, break durations, cooldowns and retention. The monotonic
/// instant and the wall clock always move together.
///
/// # Examples
///
/// ```
/// use dictation_guard::infrastructure::mocks::MockClock;
/// use dictation_guard::application::ports::Clock;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// let wall = clock.utc_now();
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// assert_eq!(clock.utc_now(), wall + chrono::Duration::seconds(10));
/// ```
///
/// # Thread Safety
///
/// `MockClock` is thread-safe and can be cloned to share across threads.
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<(Instant, DateTime<Utc>)>>,
}

impl MockClock {
    /// Start at `start`, with the wall clock at the real current time.
    pub fn new(start: Instant) -> Self {
        Self::with_wall_clock(start, Utc::now())
    }

    /// Start with both time sources pinned.
    pub fn with_wall_clock(start: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            current_time: Arc::new(Mutex::new((start, wall))),
        }
    }

    /// Move both time sources forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).expect("duration out of range for chrono");
        let mut time = self.lock();
        time.0 += duration;
        time.1 += step;
    }

    /// Jump the wall clock without moving the instant, e.g. to test
    /// out-of-hours rules.
    pub fn set_wall_clock(&self, wall: DateTime<Utc>) {
        self.lock().1 = wall;
    }

    fn lock(&self) -> MutexGuard<'_, (Instant, DateTime<Utc>)> {
        self.current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.lock().0
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mock_clock() {
        let start = Instant::now();
        let wall = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = MockClock::with_wall_clock(start, wall);

        assert_eq!(clock.now(), start);
        assert_eq!(clock.utc_now(), wall);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + Duration::from_secs(90));
        assert_eq!(clock.utc_now(), wall + chrono::Duration::seconds(90));

        let night = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        clock.set_wall_clock(night);
        assert_eq!(clock.utc_now(), night);
        assert_eq!(clock.now(), start + Duration::from_secs(90));
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::new(Instant::now());
        let clone = clock.clone();
        clone.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), clone.now());
    }
}
