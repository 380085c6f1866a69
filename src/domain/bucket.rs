//! Token bucket admission state.
//!
//! A bucket holds up to `capacity` tokens and refills continuously so that a
//! full `period` restores the whole capacity. Refill happens lazily on every
//! call, so an idle bucket costs nothing.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Static limiter definition for one named resource.
///
/// Buckets are always rebuilt from their baseline; the baseline itself is
/// never scaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterBaseline {
    /// Resource name callers pass to `try_consume`
    pub resource: String,
    /// Tokens available per period
    pub capacity: u32,
    /// Refill period in milliseconds
    pub period_ms: u64,
}

impl LimiterBaseline {
    pub fn new(resource: impl Into<String>, capacity: u32, period: Duration) -> Self {
        Self {
            resource: resource.into(),
            capacity,
            period_ms: u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Refill period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Capacity after applying a scaling factor.
    ///
    /// Rounds to the nearest token and never drops below one, so scaling can
    /// throttle a resource but not disable it.
    pub fn scaled_capacity(&self, factor: f64) -> u32 {
        let scaled = (f64::from(self.capacity) * factor).round();
        if scaled < 1.0 {
            1
        } else if scaled >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            scaled as u32
        }
    }

    /// Build a full bucket for this baseline scaled by `factor`.
    pub fn build_bucket(&self, factor: f64, now: Instant) -> TokenBucket {
        TokenBucket::new(self.scaled_capacity(factor), self.period(), now)
    }
}

/// Token bucket state for a single resource.
///
/// # Example
/// ```
/// use dictation_guard::TokenBucket;
/// use std::time::{Duration, Instant};
///
/// let now = Instant::now();
/// let mut bucket = TokenBucket::new(2, Duration::from_secs(10), now);
///
/// assert!(bucket.try_consume(now));
/// assert!(bucket.try_consume(now));
/// assert!(!bucket.try_consume(now));
///
/// // Half a period restores half the capacity
/// assert!(bucket.try_consume(now + Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    period: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, period: Duration, now: Instant) -> Self {
        Self {
            capacity,
            period,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Refill, then take one token if available.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until at least one token is available.
    pub fn time_until_next_token(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 || self.capacity == 0 {
            return Duration::ZERO;
        }
        let missing = 1.0 - self.tokens;
        let per_token = self.period.as_secs_f64() / f64::from(self.capacity);
        Duration::from_secs_f64(missing * per_token)
    }

    /// Tokens currently available (after refill).
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill period.
    pub fn period(&self) -> Duration {
        self.period
    }

    fn refill(&mut self, now: Instant) {
        let capacity = f64::from(self.capacity);
        if self.period.is_zero() {
            self.tokens = capacity;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let added = elapsed.as_secs_f64() / self.period.as_secs_f64() * capacity;
        self.tokens = (self.tokens + added).min(capacity);
        self.last_refill = now;
    }
}
