//! # Restart backoff.
//!
//! [`BackoffPolicy`] turns the position of a crash inside its streak into a
//! restart delay: `first × factor^step`, never above `max`. No jitter is
//! applied, so the same crash history always yields the same delay.
//!
//! ```text
//! step:   0     1     2     3     4     5 ...
//! delay:  1s    2s    4s    8s    16s   32s   60s (cap) 60s ...
//! ```
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use nodevisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(250),
//!     max: Duration::from_secs(2),
//!     factor: 2.0,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(250));
//! assert_eq!(backoff.next(2), Duration::from_secs(1));
//! assert_eq!(backoff.next(7), Duration::from_secs(2));
//! ```

use std::time::Duration;

/// Exponential, capped restart delay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart of a crash streak.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth per step; values at or below `1.0` keep the delay at `first`.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 1s, doubling, capped at 60s.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `step`-th restart of a streak (0-based).
    pub fn next(&self, step: u32) -> Duration {
        let first = self.first.min(self.max);
        if step == 0 || first.is_zero() || self.factor.is_nan() || self.factor <= 1.0 {
            return first;
        }

        let grown = first.as_secs_f64() * self.factor.powf(f64::from(step));
        if grown.is_finite() && grown < self.max.as_secs_f64() {
            Duration::from_secs_f64(grown)
        } else {
            self.max
        }
    }
}
