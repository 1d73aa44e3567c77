//! # Restart policy for the backend process.
//!
//! [`RestartPolicy`] decides what happens after the backend enters `Crashed`:
//! restart at once, restart after a backoff delay, or give up.
//!
//! The decision is a pure function of a [`CrashHistory`] and the current
//! instant, so the same history always yields the same [`RestartDecision`].
//!
//! ```text
//! crash ──► record_crash(history, at, uptime)
//!             ├─ uptime >= stability_threshold → streak = 0
//!             ├─ drop timestamps older than window
//!             └─ push(at), streak += 1
//!
//!       ──► decide(history, now)
//!             ├─ crashes in window >= max_crashes → GiveUp
//!             ├─ backoff.next(streak - 1) == 0     → RestartNow
//!             └─ otherwise                         → RestartAfterDelay(delay)
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::{Duration, Instant};
//! use nodevisor::{CrashHistory, RestartDecision, RestartPolicy};
//!
//! let policy = RestartPolicy::default();
//! let mut history = CrashHistory::new();
//! let t0 = Instant::now();
//!
//! policy.record_crash(&mut history, t0, None);
//! assert_eq!(
//!     policy.decide(&history, t0),
//!     RestartDecision::RestartAfterDelay(policy.backoff.first),
//! );
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::BackoffPolicy;

/// Outcome of consulting the restart policy after a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart immediately.
    RestartNow,
    /// Restart once the delay has elapsed.
    RestartAfterDelay(Duration),
    /// Stop restarting; requires external intervention.
    GiveUp(String),
}

/// Crash timestamps inside the sliding window plus the current crash streak.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashHistory {
    crashes: VecDeque<Instant>,
    streak: u32,
}

impl CrashHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Crashes since the backend last stayed up past the stability threshold.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Number of recorded crashes no older than `window` at `now`.
    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.crashes
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= window)
            .count()
    }

    /// Forgets everything (explicit restart by the user).
    pub fn clear(&mut self) {
        self.crashes.clear();
        self.streak = 0;
    }
}

/// Sliding-window restart policy with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    /// Length of the crash window.
    pub window: Duration,
    /// Crash count within `window` that makes the policy give up (`0` = never).
    pub max_crashes: u32,
    /// Delay growth within one crash streak.
    pub backoff: BackoffPolicy,
    /// Uptime after which the next crash starts a fresh streak.
    pub stability_threshold: Duration,
}

impl Default for RestartPolicy {
    /// Returns a policy with:
    /// - `window = 5min`, `max_crashes = 5`;
    /// - `backoff = BackoffPolicy::default()` (1s doubling up to 60s);
    /// - `stability_threshold = 60s`.
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5 * 60),
            max_crashes: 5,
            backoff: BackoffPolicy::default(),
            stability_threshold: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Records a crash that happened at `at` after `uptime` in `Running`
    /// (`None` when the backend never reached `Running`).
    pub fn record_crash(&self, history: &mut CrashHistory, at: Instant, uptime: Option<Duration>) {
        if uptime.is_some_and(|up| up >= self.stability_threshold) {
            history.streak = 0;
        }
        while let Some(oldest) = history.crashes.front() {
            if at.saturating_duration_since(*oldest) > self.window {
                history.crashes.pop_front();
            } else {
                break;
            }
        }
        history.crashes.push_back(at);
        history.streak = history.streak.saturating_add(1);
    }

    /// Decides the next step for the most recent crash in `history`.
    pub fn decide(&self, history: &CrashHistory, now: Instant) -> RestartDecision {
        let recent = history.count_within(now, self.window);
        if self.max_crashes > 0 && recent >= self.max_crashes as usize {
            return RestartDecision::GiveUp(format!(
                "{recent} crashes within {}s",
                self.window.as_secs()
            ));
        }

        let delay = self.backoff.next(history.streak.saturating_sub(1));
        if delay.is_zero() {
            RestartDecision::RestartNow
        } else {
            RestartDecision::RestartAfterDelay(delay)
        }
    }
}
