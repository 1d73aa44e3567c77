//! Consecutive-failure counter for health samples.

use super::ProbeOutcome;

/// Counts consecutive non-successful probes.
///
/// A single success resets the streak to zero; there is no partial credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureStreak {
    threshold: u32,
    current: u32,
}

impl FailureStreak {
    /// New streak that trips after `threshold` failures in a row (minimum 1).
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            current: 0,
        }
    }

    /// Feeds one outcome; returns `true` once the threshold is reached.
    pub fn observe(&mut self, outcome: &ProbeOutcome) -> bool {
        if outcome.is_success() {
            self.current = 0;
            return false;
        }
        self.current = self.current.saturating_add(1);
        self.current >= self.threshold
    }

    /// Consecutive failures so far.
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Configured threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Forgets the streak.
    pub fn reset(&mut self) {
        self.current = 0;
    }
}
