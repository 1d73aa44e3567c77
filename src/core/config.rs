//! # Supervisor runtime configuration.
//!
//! Provides [`SupervisorConfig`], the timing knobs and restart policy of one
//! [`NodeSupervisor`](crate::NodeSupervisor).
//!
//! Every timeout is an independent trigger of the state machine:
//!
//! | Field              | Expiry triggers                                  |
//! |--------------------|--------------------------------------------------|
//! | `startup_window`   | `Starting → Crashed(StartupTimeout)`             |
//! | `probe_timeout`    | one `TimedOut` health sample                     |
//! | `grace`            | force-kill escalation while `Stopping`/`Updating`|
//! | `shutdown_timeout` | coordinator issues a force-kill                  |
//! | `kill_timeout`     | coordinator gives up waiting after a force-kill  |
//!
//! ## Sentinel values
//! - `startup_window = 0s` → no startup deadline
//! - `failure_threshold = 0` → clamped to 1

use std::time::Duration;

use crate::policies::RestartPolicy;

/// Configuration for one supervised backend.
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Maximum time in `Starting` without a healthy probe.
    pub startup_window: Duration,
    /// Pause between two health probes.
    pub probe_interval: Duration,
    /// Bound on a single health probe.
    pub probe_timeout: Duration,
    /// Consecutive failed probes that declare a running node unresponsive.
    pub failure_threshold: u32,
    /// Time allowed for a graceful stop before force-killing.
    pub grace: Duration,
    /// Time the shutdown coordinator waits for `Stopped` before force-killing.
    pub shutdown_timeout: Duration,
    /// Time the shutdown coordinator waits after a force-kill.
    pub kill_timeout: Duration,
    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,
    /// Restart policy applied on every crash.
    pub restart: RestartPolicy,
}

impl SupervisorConfig {
    /// Startup deadline as an `Option` (`None` = wait forever).
    #[inline]
    pub fn startup_deadline(&self) -> Option<Duration> {
        if self.startup_window.is_zero() {
            None
        } else {
            Some(self.startup_window)
        }
    }

    /// Failure threshold clamped to a minimum of 1.
    #[inline]
    pub fn failure_threshold_clamped(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `startup_window = 120s` (chain replay can be slow)
    /// - `probe_interval = 5s`, `probe_timeout = 3s`, `failure_threshold = 3`
    /// - `grace = 30s`, `shutdown_timeout = 60s`, `kill_timeout = 10s`
    /// - `bus_capacity = 1024`
    /// - `restart = RestartPolicy::default()`
    fn default() -> Self {
        Self {
            startup_window: Duration::from_secs(120),
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            failure_threshold: 3,
            grace: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
            kill_timeout: Duration::from_secs(10),
            bus_capacity: 1024,
            restart: RestartPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_normalized() {
        let cfg = SupervisorConfig {
            startup_window: Duration::ZERO,
            failure_threshold: 0,
            bus_capacity: 0,
            ..SupervisorConfig::default()
        };
        assert_eq!(cfg.startup_deadline(), None);
        assert_eq!(cfg.failure_threshold_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn defaults_use_three_strikes() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.startup_deadline(), Some(Duration::from_secs(120)));
    }
}
