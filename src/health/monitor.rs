//! # Recurring health probing.
//!
//! [`HealthMonitor::spawn`] starts a probing task that runs the [`Probe`]
//! every `interval`, bounds each call by `probe_timeout`, and sends one
//! [`HealthSample`] per probe to the state machine.
//!
//! ```text
//! interval tick ──► timeout(probe_timeout, probe.probe())
//!                        ├─ Ok(outcome) ──► HealthSample { outcome }
//!                        └─ Elapsed     ──► HealthSample { TimedOut }
//!                                              │
//!                                              ▼
//!                                   [mpsc] ──► HealthMonitor::next()
//! ```
//!
//! ## Rules
//! - The first probe runs immediately after spawn.
//! - A probe that outlives its timeout is dropped, never awaited further.
//! - Dropping the monitor (or cancelling the parent token) stops probing at
//!   once, even mid-probe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{Probe, ProbeOutcome};

/// Point-in-time observation of the backend's responsiveness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSample {
    /// When the probe finished.
    pub at: Instant,
    /// What it observed.
    pub outcome: ProbeOutcome,
}

/// Receiving end of a probing task.
#[derive(Debug)]
pub struct HealthMonitor {
    samples: mpsc::Receiver<HealthSample>,
    token: CancellationToken,
}

impl HealthMonitor {
    /// Spawns the probing task as a child of `parent`.
    pub fn spawn(
        probe: Arc<dyn Probe>,
        interval: Duration,
        probe_timeout: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run(probe, interval, probe_timeout, token.clone(), tx));
        Self { samples: rx, token }
    }

    /// Next sample; `None` once probing has stopped.
    pub async fn next(&mut self) -> Option<HealthSample> {
        self.samples.recv().await
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    probe: Arc<dyn Probe>,
    interval: Duration,
    probe_timeout: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<HealthSample>,
) {
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            res = time::timeout(probe_timeout, probe.probe()) => res.unwrap_or(ProbeOutcome::TimedOut),
        };
        trace!(probe = probe.name(), %outcome, "health probe finished");

        let sample = HealthSample {
            at: Instant::now(),
            outcome,
        };
        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(sample) => if sent.is_err() { break },
        }
    }
}
