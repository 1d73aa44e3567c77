//! # LogWriter: records supervisor events through `tracing`.
//!
//! Every transition is logged with its timestamp and previous/next phase;
//! crashes carry their reason and exit status, restart decisions their delay.
//!
//! ## Example output (with the `fmt` subscriber)
//! ```text
//! INFO  nodevisor::log: node transition prev=stopped next=starting pid=4242 at_ms=...
//! WARN  nodevisor::log: node crashed prev=running reason="unexpected exit: signal 9" streak=1
//! INFO  nodevisor::log: restart scheduled delay_ms=1000 streak=1
//! ERROR nodevisor::log: node gave up reason="5 crashes within 300s; restart the application"
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "nodevisor::log";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn at_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let at_ms = at_ms(e.at);
        let prev = e.prev.map(|p| p.as_str()).unwrap_or("-");
        let next = e.next.map(|p| p.as_str()).unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let exit = e.exit.map(|s| s.to_string());

        match e.kind {
            EventKind::NodeStarting
            | EventKind::NodeRunning
            | EventKind::NodeStopping
            | EventKind::NodeUpdating
            | EventKind::NodeStopped => {
                info!(target: TARGET, seq = e.seq, at_ms, prev, next, pid = ?e.pid, ?exit, reason, "node transition");
            }
            EventKind::NodeCrashed => {
                warn!(target: TARGET, seq = e.seq, at_ms, prev, next, pid = ?e.pid, ?exit, reason, streak = ?e.attempt, "node crashed");
            }
            EventKind::NodeGaveUp => {
                error!(target: TARGET, seq = e.seq, at_ms, prev, next, reason, "node gave up");
            }
            EventKind::ForceKillEscalated => {
                warn!(target: TARGET, seq = e.seq, at_ms, pid = ?e.pid, grace_ms = ?e.timeout_ms, "graceful stop timed out, force-killing");
            }
            EventKind::RestartScheduled => {
                info!(target: TARGET, seq = e.seq, at_ms, delay_ms = ?e.delay_ms, streak = ?e.attempt, "restart scheduled");
            }
            EventKind::HealthCheckFailed => {
                warn!(target: TARGET, seq = e.seq, at_ms, reason, streak = ?e.attempt, "health check failed");
            }
            EventKind::ShutdownRequested => {
                info!(target: TARGET, seq = e.seq, at_ms, trigger = ?e.source, reason, "shutdown requested");
            }
            EventKind::ShutdownCompleted => {
                info!(target: TARGET, seq = e.seq, at_ms, trigger = ?e.source, "shutdown completed");
            }
            EventKind::ShutdownTimedOut => {
                warn!(target: TARGET, seq = e.seq, at_ms, trigger = ?e.source, timeout_ms = ?e.timeout_ms, "shutdown timed out");
            }
            EventKind::BackendDetached => {
                info!(target: TARGET, seq = e.seq, at_ms, hook = ?e.source, "backend left running on exit");
            }
            EventKind::LowDiskSpace => {
                warn!(target: TARGET, seq = e.seq, at_ms, reason, "low disk space");
            }
            EventKind::DiskSpaceRecovered => {
                info!(target: TARGET, seq = e.seq, at_ms, reason, "disk space recovered");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: TARGET, seq = e.seq, subscriber = ?e.source, dropped = ?e.dropped, "subscriber dropped events");
            }
            EventKind::SubscriberPanicked => {
                error!(target: TARGET, seq = e.seq, subscriber = ?e.source, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
