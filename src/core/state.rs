//! # Node lifecycle state.
//!
//! [`NodePhase`] is the coarse lifecycle position; [`NodeState`] is the full
//! snapshot the state machine publishes after every transition.
//!
//! ## Transition table
//! ```text
//! Stopped  ──start──────────► Starting
//! Starting ──health ok──────► Running
//! Starting ──timeout/exit───► Crashed
//! Running  ──fail streak────► Crashed
//! Running  ──os exit────────► Crashed
//! Starting|Running ──stop───► Stopping ──os exit──► Stopped
//! Starting|Running ──update─► Updating ──os exit──► Stopped(Updated)
//! Crashed  ──restart ok─────► Starting
//! Crashed  ──give up/stop───► Stopped
//! ```
//!
//! ## Rules
//! - `pid` is `Some` only while a process is owned (Starting, Running,
//!   Stopping, Updating) and is cleared once the process is reaped.
//! - A launch whose spawn fails still commits `Starting`, with `pid: None`,
//!   and is immediately followed by `Crashed(SpawnFailed)`. This is the only
//!   `Starting` snapshot without a pid; no other edge enters `Crashed`.
//! - `Stopped` with `stop_reason == Some(GaveUp)` is terminal until an
//!   explicit restart.

use std::fmt;
use std::time::SystemTime;

use crate::process::ExitStatus;

/// Coarse lifecycle position of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodePhase {
    /// No process; accepts `start`.
    Stopped,
    /// Process spawned, waiting for the first healthy probe.
    Starting,
    /// Process healthy and serving.
    Running,
    /// Stop requested; waiting for the process to exit.
    Stopping,
    /// Process died or was declared unresponsive; restart pending.
    Crashed,
    /// Process is being stopped so its binary can be replaced.
    Updating,
}

impl NodePhase {
    /// Lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Stopped => "stopped",
            NodePhase::Starting => "starting",
            NodePhase::Running => "running",
            NodePhase::Stopping => "stopping",
            NodePhase::Crashed => "crashed",
            NodePhase::Updating => "updating",
        }
    }

    /// True while a process identifier is associated with the phase.
    pub fn owns_process(&self) -> bool {
        matches!(
            self,
            NodePhase::Starting | NodePhase::Running | NodePhase::Stopping | NodePhase::Updating
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: NodePhase) -> bool {
        use NodePhase::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running | Crashed | Stopping | Updating)
                | (Running, Crashed | Stopping | Updating)
                | (Stopping, Stopped)
                | (Updating, Stopped)
                | (Crashed, Starting | Stopped)
        )
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the machine entered `Crashed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashReason {
    /// The executable could not be launched.
    SpawnFailed(String),
    /// No healthy probe within the startup window.
    StartupTimeout,
    /// Consecutive failed probes reached the threshold.
    HealthUnresponsive,
    /// The process exited without a stop request.
    UnexpectedExit(ExitStatus),
}

impl CrashReason {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            CrashReason::SpawnFailed(_) => "spawn_failed",
            CrashReason::StartupTimeout => "startup_timeout",
            CrashReason::HealthUnresponsive => "health_unresponsive",
            CrashReason::UnexpectedExit(_) => "unexpected_exit",
        }
    }
}

impl fmt::Display for CrashReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashReason::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            CrashReason::StartupTimeout => f.write_str("no healthy probe within startup window"),
            CrashReason::HealthUnresponsive => f.write_str("health probe unresponsive"),
            CrashReason::UnexpectedExit(status) => write!(f, "unexpected exit: {status}"),
        }
    }
}

/// Why the machine entered `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stop requested by a user or the shutdown coordinator.
    Requested,
    /// Restart ceiling exceeded.
    GaveUp,
    /// Stopped for a binary update.
    Updated,
}

impl StopReason {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::GaveUp => "gave_up",
            StopReason::Updated => "updated",
        }
    }
}

/// Snapshot of the machine, published after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    /// Current phase.
    pub phase: NodePhase,
    /// Pid of the owned process, if any.
    pub pid: Option<u32>,
    /// Exit status of the most recently reaped process.
    pub last_exit: Option<ExitStatus>,
    /// Set while `Crashed`, kept until the next `Starting`.
    pub crash_reason: Option<CrashReason>,
    /// Set while `Stopped`.
    pub stop_reason: Option<StopReason>,
    /// Crash streak as seen by the restart policy.
    pub consecutive_crashes: u32,
    /// The current stop escalated to a force-kill.
    pub force_killed: bool,
    /// Wall-clock time of the last transition.
    pub since: SystemTime,
    /// Number of committed transitions.
    pub seq: u64,
}

impl NodeState {
    /// Initial snapshot: `Stopped`, nothing owned.
    pub fn initial() -> Self {
        Self {
            phase: NodePhase::Stopped,
            pid: None,
            last_exit: None,
            crash_reason: None,
            stop_reason: None,
            consecutive_crashes: 0,
            force_killed: false,
            since: SystemTime::now(),
            seq: 0,
        }
    }

    /// `Stopped(GaveUp)`: no automatic or plain `start` will leave it.
    pub fn is_terminal(&self) -> bool {
        self.phase == NodePhase::Stopped && self.stop_reason == Some(StopReason::GaveUp)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::initial()
    }
}
