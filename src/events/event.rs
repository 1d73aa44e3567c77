//! # Events emitted by the node supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Transition events**: one per committed [`NodePhase`] change
//! - **Decision events**: restart scheduling, force-kill escalation, probe failures
//! - **Shutdown events**: coordinator progress and collaborator triggers
//! - **Subscriber events**: overflow and panics in the fan-out layer
//!
//! The [`Event`] struct carries additional metadata such as timestamps,
//! previous/next phase, pid, exit status, reasons and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Transition events are published by the single state-machine task, so their
//! `seq` order is commit order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use nodevisor::{Event, EventKind, NodePhase};
//!
//! let ev = Event::new(EventKind::NodeCrashed)
//!     .with_transition(NodePhase::Running, NodePhase::Crashed)
//!     .with_pid(4242)
//!     .with_reason("health probe unresponsive");
//!
//! assert!(ev.kind.is_transition());
//! assert_eq!(ev.next, Some(NodePhase::Crashed));
//! assert_eq!(ev.reason.as_deref(), Some("health probe unresponsive"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::core::NodePhase;
use crate::process::ExitStatus;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of supervisor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Transitions ===
    /// Entered `Starting`.
    ///
    /// Sets:
    /// - `prev`, `next`
    /// - `pid`: spawned process (absent when the spawn failed)
    /// - `attempt`: current crash streak + 1
    NodeStarting,

    /// Entered `Running` (first healthy probe).
    ///
    /// Sets: `prev`, `next`, `pid`
    NodeRunning,

    /// Entered `Stopping` (graceful signal sent).
    ///
    /// Sets: `prev`, `next`, `pid`, `timeout_ms` (grace period)
    NodeStopping,

    /// Entered `Updating`.
    ///
    /// Sets: `prev`, `next`, `pid`, `timeout_ms` (grace period)
    NodeUpdating,

    /// Entered `Crashed`.
    ///
    /// Sets:
    /// - `prev`, `next`
    /// - `reason`: crash reason
    /// - `exit`: exit status, if the process was reaped
    /// - `attempt`: crash streak
    NodeCrashed,

    /// Entered `Stopped` (requested or after an update).
    ///
    /// Sets: `prev`, `next`, `exit`, `reason` (stop reason label)
    NodeStopped,

    /// Entered `Stopped(GaveUp)`; terminal until an explicit restart.
    ///
    /// Sets: `prev`, `next`, `reason` (remediation text)
    NodeGaveUp,

    // === Decisions ===
    /// Graceful stop exceeded the grace period; force-kill sent.
    ///
    /// Sets: `pid`, `timeout_ms` (grace period)
    ForceKillEscalated,

    /// Restart scheduled after a crash.
    ///
    /// Sets: `delay_ms`, `attempt` (crash streak)
    RestartScheduled,

    /// A health probe did not succeed.
    ///
    /// Sets: `reason`, `attempt` (current failure streak)
    HealthCheckFailed,

    // === Shutdown ===
    /// The shutdown coordinator accepted a trigger.
    ///
    /// Sets: `source` (trigger label), `reason`
    ShutdownRequested,

    /// The backend reached `Stopped` and the exit was released.
    ///
    /// Sets: `source`
    ShutdownCompleted,

    /// The backend did not reach `Stopped` within the shutdown timeout.
    ///
    /// Sets: `source`, `timeout_ms`
    ShutdownTimedOut,

    /// A pre-shutdown hook asked to leave the backend running.
    ///
    /// Sets: `source` (hook name)
    BackendDetached,

    /// Free space fell below the configured minimum.
    ///
    /// Sets: `reason` (available/required bytes)
    LowDiskSpace,

    /// Free space recovered above the restart threshold.
    ///
    /// Sets: `reason`
    DiskSpaceRecovered,

    // === Subscribers ===
    /// Events were dropped for one subscriber (queue full or bus lag).
    ///
    /// Sets: `source` (subscriber name), `dropped`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `source` (subscriber name), `reason` (panic message)
    SubscriberPanicked,
}

impl EventKind {
    /// True for the kinds published on a committed phase change.
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            EventKind::NodeStarting
                | EventKind::NodeRunning
                | EventKind::NodeStopping
                | EventKind::NodeUpdating
                | EventKind::NodeCrashed
                | EventKind::NodeStopped
                | EventKind::NodeGaveUp
        )
    }
}

/// Supervisor event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Phase before the transition.
    pub prev: Option<NodePhase>,
    /// Phase after the transition.
    pub next: Option<NodePhase>,
    /// Backend process identifier.
    pub pid: Option<u32>,
    /// Exit status of the reaped process.
    pub exit: Option<ExitStatus>,
    /// Human-readable reason (crash reason, remediation, panic info).
    pub reason: Option<Arc<str>>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Crash or failure streak.
    pub attempt: Option<u32>,
    /// Grace or shutdown timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Originating component (subscriber name, trigger, hook).
    pub source: Option<Arc<str>>,
    /// Number of events lost (overflow only).
    pub dropped: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            prev: None,
            next: None,
            pid: None,
            exit: None,
            reason: None,
            delay_ms: None,
            attempt: None,
            timeout_ms: None,
            source: None,
            dropped: None,
        }
    }

    /// Attaches the previous and next phase.
    #[inline]
    pub fn with_transition(mut self, prev: NodePhase, next: NodePhase) -> Self {
        self.prev = Some(prev);
        self.next = Some(next);
        self
    }

    /// Attaches a pid, if present.
    #[inline]
    pub fn with_pid(mut self, pid: impl Into<Option<u32>>) -> Self {
        self.pid = pid.into();
        self
    }

    /// Attaches an exit status, if present.
    #[inline]
    pub fn with_exit(mut self, exit: impl Into<Option<ExitStatus>>) -> Self {
        self.exit = exit.into();
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a streak counter.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches the originating component.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Delay as a [`Duration`], if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, dropped: u64) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(format!("subscriber={subscriber} dropped={dropped}"));
        ev.dropped = Some(dropped);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
