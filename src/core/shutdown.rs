//! # ShutdownCoordinator: orderly backend termination.
//!
//! The coordinator makes application exit wait for the backend to reach
//! `Stopped`, and makes every stop path (app exit, OS signal, user request,
//! low disk space) share the same guarantees.
//!
//! ## Sequence
//! ```text
//! shutdown(trigger)
//!   ├─► exit_deferred = true
//!   ├─► publish ShutdownRequested
//!   ├─► pre-shutdown hooks (app exit only) ── DetachBackend ─► detach ─► Detached
//!   ├─► phase == Stopped? ─────────────────────────────────► AlreadyStopped
//!   ├─► supervisor.stop()
//!   ├─► wait Stopped ≤ shutdown_timeout ── ok ─────────────► Stopped { forced }
//!   │        └─ timeout ─► publish ShutdownTimedOut
//!   ├─► supervisor.force_kill()
//!   ├─► wait Stopped ≤ kill_timeout ────── ok ─────────────► Stopped { forced: true }
//!   │        └─ timeout ──────────────────────────────────► Unconfirmed
//!   └─► exit_deferred = false
//! ```
//!
//! ## Rules
//! - Concurrent calls while a sequence is in flight join that sequence
//!   (one shared future) instead of issuing a second stop.
//! - The coordinator never touches the process; it only sends commands.
//! - `Detached` releases the backend for good: closing or dropping the
//!   supervisor afterwards leaves it running.
//! - The host exit code is always `0` ([`ShutdownOutcome::exit_code`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{error, info, warn};

use super::signals;
use super::state::{NodePhase, NodeState};
use super::supervisor::NodeSupervisor;
use crate::error::SupervisorError;
use crate::events::{Event, EventKind};

/// What asked for the backend to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The host application is quitting.
    AppExit,
    /// SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere).
    OsSignal,
    /// The user asked to stop the node.
    UserRequest,
    /// Free space fell below the configured minimum.
    LowDiskSpace {
        /// Bytes available.
        available: u64,
        /// Bytes required.
        required: u64,
    },
}

impl ShutdownTrigger {
    /// Short stable label for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownTrigger::AppExit => "app_exit",
            ShutdownTrigger::OsSignal => "os_signal",
            ShutdownTrigger::UserRequest => "user_request",
            ShutdownTrigger::LowDiskSpace { .. } => "low_disk_space",
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::LowDiskSpace {
                available,
                required,
            } => write!(f, "low disk space: {available} bytes available, {required} required"),
            other => f.write_str(other.as_label()),
        }
    }
}

/// Answer of a [`PreShutdownHook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    /// Continue with the stop sequence.
    Proceed,
    /// Leave the backend running and let the host exit.
    DetachBackend,
}

/// Collaborator awaited before an application-exit shutdown proceeds
/// (for example a "keep the node running?" consent dialog).
#[async_trait]
pub trait PreShutdownHook: Send + Sync + 'static {
    /// Called once per application-exit sequence.
    async fn before_shutdown(&self, trigger: &ShutdownTrigger) -> HookVerdict;

    /// Human-readable name (for logs and events).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Result of a shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Nothing to stop.
    AlreadyStopped,
    /// The backend reached `Stopped`.
    Stopped {
        /// A force-kill was needed.
        forced: bool,
    },
    /// A hook asked to leave the backend running.
    Detached,
    /// `Stopped` was not observed even after the force-kill.
    Unconfirmed {
        /// Phase last observed.
        phase: NodePhase,
    },
}

impl ShutdownOutcome {
    /// Exit code for the host application.
    ///
    /// Supervisor failures are surfaced through the UI, never through the exit code.
    pub fn exit_code(&self) -> i32 {
        0
    }
}

type InFlight = Shared<BoxFuture<'static, ShutdownOutcome>>;

struct Inner {
    supervisor: Arc<NodeSupervisor>,
    hooks: Mutex<Vec<Arc<dyn PreShutdownHook>>>,
    exit_deferred: AtomicBool,
    in_flight: Mutex<Option<InFlight>>,
}

/// Coordinates graceful termination of the backend; cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Coordinator for `supervisor`.
    pub fn new(supervisor: Arc<NodeSupervisor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                supervisor,
                hooks: Mutex::new(Vec::new()),
                exit_deferred: AtomicBool::new(false),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Registers a hook awaited before application-exit shutdowns.
    pub fn add_hook(&self, hook: Arc<dyn PreShutdownHook>) {
        lock(&self.inner.hooks).push(hook);
    }

    /// True while an application exit is waiting for the backend.
    pub fn is_exit_deferred(&self) -> bool {
        self.inner.exit_deferred.load(Ordering::Acquire)
    }

    /// Application-exit path: defers the exit until the backend is stopped
    /// (or detached), then releases it.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        self.inner.exit_deferred.store(true, Ordering::Release);
        let outcome = self.coalesced(trigger, true).await;
        self.inner.exit_deferred.store(false, Ordering::Release);
        info!(?outcome, trigger = trigger.as_label(), "application exit released");
        outcome
    }

    /// Stop path for collaborators (disk space, user request) that do not
    /// end the application. Hooks are not consulted.
    pub async fn stop_backend(&self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        self.coalesced(trigger, false).await
    }

    /// Waits for a termination signal, then runs [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) -> std::io::Result<ShutdownOutcome> {
        signals::wait_for_shutdown_signal().await?;
        Ok(self.shutdown(ShutdownTrigger::OsSignal).await)
    }

    fn coalesced(&self, trigger: ShutdownTrigger, app_exit: bool) -> InFlight {
        let mut slot = lock(&self.inner.in_flight);
        if let Some(fut) = slot.as_ref() {
            if fut.peek().is_none() {
                info!(trigger = trigger.as_label(), "joining shutdown already in progress");
                return fut.clone();
            }
        }
        let fut = run_sequence(Arc::clone(&self.inner), trigger, app_exit)
            .boxed()
            .shared();
        *slot = Some(fut.clone());
        fut
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_stopped(s: &NodeState) -> bool {
    s.phase == NodePhase::Stopped
}

async fn run_sequence(inner: Arc<Inner>, trigger: ShutdownTrigger, app_exit: bool) -> ShutdownOutcome {
    let sup = &inner.supervisor;
    let cfg = sup.config().clone();
    let label = trigger.as_label();

    sup.bus().publish(
        Event::new(EventKind::ShutdownRequested)
            .with_source(label)
            .with_reason(trigger.to_string()),
    );

    if app_exit {
        let hooks: Vec<_> = lock(&inner.hooks).clone();
        for hook in hooks {
            if hook.before_shutdown(&trigger).await == HookVerdict::DetachBackend {
                if let Err(err) = sup.detach().await {
                    warn!(error = %err, label = err.as_label(), "detach request rejected");
                }
                info!(hook = hook.name(), "backend detached on exit");
                sup.bus()
                    .publish(Event::new(EventKind::BackendDetached).with_source(hook.name()));
                return ShutdownOutcome::Detached;
            }
        }
    }

    if is_stopped(&sup.state()) {
        sup.bus()
            .publish(Event::new(EventKind::ShutdownCompleted).with_source(label));
        return ShutdownOutcome::AlreadyStopped;
    }

    if let Err(err) = sup.stop().await {
        warn!(error = %err, label = err.as_label(), "stop request rejected");
        return ShutdownOutcome::Unconfirmed {
            phase: sup.state().phase,
        };
    }

    match sup.wait_for(is_stopped, cfg.shutdown_timeout).await {
        Ok(state) => {
            sup.bus()
                .publish(Event::new(EventKind::ShutdownCompleted).with_source(label));
            return ShutdownOutcome::Stopped {
                forced: state.force_killed,
            };
        }
        Err(SupervisorError::WaitTimeout { timeout }) => {
            warn!(?timeout, "backend not stopped in time, force-killing");
            sup.bus().publish(
                Event::new(EventKind::ShutdownTimedOut)
                    .with_source(label)
                    .with_timeout(timeout),
            );
        }
        Err(err) => {
            warn!(error = %err, "lost supervisor while waiting for stop");
            return ShutdownOutcome::Unconfirmed {
                phase: sup.state().phase,
            };
        }
    }

    if let Err(err) = sup.force_kill().await {
        warn!(error = %err, "force-kill request rejected");
    }
    match sup.wait_for(is_stopped, cfg.kill_timeout).await {
        Ok(_) => {
            sup.bus()
                .publish(Event::new(EventKind::ShutdownCompleted).with_source(label));
            ShutdownOutcome::Stopped { forced: true }
        }
        Err(err) => {
            let phase = sup.state().phase;
            error!(error = %err, %phase, "backend did not stop after force-kill");
            ShutdownOutcome::Unconfirmed { phase }
        }
    }
}
