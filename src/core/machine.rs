//! # NodeMachine: the single writer of [`NodeState`].
//!
//! The machine runs as one actor task. Commands arrive over an `mpsc`
//! channel and are answered through `oneshot` replies; health samples, the
//! process exit and every deadline are awaited in the same `select!`, so
//! transitions are strictly serialized.
//!
//! ## Event loop
//! ```text
//! loop select! (biased) {
//!   token.cancelled()         → force-kill, reap, exit task
//!   process.wait()            → Stopping/Updating ─► Stopped
//!                               Starting/Running  ─► Crashed(pending or UnexpectedExit)
//!   commands.recv()           → start / stop / restart / update / force_kill / detach
//!   monitor.next()            → Starting: first success ─► Running
//!                               Running:  FailureStreak trips ─► force-kill (crash on exit)
//!   startup deadline          → force-kill (Crashed(StartupTimeout) on exit)
//!   grace deadline            → force-kill exactly once, publish ForceKillEscalated
//!   restart deadline          → Crashed ─► Starting
//! }
//! ```
//!
//! ## Rules
//! - `commit()` validates the edge, publishes the event, then updates the
//!   watch snapshot; the command reply is sent only afterwards.
//! - A crash that requires killing the process is committed once the process
//!   has been reaped, so `Crashed` never carries a live pid.
//! - The health monitor only exists in `Starting` and `Running`.
//! - After `detach` the process is released, not killed; teardown leaves it
//!   alone and every later command fails with `Detached`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SupervisorConfig;
use super::state::{CrashReason, NodePhase, NodeState, StopReason};
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::health::{FailureStreak, HealthMonitor, HealthSample, Probe};
use crate::policies::{CrashHistory, RestartDecision};
use crate::process::{ExitStatus, ProcessDescriptor, ProcessHandle, SignalKind};

pub(crate) type Reply = oneshot::Sender<Result<NodeState, SupervisorError>>;

/// Requests accepted by the machine.
pub(crate) enum Command {
    Start(Reply),
    Stop(Reply),
    Restart(Reply),
    Update(Reply),
    ForceKill(Reply),
    Detach(Reply),
}

/// What woke the event loop.
enum Step {
    Shutdown,
    Exited(ExitStatus),
    Command(Command),
    Sample(HealthSample),
    StartupTimeout,
    GraceExpired,
    RestartDue,
}

pub(crate) struct NodeMachine {
    descriptor: Arc<ProcessDescriptor>,
    cfg: SupervisorConfig,
    probe: Option<Arc<dyn Probe>>,
    bus: Bus,
    state_tx: watch::Sender<NodeState>,
    state: NodeState,
    token: CancellationToken,

    process: Option<ProcessHandle>,
    monitor: Option<HealthMonitor>,
    streak: FailureStreak,
    history: CrashHistory,
    running_since: Option<Instant>,
    startup_deadline: Option<Instant>,
    grace_deadline: Option<Instant>,
    restart_at: Option<Instant>,
    pending_crash: Option<CrashReason>,
    restart_after_stop: bool,
    detached: bool,
}

impl NodeMachine {
    pub(crate) fn new(
        descriptor: Arc<ProcessDescriptor>,
        cfg: SupervisorConfig,
        probe: Option<Arc<dyn Probe>>,
        bus: Bus,
        state_tx: watch::Sender<NodeState>,
        token: CancellationToken,
    ) -> Self {
        let streak = FailureStreak::new(cfg.failure_threshold_clamped());
        let state = state_tx.borrow().clone();
        Self {
            descriptor,
            cfg,
            probe,
            bus,
            state_tx,
            state,
            token,
            process: None,
            monitor: None,
            streak,
            history: CrashHistory::new(),
            running_since: None,
            startup_deadline: None,
            grace_deadline: None,
            restart_at: None,
            pending_crash: None,
            restart_after_stop: false,
            detached: false,
        }
    }

    /// Runs the machine until its token is cancelled or all command senders are gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.token.cancelled() => Step::Shutdown,
                status = wait_exit(&self.process) => Step::Exited(status),
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Step::Command(cmd),
                    None => Step::Shutdown,
                },
                sample = next_sample(&mut self.monitor) => Step::Sample(sample),
                _ = sleep_until_opt(self.startup_deadline) => Step::StartupTimeout,
                _ = sleep_until_opt(self.grace_deadline) => Step::GraceExpired,
                _ = sleep_until_opt(self.restart_at) => Step::RestartDue,
            };

            match step {
                Step::Shutdown => break,
                Step::Exited(status) => self.on_exit(status),
                Step::Command(cmd) => self.on_command(cmd),
                Step::Sample(sample) => self.on_sample(sample),
                Step::StartupTimeout => {
                    self.startup_deadline = None;
                    if self.state.phase == NodePhase::Starting {
                        warn!(pid = ?self.state.pid, window = ?self.cfg.startup_window, "no healthy probe within startup window");
                        self.kill_for(CrashReason::StartupTimeout);
                    }
                }
                Step::GraceExpired => self.escalate(),
                Step::RestartDue => {
                    self.restart_at = None;
                    if self.state.phase == NodePhase::Crashed {
                        self.launch();
                    }
                }
            }
        }

        self.teardown().await;
    }

    fn on_command(&mut self, cmd: Command) {
        use NodePhase::*;
        let phase = self.state.phase;

        if self.detached {
            let (reply, result) = match cmd {
                Command::Detach(reply) => (reply, Ok(self.state.clone())),
                Command::Start(reply)
                | Command::Stop(reply)
                | Command::Restart(reply)
                | Command::Update(reply)
                | Command::ForceKill(reply) => (reply, Err(SupervisorError::Detached)),
            };
            let _ = reply.send(result);
            return;
        }

        let (reply, result) = match cmd {
            Command::Start(reply) => {
                let res = match phase {
                    Stopped if self.state.is_terminal() => Err(SupervisorError::GaveUp),
                    Stopped | Crashed => {
                        self.launch();
                        Ok(())
                    }
                    Starting | Running => Ok(()),
                    Stopping | Updating => Err(SupervisorError::InvalidCommand {
                        command: "start",
                        phase,
                    }),
                };
                (reply, res)
            }
            Command::Stop(reply) => {
                self.restart_after_stop = false;
                match phase {
                    Starting | Running => self.begin_stop(Stopping),
                    Crashed => {
                        self.restart_at = None;
                        self.commit(Stopped, None, |s| s.stop_reason = Some(StopReason::Requested));
                    }
                    Stopped | Stopping | Updating => {}
                }
                (reply, Ok(()))
            }
            Command::Restart(reply) => {
                info!(%phase, "explicit restart requested");
                self.history.clear();
                match phase {
                    Starting | Running => {
                        self.begin_stop(Stopping);
                        self.restart_after_stop = true;
                    }
                    Stopping | Updating => self.restart_after_stop = true,
                    Stopped | Crashed => self.launch(),
                }
                (reply, Ok(()))
            }
            Command::Update(reply) => {
                let res = match phase {
                    Starting | Running => {
                        self.restart_after_stop = false;
                        self.begin_stop(Updating);
                        Ok(())
                    }
                    Updating => Ok(()),
                    Stopped | Stopping | Crashed => Err(SupervisorError::InvalidCommand {
                        command: "update",
                        phase,
                    }),
                };
                (reply, res)
            }
            Command::ForceKill(reply) => {
                match phase {
                    Starting | Running => {
                        self.begin_stop(Stopping);
                        self.escalate();
                    }
                    Stopping | Updating => self.escalate(),
                    Stopped | Crashed => {}
                }
                (reply, Ok(()))
            }
            Command::Detach(reply) => {
                self.release();
                (reply, Ok(()))
            }
        };

        let _ = reply.send(result.map(|()| self.state.clone()));
    }

    fn on_sample(&mut self, sample: HealthSample) {
        match self.state.phase {
            NodePhase::Starting if sample.outcome.is_success() => self.enter_running(),
            NodePhase::Starting => {
                debug!(outcome = %sample.outcome, "backend not ready yet");
            }
            NodePhase::Running => {
                let tripped = self.streak.observe(&sample.outcome);
                if !sample.outcome.is_success() {
                    self.bus.publish(
                        Event::new(EventKind::HealthCheckFailed)
                            .with_pid(self.state.pid)
                            .with_reason(sample.outcome.to_string())
                            .with_attempt(self.streak.current()),
                    );
                }
                if tripped {
                    warn!(pid = ?self.state.pid, streak = self.streak.current(), "backend unresponsive");
                    self.kill_for(CrashReason::HealthUnresponsive);
                }
            }
            _ => {}
        }
    }

    fn on_exit(&mut self, status: ExitStatus) {
        self.process = None;
        self.monitor = None;
        self.startup_deadline = None;
        self.grace_deadline = None;

        match self.state.phase {
            NodePhase::Stopping | NodePhase::Updating => {
                let reason = if self.state.phase == NodePhase::Updating {
                    StopReason::Updated
                } else {
                    StopReason::Requested
                };
                self.commit(NodePhase::Stopped, None, |s| {
                    s.last_exit = Some(status);
                    s.stop_reason = Some(reason);
                });
                if std::mem::take(&mut self.restart_after_stop) {
                    self.launch();
                }
            }
            NodePhase::Starting | NodePhase::Running => {
                let reason = self
                    .pending_crash
                    .take()
                    .unwrap_or(CrashReason::UnexpectedExit(status));
                self.crash(reason, Some(status));
            }
            phase => debug!(%phase, %status, "process exit outside an owning phase"),
        }
    }

    /// Spawns the backend and enters `Starting`.
    fn launch(&mut self) {
        self.restart_at = None;
        self.pending_crash = None;
        self.streak.reset();

        match ProcessHandle::spawn(&self.descriptor) {
            Ok(handle) => {
                let pid = handle.pid();
                self.process = Some(handle);
                self.startup_deadline = self.cfg.startup_deadline().map(|d| Instant::now() + d);
                self.commit(NodePhase::Starting, None, |s| {
                    s.pid = Some(pid);
                    s.crash_reason = None;
                    s.stop_reason = None;
                    s.force_killed = false;
                });

                match &self.probe {
                    Some(probe) => {
                        self.monitor = Some(HealthMonitor::spawn(
                            Arc::clone(probe),
                            self.cfg.probe_interval,
                            self.cfg.probe_timeout,
                            &self.token,
                        ));
                    }
                    None => self.enter_running(),
                }
            }
            Err(err) => {
                warn!(error = %err, label = err.as_label(), "backend spawn failed");
                // the one Starting snapshot without a pid
                self.commit(NodePhase::Starting, None, |s| {
                    s.pid = None;
                    s.crash_reason = None;
                    s.stop_reason = None;
                    s.force_killed = false;
                });
                self.crash(CrashReason::SpawnFailed(err.to_string()), None);
            }
        }
    }

    fn enter_running(&mut self) {
        self.startup_deadline = None;
        self.streak.reset();
        self.running_since = Some(Instant::now());
        self.commit(NodePhase::Running, None, |_| {});
    }

    /// Commits `Crashed` and applies the restart decision.
    fn crash(&mut self, reason: CrashReason, exit: Option<ExitStatus>) {
        let now = Instant::now();
        let uptime = self.running_since.take().map(|since| now - since);
        let policy = self.cfg.restart;
        policy.record_crash(&mut self.history, now.into_std(), uptime);

        self.commit(NodePhase::Crashed, None, |s| {
            s.crash_reason = Some(reason);
            if exit.is_some() {
                s.last_exit = exit;
            }
        });

        match policy.decide(&self.history, now.into_std()) {
            RestartDecision::RestartNow => self.schedule_restart(now, Duration::ZERO),
            RestartDecision::RestartAfterDelay(delay) => self.schedule_restart(now, delay),
            RestartDecision::GiveUp(why) => {
                self.commit(
                    NodePhase::Stopped,
                    Some(format!("{why}; restart the application")),
                    |s| s.stop_reason = Some(StopReason::GaveUp),
                );
            }
        }
    }

    fn schedule_restart(&mut self, now: Instant, delay: Duration) {
        self.restart_at = Some(now + delay);
        self.bus.publish(
            Event::new(EventKind::RestartScheduled)
                .with_delay(delay)
                .with_attempt(self.history.streak()),
        );
    }

    /// Kills the process; the crash is committed when the exit is observed.
    fn kill_for(&mut self, reason: CrashReason) {
        self.monitor = None;
        self.startup_deadline = None;
        self.pending_crash = Some(reason);
        if let Some(process) = &self.process {
            if let Err(err) = process.signal(SignalKind::ForceKill) {
                debug!(error = %err, "force-kill raced with exit");
            }
        }
    }

    /// Sends the graceful signal and enters `Stopping` or `Updating`.
    fn begin_stop(&mut self, target: NodePhase) {
        self.monitor = None;
        self.startup_deadline = None;
        self.pending_crash = None;
        self.running_since = None;

        let Some(process) = &self.process else {
            // Nothing to wait for.
            self.commit(target, None, |_| {});
            let reason = if target == NodePhase::Updating {
                StopReason::Updated
            } else {
                StopReason::Requested
            };
            self.commit(NodePhase::Stopped, None, |s| s.stop_reason = Some(reason));
            return;
        };

        if let Err(err) = process.signal(SignalKind::Graceful) {
            debug!(error = %err, "graceful signal raced with exit");
        }
        self.grace_deadline = Some(Instant::now() + self.cfg.grace);
        self.commit(target, None, |_| {});
    }

    /// Force-kills a stopping process, at most once per stop.
    fn escalate(&mut self) {
        self.grace_deadline = None;
        if self.state.force_killed {
            return;
        }
        let Some(process) = &self.process else {
            return;
        };
        if process.signal(SignalKind::ForceKill).is_err() {
            return;
        }

        warn!(pid = process.pid(), grace = ?self.cfg.grace, "graceful stop did not finish, force-killing");
        self.state.force_killed = true;
        self.bus.publish(
            Event::new(EventKind::ForceKillEscalated)
                .with_pid(process.pid())
                .with_timeout(self.cfg.grace),
        );
        self.state_tx.send_replace(self.state.clone());
    }

    /// Validates, publishes and stores one transition.
    fn commit(&mut self, next: NodePhase, note: Option<String>, edit: impl FnOnce(&mut NodeState)) {
        let prev = self.state.phase;
        if !prev.can_transition_to(next) {
            warn!(%prev, %next, "illegal transition ignored");
            return;
        }

        let prev_pid = self.state.pid;
        let mut state = self.state.clone();
        state.phase = next;
        if !next.owns_process() {
            state.pid = None;
        }
        edit(&mut state);
        state.consecutive_crashes = self.history.streak();
        state.since = SystemTime::now();
        state.seq += 1;

        let kind = match next {
            NodePhase::Starting => EventKind::NodeStarting,
            NodePhase::Running => EventKind::NodeRunning,
            NodePhase::Stopping => EventKind::NodeStopping,
            NodePhase::Updating => EventKind::NodeUpdating,
            NodePhase::Crashed => EventKind::NodeCrashed,
            NodePhase::Stopped if state.stop_reason == Some(StopReason::GaveUp) => {
                EventKind::NodeGaveUp
            }
            NodePhase::Stopped => EventKind::NodeStopped,
        };

        let mut ev = Event::new(kind)
            .with_transition(prev, next)
            .with_pid(state.pid.or(prev_pid));
        match next {
            NodePhase::Starting | NodePhase::Crashed => {
                ev = ev.with_attempt(state.consecutive_crashes);
            }
            NodePhase::Stopping | NodePhase::Updating => ev = ev.with_timeout(self.cfg.grace),
            _ => {}
        }
        if matches!(next, NodePhase::Crashed | NodePhase::Stopped) {
            ev = ev.with_exit(state.last_exit);
        }
        let reason = note.or_else(|| match next {
            NodePhase::Crashed => state.crash_reason.as_ref().map(ToString::to_string),
            NodePhase::Stopped => state.stop_reason.map(|r| r.as_label().to_string()),
            _ => None,
        });
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }

        debug!(%prev, %next, pid = ?ev.pid, seq = state.seq, "node transition");
        self.bus.publish(ev);
        self.state = state;
        self.state_tx.send_replace(self.state.clone());
    }

    /// Lets go of the process without signalling it.
    fn release(&mut self) {
        self.monitor = None;
        self.startup_deadline = None;
        self.grace_deadline = None;
        self.restart_at = None;
        self.pending_crash = None;
        self.restart_after_stop = false;
        self.detached = true;
        if let Some(process) = self.process.take() {
            info!(pid = process.pid(), phase = %self.state.phase, "backend detached, left running");
        }
    }

    /// Kills and reaps any owned process when the supervisor goes away.
    async fn teardown(&mut self) {
        self.monitor = None;
        if let Some(process) = self.process.take() {
            let pid = process.pid();
            let _ = process.signal(SignalKind::ForceKill);
            if time::timeout(self.cfg.kill_timeout, process.wait()).await.is_err() {
                warn!(pid, "backend not reaped within kill timeout on teardown");
            }
        }
        debug!("node machine stopped");
    }
}

async fn wait_exit(process: &Option<ProcessHandle>) -> ExitStatus {
    match process {
        Some(p) => p.wait().await,
        None => std::future::pending().await,
    }
}

async fn next_sample(monitor: &mut Option<HealthMonitor>) -> HealthSample {
    match monitor {
        Some(m) => match m.next().await {
            Some(sample) => sample,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
