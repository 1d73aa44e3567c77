//! # NodeSupervisor: the public handle to one supervised backend.
//!
//! The [`NodeSupervisor`] owns the command channel into the state machine,
//! a read-only view of [`NodeState`], the event [`Bus`], and the immutable
//! [`ProcessDescriptor`]. It is built once by
//! [`SupervisorBuilder`](crate::SupervisorBuilder) and shared as an `Arc`
//! with every collaborator (UI bridge, shutdown coordinator, disk watcher).
//!
//! ## High-level architecture
//! ```text
//! UI / coordinator / disk watcher
//!        │ start() stop() restart() begin_update()
//!        ▼
//!   [mpsc Command] ──► NodeMachine task (single writer)
//!                          │ commit()
//!                          ├──► Bus ──► bus_listener ──► SubscriberSet ──► LogWriter, ...
//!                          │        └─► subscribe() receivers
//!                          └──► watch<NodeState> ──► state() / watch_state() / wait_for()
//! ```
//!
//! ## Rules
//! - Commands return the snapshot taken right after the command's own
//!   transitions were committed and published.
//! - No collaborator can signal the backend process; only commands exist.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use nodevisor::{NodePhase, NodeSupervisor, ProcessDescriptor, SupervisorConfig, TcpProbe};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let desc = ProcessDescriptor::builder("cardano-node", "mainnet")
//!         .args(["run", "--port", "3001"])
//!         .build();
//!
//!     let sup = NodeSupervisor::builder(desc, SupervisorConfig::default())
//!         .with_probe(TcpProbe::new("127.0.0.1:3001"))
//!         .build();
//!
//!     sup.start().await?;
//!     sup.wait_for(|s| s.phase == NodePhase::Running, Duration::from_secs(120)).await?;
//!     sup.stop().await?;
//!     sup.close().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::builder::SupervisorBuilder;
use super::config::SupervisorConfig;
use super::machine::{Command, Reply};
use super::state::NodeState;
use crate::error::SupervisorError;
use crate::events::{Bus, Event};
use crate::process::ProcessDescriptor;
use crate::subscribers::SubscriberSet;

/// Handle to one supervised backend process.
pub struct NodeSupervisor {
    descriptor: Arc<ProcessDescriptor>,
    cfg: SupervisorConfig,
    bus: Bus,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<NodeState>,
    machine_token: CancellationToken,
    listener_token: CancellationToken,
    machine_task: Mutex<Option<JoinHandle<()>>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeSupervisor {
    /// Starts a [`SupervisorBuilder`] for `descriptor`.
    pub fn builder(descriptor: ProcessDescriptor, cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(descriptor, cfg)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        descriptor: Arc<ProcessDescriptor>,
        cfg: SupervisorConfig,
        bus: Bus,
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<NodeState>,
        machine_token: CancellationToken,
        listener_token: CancellationToken,
        machine_task: JoinHandle<()>,
        listener_task: JoinHandle<()>,
    ) -> Self {
        Self {
            descriptor,
            cfg,
            bus,
            commands,
            state,
            machine_token,
            listener_token,
            machine_task: Mutex::new(Some(machine_task)),
            listener_task: Mutex::new(Some(listener_task)),
        }
    }

    /// `Stopped → Starting`. Idempotent while `Starting`/`Running`.
    ///
    /// Fails with [`SupervisorError::GaveUp`] once the restart ceiling was hit.
    pub async fn start(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::Start).await
    }

    /// Requests a graceful stop; coalesced with a stop already in progress.
    ///
    /// Returns once `Stopping` is committed; use [`wait_for`](Self::wait_for)
    /// to await `Stopped`.
    pub async fn stop(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::Stop).await
    }

    /// Stops (if needed) and starts again with a cleared crash history.
    ///
    /// This is the external intervention that leaves `Stopped(GaveUp)`.
    pub async fn restart(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::Restart).await
    }

    /// Stops the backend so its binary can be replaced (`Updating`).
    pub async fn begin_update(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::Update).await
    }

    /// Escalates a stop in progress to a force-kill.
    pub(crate) async fn force_kill(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::ForceKill).await
    }

    /// Releases the backend: it keeps running after the supervisor closes.
    pub(crate) async fn detach(&self) -> Result<NodeState, SupervisorError> {
        self.request(Command::Detach).await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<NodeState, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)?
    }

    /// Latest committed snapshot.
    pub fn state(&self) -> NodeState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every committed snapshot.
    pub fn watch_state(&self) -> watch::Receiver<NodeState> {
        self.state.clone()
    }

    /// Waits until `pred` holds for the current snapshot, bounded by `timeout`.
    pub async fn wait_for(
        &self,
        mut pred: impl FnMut(&NodeState) -> bool,
        timeout: Duration,
    ) -> Result<NodeState, SupervisorError> {
        let mut rx = self.state.clone();
        let res = tokio::time::timeout(timeout, rx.wait_for(|s| pred(s))).await;
        match res {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) => Err(SupervisorError::Closed),
            Err(_) => Err(SupervisorError::WaitTimeout { timeout }),
        }
    }

    /// Receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Launch parameters (immutable).
    pub fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    /// Runtime configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Stops the machine task (force-killing any live, non-detached process)
    /// and drains subscribers. Commands fail with [`SupervisorError::Closed`]
    /// afterwards.
    pub async fn close(&self) {
        self.machine_token.cancel();
        let machine = take(&self.machine_task);
        if let Some(h) = machine {
            let _ = h.await;
        }

        self.listener_token.cancel();
        let listener = take(&self.listener_task);
        if let Some(h) = listener {
            let _ = h.await;
        }
    }
}

impl Drop for NodeSupervisor {
    fn drop(&mut self) {
        self.machine_token.cancel();
        self.listener_token.cancel();
    }
}

fn take(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Forwards bus events to the subscriber set until `token` is cancelled.
pub(crate) async fn bus_listener(
    mut rx: broadcast::Receiver<Arc<Event>>,
    set: SubscriberSet,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            res = rx.recv() => match res {
                Ok(ev) => set.emit_arc(ev),
                Err(RecvError::Lagged(n)) => set.emit(&Event::subscriber_overflow("bus", n)),
                Err(RecvError::Closed) => break,
            },
            _ = token.cancelled() => break,
        }
    }
    set.shutdown().await;
}
