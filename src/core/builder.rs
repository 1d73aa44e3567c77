use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::config::SupervisorConfig;
use super::machine::NodeMachine;
use super::state::NodeState;
use super::supervisor::{NodeSupervisor, bus_listener};
use crate::events::Bus;
use crate::health::Probe;
use crate::process::ProcessDescriptor;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`NodeSupervisor`] with optional features.
pub struct SupervisorBuilder {
    descriptor: ProcessDescriptor,
    cfg: SupervisorConfig,
    probe: Option<Arc<dyn Probe>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder for `descriptor` with the given configuration.
    pub fn new(descriptor: ProcessDescriptor, cfg: SupervisorConfig) -> Self {
        Self {
            descriptor,
            cfg,
            probe: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the health probe.
    ///
    /// Without a probe the node enters `Running` right after a successful
    /// spawn and only OS-level exits are detected.
    pub fn with_probe(mut self, probe: impl Probe) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Sets an already shared health probe.
    pub fn with_shared_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets event subscribers (logging, UI bridge, metrics).
    ///
    /// Subscribers receive events through dedicated workers with bounded
    /// drop-oldest queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and spawns its tasks.
    ///
    /// Must be called from within a Tokio runtime. The node starts in
    /// `Stopped`; call [`NodeSupervisor::start`] to launch it.
    pub fn build(self) -> Arc<NodeSupervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        // Subscribe before the machine exists so no transition is missed.
        let set = SubscriberSet::new(self.subscribers, bus.clone());
        let listener_token = CancellationToken::new();
        let listener = tokio::spawn(bus_listener(
            bus.subscribe(),
            set,
            listener_token.clone(),
        ));

        let descriptor = Arc::new(self.descriptor);
        let machine_token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(NodeState::initial());
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let machine = NodeMachine::new(
            Arc::clone(&descriptor),
            self.cfg.clone(),
            self.probe,
            bus.clone(),
            state_tx,
            machine_token.clone(),
        );
        let machine_task = tokio::spawn(machine.run(cmd_rx));

        Arc::new(NodeSupervisor::new_internal(
            descriptor,
            self.cfg,
            bus,
            cmd_tx,
            state_rx,
            machine_token,
            listener_token,
            machine_task,
            listener,
        ))
    }
}
