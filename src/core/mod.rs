//! Supervisor core: state machine, public handle and shutdown.
//!
//! The public API from this module is [`NodeSupervisor`] (built through
//! [`SupervisorBuilder`]), the [`NodeState`] snapshot types, and the
//! [`ShutdownCoordinator`].
//!
//! Internal modules:
//! - `machine`: the actor task that owns the process and commits transitions;
//! - `state`: phases, transition table, crash/stop reasons;
//! - `supervisor`: command/query handle and the bus listener;
//! - `builder`: wiring of bus, subscribers and machine;
//! - `shutdown`: orderly termination with pre-shutdown hooks;
//! - `signals`: cross-platform OS termination signals.

mod builder;
mod config;
mod machine;
mod shutdown;
mod signals;
mod state;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::SupervisorConfig;
pub use shutdown::{HookVerdict, PreShutdownHook, ShutdownCoordinator, ShutdownOutcome, ShutdownTrigger};
pub use state::{CrashReason, NodePhase, NodeState, StopReason};
pub use supervisor::NodeSupervisor;
