//! Application-level health of the backend.
//!
//! ## Contents
//! - [`Probe`], [`ProbeOutcome`] one liveness check and its result
//! - [`TcpProbe`], [`HttpProbe`] built-in probes
//! - [`HealthMonitor`], [`HealthSample`] recurring probing task and its output
//! - [`FailureStreak`] consecutive-failure counter used by the state machine
//!
//! The state machine is the only consumer of samples. It runs a monitor
//! while the node is `Starting` or `Running` and drops it on any other phase.

mod monitor;
mod probe;
mod streak;

pub use monitor::{HealthMonitor, HealthSample};
#[cfg(feature = "http-probe")]
pub use probe::HttpProbe;
pub use probe::{Probe, ProbeOutcome, TcpProbe};
pub use streak::FailureStreak;
