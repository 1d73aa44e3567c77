//! Supervisor events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the state machine (transitions, escalations, restart
//!   scheduling), `ShutdownCoordinator`, `DiskSpaceWatcher`, `SubscriberSet`
//!   workers (overflow/panic).
//! - **Consumers**: the bus listener spawned by `SupervisorBuilder` (fans out
//!   to `SubscriberSet`) and any receiver from `NodeSupervisor::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
