//! # nodevisor
//!
//! **Nodevisor** supervises the backend node process of a desktop wallet
//! shell: it launches the node, watches it at the OS and application level,
//! restarts it after crashes with bounded backoff, and makes application
//! exit wait for the node to stop.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ProcessDescriptor        SupervisorConfig          Probe (optional)
//!   (launch parameters)      (timings, RestartPolicy)  (TCP / HTTP)
//!          └──────────────────────┬─────────────────────────┘
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  NodeSupervisor (command/query handle)                            │
//! │  start / stop / restart / begin_update / state / wait_for         │
//! └──────┬─────────────────────────────────────────────────────▲──────┘
//!        │ Command (mpsc)                        NodeState     │ (watch)
//!        ▼                                                     │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  state machine task (single owner of the ProcessHandle)           │
//! │  - ProcessHandle (spawn / signal / wait)                          │
//! │  - HealthMonitor (samples while Starting/Running)                 │
//! │  - CrashHistory + RestartPolicy (RestartNow / AfterDelay / GiveUp)│
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   │ publish(Event)
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                 Bus (broadcast channel, bounded)                  │
//! └──────────────┬──────────────────────────────────┬─────────────────┘
//!                ▼                                  ▼
//!          bus listener                     NodeSupervisor::subscribe
//!                ▼                                  (UI bridge, tests)
//!          SubscriberSet
//!        ┌───────┼───────┐
//!        ▼       ▼       ▼
//!    LogWriter  sub2    subN
//!
//! ShutdownCoordinator ──stop/force_kill──► NodeSupervisor
//! DiskSpaceWatcher    ──stop_backend─────► ShutdownCoordinator
//! ```
//!
//! ### Node lifecycle
//! ```text
//! Stopped ─start─► Starting ─healthy─► Running
//!    ▲                │  │                │ │
//!    │                │  └─stop/update─┐  │ └─exit / unhealthy─► Crashed
//!    │                └─timeout/exit───┼──┼──────────────────────► Crashed
//!    │                                 ▼  ▼                          │
//!    ├──────── exit ───────── Stopping / Updating                    │
//!    │                                                               │
//!    └──── GiveUp (ceiling reached) or stop ◄─────────────────────── ┤
//!                    Starting ◄── RestartNow / RestartAfterDelay ◄───┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------------|
//! | **Process**       | Launch, signal and reap one OS process.                      | [`ProcessHandle`], [`ProcessDescriptor`]          |
//! | **Health**        | Periodic application-level liveness probing.                 | [`HealthMonitor`], [`Probe`], [`TcpProbe`]        |
//! | **Supervision**   | Lifecycle state machine and its command/query handle.        | [`NodeSupervisor`], [`NodeState`], [`NodePhase`]  |
//! | **Policies**      | Crash window, restart ceiling and backoff.                   | [`RestartPolicy`], [`BackoffPolicy`]              |
//! | **Shutdown**      | Orderly termination with escalation and pre-exit hooks.      | [`ShutdownCoordinator`], [`PreShutdownHook`]      |
//! | **Events**        | Ordered lifecycle notifications with isolated subscribers.  | [`Event`], [`Subscribe`], [`SubscriberSet`]       |
//! | **Disk space**    | Stop on low free space, start again once it recovers.        | [`DiskSpaceWatcher`], [`FreeSpace`]               |
//! | **Configuration** | Runtime settings and the TOML launcher file.                 | [`SupervisorConfig`], [`NodeConfigFile`]          |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//! - `http-probe` (default): exports [`HttpProbe`] (reqwest).
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use nodevisor::{NodeSupervisor, ProcessDescriptor, ShutdownCoordinator, SupervisorConfig, TcpProbe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let desc = ProcessDescriptor::builder("/opt/wallet/bin/cardano-node", "mainnet")
//!         .args(["run", "--config", "config.yaml"])
//!         .build();
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn nodevisor::Subscribe>> = vec![Arc::new(nodevisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn nodevisor::Subscribe>> = Vec::new();
//!
//!     let sup = NodeSupervisor::builder(desc, SupervisorConfig::default())
//!         .with_probe(TcpProbe::new("127.0.0.1:3001"))
//!         .with_subscribers(subs)
//!         .build();
//!
//!     sup.start().await?;
//!
//!     let coordinator = ShutdownCoordinator::new(Arc::clone(&sup));
//!     let outcome = coordinator.run_until_signal().await?;
//!     sup.close().await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```
mod config;
mod core;
mod diskspace;
mod error;
mod events;
mod health;
mod policies;
mod process;
mod subscribers;

// ---- Public re-exports ----

pub use config::{DiskSection, HealthSection, NodeConfigFile, NodeSection, SupervisorSection};
pub use crate::core::{
    CrashReason, HookVerdict, NodePhase, NodeState, NodeSupervisor, PreShutdownHook,
    ShutdownCoordinator, ShutdownOutcome, ShutdownTrigger, StopReason, SupervisorBuilder,
    SupervisorConfig,
};
pub use diskspace::{DiskCheck, DiskSpaceConfig, DiskSpaceWatcher, FreeSpace, SystemFreeSpace};
pub use error::{ConfigError, ProcessError, SpawnError, SupervisorError};
pub use events::{Bus, Event, EventKind};
pub use health::{FailureStreak, HealthMonitor, HealthSample, Probe, ProbeOutcome, TcpProbe};
pub use policies::{BackoffPolicy, CrashHistory, RestartDecision, RestartPolicy};
pub use process::{DescriptorBuilder, ExitStatus, ProcessDescriptor, ProcessHandle, SignalKind};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: HTTP status probe.
// Enable with: `--features http-probe`
#[cfg(feature = "http-probe")]
pub use health::HttpProbe;

// Optional: built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
