//! # Disk-space collaborator.
//!
//! [`DiskSpaceWatcher`] polls free space on the volume holding the node's
//! state directory. When it drops below `required_bytes` the backend is
//! stopped through [`ShutdownCoordinator::stop_backend`]; once space is back
//! above `required_bytes + hysteresis_bytes` and the node is still stopped,
//! it is started again.
//!
//! ```text
//! tick ──► FreeSpace::available(path)
//!            ├─ None                       → Unknown (logged, no action)
//!            ├─ < required, not low        → LowDiskSpace event, stop_backend(LowDiskSpace)
//!            ├─ ≥ required + hysteresis, low → DiskSpaceRecovered event, start()
//!            └─ otherwise                  → unchanged
//! ```
//!
//! The watcher never touches the state machine directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::Disks;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{NodePhase, NodeSupervisor, ShutdownCoordinator, ShutdownTrigger, StopReason};
use crate::events::{Event, EventKind};

/// Source of free-space figures.
pub trait FreeSpace: Send + Sync + 'static {
    /// Bytes available to unprivileged users on the volume holding `path`.
    fn available(&self, path: &Path) -> Option<u64>;
}

/// [`FreeSpace`] backed by the OS disk list (`sysinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFreeSpace;

impl FreeSpace for SystemFreeSpace {
    fn available(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

/// Thresholds and polling cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpaceConfig {
    /// Directory whose volume is checked (the node's state directory).
    pub path: PathBuf,
    /// Minimum free bytes needed to keep the node running.
    pub required_bytes: u64,
    /// Extra free bytes needed before restarting after a low-space stop.
    pub hysteresis_bytes: u64,
    /// Pause between checks.
    pub interval: Duration,
}

impl DiskSpaceConfig {
    /// Defaults: 2 GiB required, 512 MiB hysteresis, checked every 10s.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required_bytes: 2 * 1024 * 1024 * 1024,
            hysteresis_bytes: 512 * 1024 * 1024,
            interval: Duration::from_secs(10),
        }
    }
}

/// Result of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskCheck {
    /// Free space could not be determined.
    Unknown,
    /// Enough space; nothing changed.
    Sufficient,
    /// Space just fell below the minimum; the backend was stopped.
    BecameLow {
        /// Bytes available.
        available: u64,
    },
    /// Still below the restart threshold.
    StillLow {
        /// Bytes available.
        available: u64,
    },
    /// Space recovered; a start was requested if the node was stopped.
    Recovered {
        /// Bytes available.
        available: u64,
    },
}

/// Polls free space and drives the stop/start paths.
pub struct DiskSpaceWatcher {
    cfg: DiskSpaceConfig,
    source: Arc<dyn FreeSpace>,
    supervisor: Arc<NodeSupervisor>,
    coordinator: ShutdownCoordinator,
    low: bool,
}

impl DiskSpaceWatcher {
    /// Watcher using the OS disk list.
    pub fn new(
        cfg: DiskSpaceConfig,
        supervisor: Arc<NodeSupervisor>,
        coordinator: ShutdownCoordinator,
    ) -> Self {
        Self::with_source(cfg, Arc::new(SystemFreeSpace), supervisor, coordinator)
    }

    /// Watcher using a custom [`FreeSpace`] source.
    pub fn with_source(
        cfg: DiskSpaceConfig,
        source: Arc<dyn FreeSpace>,
        supervisor: Arc<NodeSupervisor>,
        coordinator: ShutdownCoordinator,
    ) -> Self {
        Self {
            cfg,
            source,
            supervisor,
            coordinator,
            low: false,
        }
    }

    /// Runs one check and the action it implies.
    pub async fn check(&mut self) -> DiskCheck {
        let source = Arc::clone(&self.source);
        let path = self.cfg.path.clone();
        let available = tokio::task::spawn_blocking(move || source.available(&path))
            .await
            .ok()
            .flatten();
        let Some(available) = available else {
            debug!(path = %self.cfg.path.display(), "free space unknown");
            return DiskCheck::Unknown;
        };

        let required = self.cfg.required_bytes;
        let resume_at = required.saturating_add(self.cfg.hysteresis_bytes);

        if !self.low && available < required {
            self.low = true;
            warn!(available, required, "free space below minimum, stopping node");
            self.supervisor.bus().publish(
                Event::new(EventKind::LowDiskSpace)
                    .with_reason(format!("{available} bytes available, {required} required")),
            );
            let outcome = self
                .coordinator
                .stop_backend(ShutdownTrigger::LowDiskSpace {
                    available,
                    required,
                })
                .await;
            debug!(?outcome, "low-space stop finished");
            return DiskCheck::BecameLow { available };
        }

        if self.low {
            if available < resume_at {
                return DiskCheck::StillLow { available };
            }
            self.low = false;
            info!(available, "free space recovered");
            self.supervisor.bus().publish(
                Event::new(EventKind::DiskSpaceRecovered)
                    .with_reason(format!("{available} bytes available")),
            );
            let state = self.supervisor.state();
            if state.phase == NodePhase::Stopped && state.stop_reason == Some(StopReason::Requested) {
                if let Err(err) = self.supervisor.start().await {
                    warn!(error = %err, "restart after disk recovery rejected");
                }
            }
            return DiskCheck::Recovered { available };
        }

        DiskCheck::Sufficient
    }

    /// Spawns the polling loop; it ends when `token` is cancelled.
    pub fn spawn(mut self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.cfg.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.check().await;
            }
        })
    }
}
