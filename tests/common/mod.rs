#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nodevisor::{
    BackoffPolicy, Event, EventKind, Probe, ProbeOutcome, ProcessDescriptor, RestartPolicy,
    SupervisorConfig,
};
use tokio::sync::broadcast;

pub const HEALTHY: u8 = 0;
pub const REFUSING: u8 = 1;
pub const HANGING: u8 = 2;

/// Probe whose answer is switched by the test.
#[derive(Clone, Default)]
pub struct SwitchProbe {
    mode: Arc<AtomicU8>,
}

impl SwitchProbe {
    pub fn new(mode: u8) -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(mode)),
        }
    }

    pub fn set(&self, mode: u8) {
        self.mode.store(mode, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for SwitchProbe {
    async fn probe(&self) -> ProbeOutcome {
        match self.mode.load(Ordering::SeqCst) {
            HEALTHY => ProbeOutcome::Reachable,
            REFUSING => ProbeOutcome::Unreachable("connection refused".into()),
            _ => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ProbeOutcome::Reachable
            }
        }
    }

    fn name(&self) -> &'static str {
        "switch"
    }
}

/// Backend running `script` under `/bin/sh -c`.
pub fn sh(script: &str) -> ProcessDescriptor {
    ProcessDescriptor::builder("/bin/sh", "testnet")
        .args(["-c", script])
        .build()
}

/// Long-lived backend that exits promptly on SIGTERM.
pub fn sleeper() -> ProcessDescriptor {
    sh("exec sleep 30")
}

/// Backend that ignores SIGTERM.
pub fn stubborn() -> ProcessDescriptor {
    sh("trap '' TERM; while :; do sleep 0.05; done")
}

/// Timings scaled down for tests.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        startup_window: Duration::from_secs(2),
        probe_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_millis(50),
        failure_threshold: 3,
        grace: Duration::from_millis(300),
        shutdown_timeout: Duration::from_secs(2),
        kill_timeout: Duration::from_secs(2),
        bus_capacity: 256,
        restart: RestartPolicy {
            window: Duration::from_secs(60),
            max_crashes: 3,
            backoff: BackoffPolicy {
                first: Duration::from_millis(50),
                max: Duration::from_millis(200),
                factor: 2.0,
            },
            stability_threshold: Duration::from_secs(10),
        },
    }
}

/// Same as [`fast_config`] but crashes never restart within a test.
pub fn no_restart_config() -> SupervisorConfig {
    let mut cfg = fast_config();
    cfg.restart.backoff.first = Duration::from_secs(60);
    cfg.restart.backoff.max = Duration::from_secs(60);
    cfg
}

/// Collects events until one matches `until` (inclusive) or `timeout` elapses.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<Arc<Event>>,
    timeout: Duration,
    mut until: impl FnMut(&Event) -> bool,
) -> Vec<Arc<Event>> {
    let mut out = Vec::new();
    let _ = tokio::time::timeout(timeout, async {
        while let Ok(ev) = rx.recv().await {
            let done = until(&ev);
            out.push(ev);
            if done {
                break;
            }
        }
    })
    .await;
    out
}

pub fn kinds(events: &[Arc<Event>]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// True when no process with `pid` exists any more.
pub fn pid_gone(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_err()
}

/// Gone, or a zombie of a process we do not reap ourselves.
pub fn pid_dead(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => pid_gone(pid),
    }
}

/// Polls [`pid_dead`] until it holds or `limit` elapses.
pub async fn dies_within(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if pid_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pid_dead(pid)
}

/// SIGKILL for processes the supervisor no longer owns.
pub fn kill_now(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// Waits for a script to write a pid into `path`.
pub async fn read_pid_file(path: &std::path::Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no pid written to {}", path.display());
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
