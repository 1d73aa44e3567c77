//! # Handle to one spawned OS process.
//!
//! [`ProcessHandle::spawn`] launches the backend described by a
//! [`ProcessDescriptor`] and hands the [`Child`] to a dedicated **reaper**
//! task. The reaper is the only code that waits on the child, so the process
//! is always reaped, and it is the only code that touches the child when a
//! signal is requested.
//!
//! ## Architecture
//! ```text
//! ProcessHandle ── signal(kind) ──► [control mpsc] ──► reaper task
//!       ▲                                                 │ child.wait()
//!       └──────── wait() / is_alive() ◄── [exit watch] ◄──┘ (status published after reap)
//! ```
//!
//! ## Rules
//! - On Unix the backend leads its own process group; signals go to the
//!   whole group so helpers started by a launcher script stop with it.
//! - When the leader exits, members still left in its group are killed
//!   before the exit is published.
//! - `wait()` only resolves after the OS process has been reaped.
//! - `signal()` fails with [`ProcessError::NotRunning`] once the exit is known.
//! - Dropping the handle releases the process: it is not killed and its
//!   group is not swept, but the reaper keeps waiting so no zombie is left
//!   behind.

use std::fs::OpenOptions;
use std::io;
use std::process::Stdio;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{ExitStatus, ProcessDescriptor};
use crate::error::{ProcessError, SpawnError};

/// Signal requested from a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Ask the process to shut down (SIGTERM on Unix).
    Graceful,
    /// Terminate immediately (SIGKILL on Unix).
    ForceKill,
}

/// Owner of a running backend process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    exit: watch::Receiver<Option<ExitStatus>>,
    control: mpsc::UnboundedSender<SignalKind>,
}

impl ProcessHandle {
    /// Spawns the process and its reaper task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(descriptor: &ProcessDescriptor) -> Result<Self, SpawnError> {
        let (stdout, stderr) = output_targets(descriptor)?;

        let mut cmd = descriptor.command();
        cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|err| SpawnError::from_io(descriptor.program_name(), err))?;
        let pid = child.id().ok_or_else(|| SpawnError::Io {
            program: descriptor.program_name(),
            source: io::Error::other("process exited before its pid was read"),
        })?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(reap(child, pid, exit_tx, control_rx));

        debug!(pid, program = %descriptor.program().display(), "backend process spawned");
        Ok(Self {
            pid,
            exit: exit_rx,
            control: control_tx,
        })
    }

    /// OS process identifier.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Requests delivery of `kind`.
    ///
    /// Delivery itself is performed by the reaper; a process that exits
    /// concurrently simply never receives it.
    pub fn signal(&self, kind: SignalKind) -> Result<(), ProcessError> {
        if self.exit.borrow().is_some() {
            return Err(ProcessError::NotRunning);
        }
        self.control
            .send(kind)
            .map_err(|_| ProcessError::NotRunning)
    }

    /// Waits until the process has terminated and been reaped.
    ///
    /// Suspends only the caller; any number of callers may wait concurrently.
    pub async fn wait(&self) -> ExitStatus {
        let mut rx = self.exit.clone();
        if let Ok(status) = rx.wait_for(Option::is_some).await {
            return (*status).unwrap_or_default();
        }
        let last = *rx.borrow();
        last.unwrap_or_default()
    }

    /// Exit status, if the process has already been reaped.
    pub fn try_exit(&self) -> Option<ExitStatus> {
        *self.exit.borrow()
    }

    /// Non-blocking check of OS-level presence (not application health).
    pub fn is_alive(&self) -> bool {
        self.exit.borrow().is_none() && os_alive(self.pid)
    }
}

/// Owns the child until it exits, delivering requested signals meanwhile.
async fn reap(
    mut child: Child,
    pid: u32,
    exit: watch::Sender<Option<ExitStatus>>,
    mut control: mpsc::UnboundedReceiver<SignalKind>,
) {
    let mut released = false;
    let status = loop {
        tokio::select! {
            res = child.wait() => {
                break match res {
                    Ok(status) => ExitStatus::from(status),
                    Err(err) => {
                        warn!(pid, error = %err, "failed to collect backend exit status");
                        ExitStatus::default()
                    }
                };
            }
            kind = control.recv(), if !released => match kind {
                Some(kind) => {
                    if let Err(err) = deliver(&mut child, pid, kind) {
                        warn!(pid, ?kind, error = %err, "signal delivery failed");
                    }
                }
                None => {
                    debug!(pid, "backend process released by its handle");
                    released = true;
                }
            },
        }
    };

    if !released {
        sweep_group(pid);
    }
    debug!(pid, %status, "backend process reaped");
    exit.send_replace(Some(status));
}

#[cfg(unix)]
fn deliver(_child: &mut Child, pid: u32, kind: SignalKind) -> io::Result<()> {
    use nix::sys::signal::Signal;

    let sig = match kind {
        SignalKind::Graceful => Signal::SIGTERM,
        SignalKind::ForceKill => Signal::SIGKILL,
    };
    killpg(pid, sig).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn deliver(child: &mut Child, _pid: u32, _kind: SignalKind) -> io::Result<()> {
    child.start_kill()
}

#[cfg(unix)]
fn killpg(pid: u32, sig: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let raw = pid as i32;
    nix::sys::signal::killpg(Pid::from_raw(raw), sig)
}

/// Kills whatever is left in the group of an exited leader.
#[cfg(unix)]
fn sweep_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::Signal;

    match killpg(pid, Signal::SIGKILL) {
        Ok(()) => debug!(pid, "killed leftover members of the backend process group"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pid, error = %err, "failed to sweep backend process group"),
    }
}

#[cfg(not(unix))]
fn sweep_group(_pid: u32) {}

#[cfg(unix)]
fn os_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let raw = pid as i32;
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn os_alive(_pid: u32) -> bool {
    true
}

/// Stdout/stderr targets: the log file (shared, appending) or nothing.
fn output_targets(descriptor: &ProcessDescriptor) -> Result<(Stdio, Stdio), SpawnError> {
    let Some(path) = descriptor.log_file() else {
        return Ok((Stdio::null(), Stdio::null()));
    };
    let log_err = |source| SpawnError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)?;
    let err = out.try_clone().map_err(log_err)?;
    Ok((Stdio::from(out), Stdio::from(err)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> ProcessDescriptor {
        ProcessDescriptor::builder("/bin/sh", "testnet")
            .args(["-c", script])
            .build()
    }

    #[tokio::test]
    async fn graceful_signal_terminates_and_reaps() {
        let handle = ProcessHandle::spawn(&sh("sleep 30")).unwrap();
        assert!(handle.pid() > 0);
        assert!(handle.is_alive());

        handle.signal(SignalKind::Graceful).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("process should exit on SIGTERM");

        assert_eq!(status.signal(), Some(15));
        assert!(!handle.is_alive());
        assert_eq!(handle.try_exit(), Some(status));
        assert_eq!(handle.signal(SignalKind::ForceKill), Err(ProcessError::NotRunning));
    }

    #[tokio::test]
    async fn force_kill_overrides_ignored_term() {
        let handle = ProcessHandle::spawn(&sh("trap '' TERM; sleep 30")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.signal(SignalKind::Graceful).unwrap();
        let early = tokio::time::timeout(Duration::from_millis(300), handle.wait()).await;
        assert!(early.is_err(), "TERM is trapped, process must survive");

        handle.signal(SignalKind::ForceKill).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[tokio::test]
    async fn exit_code_is_captured() {
        let handle = ProcessHandle::spawn(&sh("exit 7")).unwrap();
        let status = handle.wait().await;
        assert_eq!(status.code(), Some(7));
        assert!(!status.success());
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let desc = ProcessDescriptor::builder("/definitely/not/here/node", "testnet").build();
        let err = ProcessHandle::spawn(&desc).unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("node.log");
        let desc = ProcessDescriptor::builder("/bin/sh", "testnet")
            .args(["-c", "echo out; echo err 1>&2"])
            .log_file(&log)
            .build();

        ProcessHandle::spawn(&desc).unwrap().wait().await;

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    /// Pid written by the script into `path`, once it is there.
    async fn read_pid(path: &std::path::Path) -> i32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no pid in {}", path.display());
    }

    /// Gone from the process table, or a zombie waiting for init.
    fn dead(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err(),
        }
    }

    async fn dies_within(pid: i32, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if dead(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        dead(pid)
    }

    #[tokio::test]
    async fn graceful_signal_reaches_helper_processes() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("helper.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pidfile.display());
        let handle = ProcessHandle::spawn(&sh(&script)).unwrap();
        let helper = read_pid(&pidfile).await;
        assert!(!dead(helper));

        handle.signal(SignalKind::Graceful).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert!(dies_within(helper, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn leader_exit_kills_leftover_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("helper.pid");
        let script = format!(
            "sleep 30 & echo $! > '{}'; sleep 0.2; exit 4",
            pidfile.display()
        );
        let handle = ProcessHandle::spawn(&sh(&script)).unwrap();
        let helper = read_pid(&pidfile).await;

        assert_eq!(handle.wait().await.code(), Some(4));
        assert!(dies_within(helper, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn dropped_handle_leaves_process_running() {
        let handle = ProcessHandle::spawn(&sh("exec sleep 30")).unwrap();
        #[allow(clippy::cast_possible_wrap)]
        let pid = handle.pid() as i32;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!dead(pid));

        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL)
            .unwrap();
        assert!(dies_within(pid, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn concurrent_waiters_see_same_status() {
        let handle = ProcessHandle::spawn(&sh("sleep 0.1; exit 2")).unwrap();
        let (a, b) = tokio::join!(handle.wait(), handle.wait());
        assert_eq!(a, b);
        assert_eq!(a.code(), Some(2));
    }
}
