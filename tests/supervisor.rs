#![cfg(unix)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nodevisor::{
    CrashReason, Event, EventKind, NodePhase, NodeSupervisor, ProcessDescriptor, StopReason,
    Subscribe, SupervisorError,
};

use common::*;

const WAIT: Duration = Duration::from_secs(5);

fn is_stopped(s: &nodevisor::NodeState) -> bool {
    s.phase == NodePhase::Stopped
}

#[tokio::test]
async fn start_then_stop_leaves_no_process() {
    init_tracing();
    let sup = NodeSupervisor::builder(sleeper(), fast_config()).build();

    let started = sup.start().await.unwrap();
    assert_eq!(started.phase, NodePhase::Running);
    let pid = started.pid.expect("running node has a pid");
    assert!(!pid_gone(pid));

    let stopping = sup.stop().await.unwrap();
    assert_eq!(stopping.phase, NodePhase::Stopping);

    let stopped = sup.wait_for(is_stopped, WAIT).await.unwrap();
    assert_eq!(stopped.stop_reason, Some(StopReason::Requested));
    assert_eq!(stopped.pid, None);
    assert!(!stopped.force_killed);
    assert!(pid_gone(pid));

    sup.close().await;
}

#[tokio::test]
async fn start_is_idempotent_while_active() {
    let sup = NodeSupervisor::builder(sleeper(), fast_config()).build();
    let first = sup.start().await.unwrap();
    let second = sup.start().await.unwrap();
    assert_eq!(first.pid, second.pid);
    assert_eq!(first.seq, second.seq);
    sup.close().await;
}

#[tokio::test]
async fn transitions_are_published_in_commit_order() {
    let sup = NodeSupervisor::builder(sleeper(), fast_config()).build();
    let mut rx = sup.subscribe();

    sup.start().await.unwrap();
    sup.stop().await.unwrap();
    let events = collect_until(&mut rx, WAIT, |e| e.kind == EventKind::NodeStopped).await;

    let transitions: Vec<_> = events.iter().filter(|e| e.kind.is_transition()).collect();
    assert_eq!(
        transitions.iter().map(|e| e.kind).collect::<Vec<_>>(),
        [
            EventKind::NodeStarting,
            EventKind::NodeRunning,
            EventKind::NodeStopping,
            EventKind::NodeStopped,
        ]
    );
    for pair in transitions.windows(2) {
        assert!(pair[0].seq < pair[1].seq);
        assert_eq!(pair[0].next, pair[1].prev);
    }
    assert_eq!(transitions[0].prev, Some(NodePhase::Stopped));
    sup.close().await;
}

#[tokio::test]
async fn stop_while_starting_ends_stopped() {
    let mut cfg = fast_config();
    cfg.startup_window = Duration::ZERO;
    let sup = NodeSupervisor::builder(sleeper(), cfg)
        .with_probe(SwitchProbe::new(REFUSING))
        .build();

    assert_eq!(sup.start().await.unwrap().phase, NodePhase::Starting);
    assert_eq!(sup.stop().await.unwrap().phase, NodePhase::Stopping);

    let stopped = sup.wait_for(is_stopped, WAIT).await.unwrap();
    assert_eq!(stopped.stop_reason, Some(StopReason::Requested));
    assert_eq!(stopped.crash_reason, None);
    sup.close().await;
}

#[tokio::test]
async fn becomes_running_on_first_healthy_probe() {
    let probe = SwitchProbe::new(REFUSING);
    let sup = NodeSupervisor::builder(sleeper(), fast_config())
        .with_probe(probe.clone())
        .build();

    assert_eq!(sup.start().await.unwrap().phase, NodePhase::Starting);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sup.state().phase, NodePhase::Starting);

    probe.set(HEALTHY);
    sup.wait_for(|s| s.phase == NodePhase::Running, WAIT)
        .await
        .unwrap();
    sup.close().await;
}

#[tokio::test]
async fn graceful_stop_escalates_after_grace() {
    let sup = NodeSupervisor::builder(stubborn(), fast_config()).build();
    let mut rx = sup.subscribe();

    let pid = sup.start().await.unwrap().pid.unwrap();
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;
    sup.stop().await.unwrap();

    let stopped = sup.wait_for(is_stopped, WAIT).await.unwrap();
    assert!(stopped.force_killed);
    assert_eq!(stopped.last_exit.and_then(|e| e.signal()), Some(9));
    assert!(pid_gone(pid));

    let events = collect_until(&mut rx, WAIT, |e| e.kind == EventKind::NodeStopped).await;
    let escalations = events
        .iter()
        .filter(|e| e.kind == EventKind::ForceKillEscalated)
        .count();
    assert_eq!(escalations, 1);
    sup.close().await;
}

#[tokio::test]
async fn spawn_failure_crashes_and_retries() {
    let desc = ProcessDescriptor::builder("/nonexistent/cardano-node", "testnet").build();
    let sup = NodeSupervisor::builder(desc, fast_config()).build();
    let mut rx = sup.subscribe();

    let state = sup.start().await.unwrap();
    assert_eq!(state.phase, NodePhase::Crashed);
    assert!(matches!(state.crash_reason, Some(CrashReason::SpawnFailed(_))));
    assert_eq!(state.pid, None);

    let events = collect_until(&mut rx, WAIT, |e| e.kind == EventKind::NodeGaveUp).await;
    let kinds = kinds(&events);
    assert_eq!(
        kinds,
        [
            EventKind::NodeStarting,
            EventKind::NodeCrashed,
            EventKind::RestartScheduled,
            EventKind::NodeStarting,
            EventKind::NodeCrashed,
            EventKind::RestartScheduled,
            EventKind::NodeStarting,
            EventKind::NodeCrashed,
            EventKind::NodeGaveUp,
        ]
    );
    assert!(events[0].pid.is_none());
    let delays: Vec<_> = events.iter().filter_map(|e| e.delay()).collect();
    assert_eq!(delays, [Duration::from_millis(50), Duration::from_millis(100)]);
    sup.close().await;
}

#[tokio::test]
async fn gives_up_then_explicit_restart_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("healthy");
    let script = format!(
        "if [ -f '{}' ]; then exec sleep 30; else exit 3; fi",
        marker.display()
    );
    let sup = NodeSupervisor::builder(sh(&script), fast_config()).build();
    let mut rx = sup.subscribe();

    sup.start().await.unwrap();
    let events = collect_until(&mut rx, WAIT, |e| e.kind == EventKind::NodeGaveUp).await;
    let gave_up = events.last().unwrap();
    assert_eq!(gave_up.kind, EventKind::NodeGaveUp);
    assert!(gave_up.reason.as_deref().unwrap().contains("restart the application"));

    let crashes: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::NodeCrashed)
        .collect();
    assert_eq!(crashes.len(), 3);
    assert_eq!(crashes.iter().map(|e| e.attempt).collect::<Vec<_>>(), [Some(1), Some(2), Some(3)]);
    assert_eq!(crashes[0].exit.and_then(|e| e.code()), Some(3));

    let state = sup.state();
    assert_eq!(state.phase, NodePhase::Stopped);
    assert_eq!(state.stop_reason, Some(StopReason::GaveUp));
    assert!(state.is_terminal());
    assert_eq!(state.consecutive_crashes, 3);

    assert_eq!(sup.start().await.unwrap_err(), SupervisorError::GaveUp);

    std::fs::write(&marker, b"").unwrap();
    let restarted = sup.restart().await.unwrap();
    assert_eq!(restarted.phase, NodePhase::Running);
    assert_eq!(restarted.consecutive_crashes, 0);
    sup.close().await;
}

#[tokio::test]
async fn unresponsive_backend_is_killed_as_crash() {
    let probe = SwitchProbe::new(HEALTHY);
    let sup = NodeSupervisor::builder(sleeper(), no_restart_config())
        .with_probe(probe.clone())
        .build();
    let mut rx = sup.subscribe();

    sup.start().await.unwrap();
    let running = sup
        .wait_for(|s| s.phase == NodePhase::Running, WAIT)
        .await
        .unwrap();
    let pid = running.pid.unwrap();

    probe.set(HANGING);
    let crashed = sup
        .wait_for(|s| s.phase == NodePhase::Crashed, WAIT)
        .await
        .unwrap();
    assert_eq!(crashed.crash_reason, Some(CrashReason::HealthUnresponsive));
    assert_eq!(crashed.pid, None);
    assert!(pid_gone(pid));

    let events = collect_until(&mut rx, WAIT, |e| e.kind == EventKind::NodeCrashed).await;
    let failures: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::HealthCheckFailed)
        .map(|e| e.attempt)
        .collect();
    assert_eq!(failures, [Some(1), Some(2), Some(3)]);
    sup.close().await;
}

#[tokio::test]
async fn startup_window_expiry_crashes() {
    let mut cfg = no_restart_config();
    cfg.startup_window = Duration::from_millis(300);
    let sup = NodeSupervisor::builder(sleeper(), cfg)
        .with_probe(SwitchProbe::new(REFUSING))
        .build();

    let pid = sup.start().await.unwrap().pid.unwrap();
    let crashed = sup
        .wait_for(|s| s.phase == NodePhase::Crashed, WAIT)
        .await
        .unwrap();
    assert_eq!(crashed.crash_reason, Some(CrashReason::StartupTimeout));
    assert!(pid_gone(pid));

    // a stop from Crashed cancels the pending restart
    let stopped = sup.stop().await.unwrap();
    assert_eq!(stopped.phase, NodePhase::Stopped);
    assert_eq!(stopped.stop_reason, Some(StopReason::Requested));
    sup.close().await;
}

#[tokio::test]
async fn update_stops_and_allows_fresh_start() {
    // ignores SIGTERM, so Updating lasts for the whole grace period
    let sup = NodeSupervisor::builder(stubborn(), fast_config()).build();

    let err = sup.begin_update().await.unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidCommand { command: "update", .. }));

    let old_pid = sup.start().await.unwrap().pid.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sup.begin_update().await.unwrap().phase, NodePhase::Updating);

    let err = sup.start().await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::InvalidCommand {
            command: "start",
            phase: NodePhase::Updating
        }
    ));

    let stopped = sup.wait_for(is_stopped, WAIT).await.unwrap();
    assert_eq!(stopped.stop_reason, Some(StopReason::Updated));
    assert!(pid_gone(old_pid));

    let fresh = sup.start().await.unwrap();
    assert_eq!(fresh.phase, NodePhase::Running);
    assert_ne!(fresh.pid, Some(old_pid));
    sup.close().await;
}

#[tokio::test]
async fn restart_while_running_spawns_new_process() {
    let sup = NodeSupervisor::builder(sleeper(), fast_config()).build();
    let old_pid = sup.start().await.unwrap().pid.unwrap();

    assert_eq!(sup.restart().await.unwrap().phase, NodePhase::Stopping);
    let running = sup
        .wait_for(
            |s| s.phase == NodePhase::Running && s.pid != Some(old_pid),
            WAIT,
        )
        .await
        .unwrap();
    assert!(running.pid.is_some());
    assert!(pid_gone(old_pid));
    sup.close().await;
}

#[tokio::test]
async fn stop_reaches_processes_started_by_a_launcher() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("wallet.pid");
    let launcher = sh(&format!("sleep 30 & echo $! > '{}'; wait", pidfile.display()));
    let sup = NodeSupervisor::builder(launcher, fast_config()).build();

    sup.start().await.unwrap();
    let helper = read_pid_file(&pidfile).await;
    assert!(!pid_dead(helper));

    sup.stop().await.unwrap();
    let stopped = sup.wait_for(is_stopped, WAIT).await.unwrap();
    assert!(!stopped.force_killed);
    assert!(dies_within(helper, WAIT).await, "helper {helper} outlived Stopped");
    sup.close().await;
}

#[tokio::test]
async fn crashed_launcher_leaves_no_helpers() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("wallet.pid");
    let launcher = sh(&format!(
        "sleep 30 & echo $! > '{}'; sleep 0.2; exit 1",
        pidfile.display()
    ));
    let sup = NodeSupervisor::builder(launcher, no_restart_config()).build();

    sup.start().await.unwrap();
    let helper = read_pid_file(&pidfile).await;
    sup.wait_for(|s| s.phase == NodePhase::Crashed, WAIT)
        .await
        .unwrap();
    assert!(dies_within(helper, WAIT).await);
    sup.close().await;
}

#[tokio::test]
async fn close_kills_process_and_rejects_commands() {
    let sup = NodeSupervisor::builder(sleeper(), fast_config()).build();
    let pid = sup.start().await.unwrap().pid.unwrap();

    sup.close().await;
    assert!(pid_gone(pid));
    assert_eq!(sup.start().await.unwrap_err(), SupervisorError::Closed);
}

struct Recorder(Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, ev: &Event) {
        self.0.lock().unwrap().push(ev.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

struct Exploding;

#[async_trait]
impl Subscribe for Exploding {
    async fn on_event(&self, _ev: &Event) {
        panic!("subscriber bug");
    }

    fn name(&self) -> &'static str {
        "exploding"
    }
}

#[tokio::test]
async fn subscribers_see_transitions_despite_panicking_peer() {
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let sup = NodeSupervisor::builder(sleeper(), fast_config())
        .with_subscribers(vec![recorder.clone(), Arc::new(Exploding)])
        .build();

    sup.start().await.unwrap();
    sup.stop().await.unwrap();
    sup.wait_for(is_stopped, WAIT).await.unwrap();
    sup.close().await;

    let seen = recorder.0.lock().unwrap().clone();
    let transitions: Vec<_> = seen.into_iter().filter(EventKind::is_transition).collect();
    assert_eq!(
        transitions,
        [
            EventKind::NodeStarting,
            EventKind::NodeRunning,
            EventKind::NodeStopping,
            EventKind::NodeStopped,
        ]
    );
}
