//! # Example: supervise a node from a TOML file
//!
//! ```text
//! cargo run --example supervise_node -- node.toml
//! RUST_LOG=nodevisor=debug cargo run --example supervise_node -- node.toml
//! ```
//!
//! Starts the node described by the file, keeps it alive until Ctrl-C /
//! SIGTERM, then stops it through the shutdown coordinator. With a `[disk]`
//! section the node is also stopped while free space is low.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nodevisor::{
    DiskSpaceWatcher, Event, EventKind, NodeConfigFile, NodeSupervisor, ShutdownCoordinator,
    Subscribe,
};

/// Prints transitions the way a status bar would show them.
struct StatusLine;

#[async_trait]
impl Subscribe for StatusLine {
    async fn on_event(&self, ev: &Event) {
        if ev.kind.is_transition() {
            let phase = ev.next.map(|p| p.as_str()).unwrap_or("?");
            match &ev.reason {
                Some(reason) => println!("[node] {phase} ({reason})"),
                None => println!("[node] {phase}"),
            }
        } else if ev.kind == EventKind::RestartScheduled {
            println!("[node] restarting in {:?}", ev.delay().unwrap_or_default());
        }
    }

    fn name(&self) -> &'static str {
        "status-line"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "nodevisor=info".into()))
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: supervise_node <config.toml>")?;
    let file = NodeConfigFile::load(&path).with_context(|| format!("loading {path}"))?;

    let mut subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(StatusLine)];
    #[cfg(feature = "logging")]
    subs.push(Arc::new(nodevisor::LogWriter::new()));

    let mut builder =
        NodeSupervisor::builder(file.descriptor()?, file.supervisor_config()?).with_subscribers(subs);
    if let Some(probe) = file.probe()? {
        builder = builder.with_shared_probe(probe);
    }
    let sup = builder.build();
    let coordinator = ShutdownCoordinator::new(Arc::clone(&sup));

    let watcher_token = CancellationToken::new();
    let watcher = file.disk_config().map(|cfg| {
        DiskSpaceWatcher::new(cfg, Arc::clone(&sup), coordinator.clone())
            .spawn(watcher_token.clone())
    });

    sup.start().await?;

    let outcome = coordinator.run_until_signal().await?;
    println!("[node] shutdown: {outcome:?}");

    watcher_token.cancel();
    if let Some(task) = watcher {
        let _ = task.await;
    }
    sup.close().await;
    std::process::exit(outcome.exit_code());
}
