//! # Event bus for broadcasting supervisor events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from the state machine, the shutdown
//! coordinator, the disk-space watcher and subscriber workers.
//!
//! ## Architecture
//! ```text
//! Publishers:                          Receivers:
//!   state machine ──┐
//!   coordinator   ──┼──► Bus ──┬──► bus listener ──► SubscriberSet
//!   disk watcher  ──┤          └──► NodeSupervisor::subscribe() (UI)
//!   subscriber set──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks; it calls `broadcast::Sender::send`.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for supervisor events.
///
/// Cloning is cheap; every clone publishes into the same ring buffer.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Arc<Event>>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(Arc::new(ev));
    }

    /// Creates a new receiver that will observe subsequent events.
    ///
    /// - Each call creates an **independent** receiver.
    /// - A receiver only gets events **sent after** it subscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn receivers_see_events_in_publish_order() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::NodeStarting));
        bus.publish(Event::new(EventKind::NodeRunning));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::NodeStarting);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::NodeRunning);
    }

    #[tokio::test]
    async fn slow_receiver_observes_lag() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(Event::new(EventKind::HealthCheckFailed));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
    }

    #[test]
    fn publish_without_receivers_is_silent() {
        Bus::new(0).publish(Event::new(EventKind::NodeStopped));
    }
}
