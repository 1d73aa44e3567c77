//! # Non-blocking event fan-out to multiple subscribers.
//!
//! Provides [`SubscriberSet`], which distributes events to multiple
//! subscribers without ever blocking the publisher.
//!
//! ## Architecture
//! ```text
//! emit(event)
//!     │
//!     ├──► [mailbox 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (drop-oldest)       └──────► panic → SubscriberPanicked
//!     ├──► [mailbox 2] ──► worker 2 ──► subscriber2.on_event()
//!     └──► [mailbox N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `emit()` returns immediately
//! - **Per-subscriber FIFO**: each subscriber sees events in publish order
//! - **Drop oldest**: a full mailbox evicts its oldest event; the worker
//!   delivers `SubscriberOverflow { dropped }` before the next event, and the
//!   overflow is also published on the bus
//! - **No overflow loops**: overflow events are never re-published, and a
//!   bus overflow notice about a member of the set is not queued again (its
//!   subscriber already got it in-band)
//! - **Isolation**: a slow or panicking subscriber doesn't affect others
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state
//! inconsistent if a subscriber panics while holding a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

/// Queued events plus the evictions not yet reported.
struct Queue {
    events: VecDeque<Arc<Event>>,
    dropped: u64,
}

/// Bounded queue that evicts the oldest entry instead of rejecting the newest.
struct Mailbox {
    queue: Mutex<Queue>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(Queue {
                events: VecDeque::with_capacity(capacity.min(1024)),
                dropped: 0,
            }),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `ev`; returns `true` if an older event was evicted.
    fn push(&self, ev: Arc<Event>) -> bool {
        let evicted = {
            let mut q = self.lock();
            let evicted = q.events.len() >= self.capacity && q.events.pop_front().is_some();
            if evicted {
                q.dropped += 1;
            }
            q.events.push_back(ev);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Next event with the number of evictions that happened ahead of it.
    async fn recv(&self) -> Option<(Arc<Event>, u64)> {
        loop {
            {
                let mut q = self.lock();
                if let Some(ev) = q.events.pop_front() {
                    let lost = std::mem::take(&mut q.dropped);
                    return Some((ev, lost));
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Per-subscriber mailbox with metadata.
struct SubscriberChannel {
    name: &'static str,
    mailbox: Arc<Mailbox>,
}

/// Fan-out coordinator for multiple event subscribers.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let mailbox = Arc::new(Mailbox::new(sub.queue_capacity()));
            let handle = tokio::spawn(worker(sub, Arc::clone(&mailbox), bus.clone()));

            channels.push(SubscriberChannel { name, mailbox });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Emits an event to all subscribers (clones the event).
    pub fn emit(&self, event: &Event) {
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Emits a pre-allocated `Arc<Event>` to all subscribers.
    ///
    /// On eviction a `SubscriberOverflow` is published on the bus, unless the
    /// emitted event is itself an overflow notification. Overflow notices
    /// about a member of this set are not queued at all.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_overflow_evt = event.is_subscriber_overflow();
        if is_overflow_evt && self.has_member(event.source.as_deref()) {
            return;
        }

        for channel in &self.channels {
            if channel.mailbox.push(Arc::clone(&event)) && !is_overflow_evt {
                self.bus.publish(Event::subscriber_overflow(channel.name, 1));
            }
        }
    }

    fn has_member(&self, name: Option<&str>) -> bool {
        name.is_some_and(|name| self.channels.iter().any(|c| c.name == name))
    }

    /// Gracefully shuts down all subscriber workers.
    ///
    /// Pending events are still delivered before each worker exits.
    pub async fn shutdown(self) {
        for channel in &self.channels {
            channel.mailbox.close();
        }
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

async fn worker(sub: Arc<dyn Subscribe>, mailbox: Arc<Mailbox>, bus: Bus) {
    while let Some((ev, lost)) = mailbox.recv().await {
        if lost > 0 {
            deliver(&*sub, &Event::subscriber_overflow(sub.name(), lost), &bus).await;
        }
        deliver(&*sub, &ev, &bus).await;
    }
}

async fn deliver(sub: &dyn Subscribe, ev: &Event, bus: &Bus) {
    let fut = sub.on_event(ev);
    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        let info = {
            let any = &*panic_err;
            if let Some(msg) = any.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = any.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            }
        };
        bus.publish(Event::subscriber_panicked(sub.name(), info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{Semaphore, mpsc};

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
        gate: Option<Arc<Semaphore>>,
        cap: usize,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let _ = self.tx.send(ev.clone());
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn queue_capacity(&self) -> usize {
            self.cap
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = Bus::new(16);
        let set = SubscriberSet::new(
            vec![Arc::new(Recorder {
                tx,
                gate: None,
                cap: 16,
            })],
            bus,
        );
        let sent: Vec<u64> = (0..5)
            .map(|_| {
                let ev = Event::new(EventKind::HealthCheckFailed);
                set.emit(&ev);
                ev.seq
            })
            .collect();
        set.shutdown().await;

        let mut got = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            got.push(ev.seq);
        }
        assert_eq!(got, sent);
    }

    #[tokio::test]
    async fn full_mailbox_drops_oldest_and_reports_overflow() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let bus = Bus::new(64);
        let mut bus_rx = bus.subscribe();
        let set = SubscriberSet::new(
            vec![Arc::new(Recorder {
                tx,
                gate: Some(Arc::clone(&gate)),
                cap: 2,
            })],
            bus,
        );

        // First event is taken by the worker, which then blocks on the gate.
        let first = Event::new(EventKind::NodeStarting);
        set.emit(&first);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let queued: Vec<Event> = (0..5).map(|_| Event::new(EventKind::HealthCheckFailed)).collect();
        for ev in &queued {
            set.emit(ev);
        }

        gate.add_permits(100);
        set.shutdown().await;

        let mut got = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            got.push(ev);
        }
        assert_eq!(got[0].seq, first.seq);
        assert_eq!(got[1].kind, EventKind::SubscriberOverflow);
        assert_eq!(got[1].dropped, Some(3));
        assert_eq!(got[2].seq, queued[3].seq);
        assert_eq!(got[3].seq, queued[4].seq);
        assert_eq!(got.len(), 4);

        let mut overflow_on_bus = 0;
        while let Ok(ev) = bus_rx.try_recv() {
            if ev.kind == EventKind::SubscriberOverflow {
                overflow_on_bus += 1;
            }
        }
        assert_eq!(overflow_on_bus, 3);
    }

    #[tokio::test]
    async fn panic_is_isolated_and_published() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = Bus::new(16);
        let mut bus_rx = bus.subscribe();
        let set = SubscriberSet::new(
            vec![
                Arc::new(Panicker),
                Arc::new(Recorder {
                    tx,
                    gate: None,
                    cap: 8,
                }),
            ],
            bus,
        );
        set.emit(&Event::new(EventKind::NodeRunning));
        set.emit(&Event::new(EventKind::NodeStopping));
        set.shutdown().await;

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::NodeRunning);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::NodeStopping);

        let ev = bus_rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.source.as_deref(), Some("panicker"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn lost_count_belongs_to_the_popped_event() {
        let mailbox = Mailbox::new(2);
        let events: Vec<_> = (0..3).map(|_| Arc::new(Event::new(EventKind::NodeRunning))).collect();
        for ev in &events {
            mailbox.push(Arc::clone(ev));
        }

        let (ev, lost) = mailbox.recv().await.unwrap();
        assert_eq!((ev.seq, lost), (events[1].seq, 1));

        // evicted after the pop: reported with the next event, not this one
        mailbox.push(Arc::new(Event::new(EventKind::NodeStopping)));
        mailbox.push(Arc::new(Event::new(EventKind::NodeStopped)));
        let (ev, lost) = mailbox.recv().await.unwrap();
        assert_eq!((ev.kind, lost), (EventKind::NodeStopping, 1));
        let (_, lost) = mailbox.recv().await.unwrap();
        assert_eq!(lost, 0);
    }

    #[tokio::test]
    async fn overflow_notice_about_member_is_not_queued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = Bus::new(16);
        let set = SubscriberSet::new(
            vec![Arc::new(Recorder {
                tx,
                gate: None,
                cap: 4,
            })],
            bus,
        );
        set.emit(&Event::subscriber_overflow("recorder", 1));
        set.emit(&Event::subscriber_overflow("bus", 3));
        set.shutdown().await;

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.source.as_deref(), Some("bus"));
        assert_eq!(ev.dropped, Some(3));
        assert!(rx.try_recv().is_err());
    }
}
