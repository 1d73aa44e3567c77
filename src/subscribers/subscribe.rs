//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging observers (UI bridge,
//! logging, metrics) into the supervisor. Each subscriber is driven by a
//! dedicated worker loop fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries); they do **not**
//!   block the state machine nor other subscribers.
//! - Each subscriber **declares** its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. When the queue is full the **oldest**
//!   pending event is evicted, and the subscriber later receives a
//!   `SubscriberOverflow` event with the number of lost events.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use nodevisor::{Event, EventKind, Subscribe};
//!
//! struct CrashCounter(std::sync::atomic::AtomicU32);
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::NodeCrashed {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "crash-counter" }
//!     fn queue_capacity(&self) -> usize { 64 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs and overflow events).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue (minimum 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
