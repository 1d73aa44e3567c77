//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`]
//! fan-out, and (with the `logging` feature) the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! state machine ── publish(Event) ──► Bus ──► bus listener ──► SubscriberSet
//!                                                  ┌──────────────┼──────────────┐
//!                                                  ▼              ▼              ▼
//!                                              LogWriter       UI bridge      custom
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers** observe and react (logging, metrics, alerts)
//! - **Bridges** forward events to another surface (renderer, IPC)

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
