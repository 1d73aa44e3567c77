//! Restart policies.
//!
//! This module groups the knobs that control **if/when** the backend is
//! restarted after a crash and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RestartPolicy`] sliding crash window, ceiling and stability reset
//! - [`BackoffPolicy`] how restart delays evolve (first / factor / max)
//! - [`CrashHistory`], [`RestartDecision`] policy input and output
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { restart: RestartPolicy { backoff: BackoffPolicy, .. }, .. }
//!      └─► core::machine uses:
//!           - record_crash() on every Crashed entry
//!           - decide() to schedule Starting again or give up
//! ```
//!
//! ## Defaults
//! - 5 crashes within 5 minutes give up.
//! - Delays start at 1s, double, and cap at 60s.
//! - 60s in `Running` resets the delay to the base.

mod backoff;
mod restart;

pub use backoff::BackoffPolicy;
pub use restart::{CrashHistory, RestartDecision, RestartPolicy};
