//! # Built-in subscribers
//!
//! - [`LogWriter`]: records every event through `tracing`.

mod log;

pub use log::LogWriter;
