//! OS process plumbing: launch parameters, the process handle and exit status.
//!
//! ## Contents
//! - [`ProcessDescriptor`] immutable launch parameters (built once)
//! - [`ProcessHandle`] spawn / signal / wait / is_alive for one process
//! - [`ExitStatus`] exit code or terminating signal
//!
//! Only the state machine holds a [`ProcessHandle`]; no other component may
//! signal or reap the backend.

mod descriptor;
mod handle;
mod status;

pub use descriptor::{DescriptorBuilder, ProcessDescriptor};
pub use handle::{ProcessHandle, SignalKind};
pub use status::ExitStatus;
