//! # Exit status of a reaped process.

use std::fmt;

/// How a backend process terminated.
///
/// Either field may be absent: on Unix a signalled process has no exit code,
/// and a process whose status could not be collected has neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    /// Builds a status from raw parts.
    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    /// Exit code, if the process exited normally.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Terminating signal number (Unix only).
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// True for exit code `0`.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}
