//! Error types used by the nodevisor runtime.
//!
//! This module defines the failures that can cross a public API boundary:
//!
//! - [`SpawnError`] launching the backend executable failed.
//! - [`ProcessError`] signalling an OS process failed.
//! - [`SupervisorError`] a command to the supervisor could not be honored.
//! - [`ConfigError`] a launcher configuration file is unreadable or invalid.
//!
//! Crashes, health failures and stop timeouts are **not** errors: the state
//! machine resolves them into a [`NodeState`](crate::NodeState) value and
//! publishes them on the bus. Every enum exposes `as_label` for logs.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::NodePhase;

/// # Errors produced while launching the backend process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The executable does not exist (or is not on `PATH`).
    #[error("executable not found: {program}")]
    NotFound {
        /// Program as written in the descriptor.
        program: String,
    },

    /// The executable exists but may not be executed by this user.
    #[error("permission denied launching {program}")]
    PermissionDenied {
        /// Program as written in the descriptor.
        program: String,
    },

    /// The log redirection target could not be opened.
    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        /// Configured log file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Any other OS-level spawn failure.
    #[error("failed to spawn {program}: {source}")]
    Io {
        /// Program as written in the descriptor.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Classifies an I/O error returned by `Command::spawn`.
    pub fn from_io(program: impl Into<String>, err: io::Error) -> Self {
        let program = program.into();
        match err.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound { program },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { program },
            _ => SpawnError::Io {
                program,
                source: err,
            },
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use nodevisor::SpawnError;
    ///
    /// let err = SpawnError::NotFound { program: "cardano-node".into() };
    /// assert_eq!(err.as_label(), "spawn_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::NotFound { .. } => "spawn_not_found",
            SpawnError::PermissionDenied { .. } => "spawn_permission_denied",
            SpawnError::LogFile { .. } => "spawn_log_file",
            SpawnError::Io { .. } => "spawn_io",
        }
    }
}

/// # Errors produced when signalling a process.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The process has already exited and been reaped.
    #[error("process is not running")]
    NotRunning,
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::NotRunning => "process_not_running",
        }
    }
}

/// # Errors returned by supervisor commands.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// The restart ceiling was exceeded; only an explicit restart recovers.
    #[error("node gave up after repeated crashes; restart the application")]
    GaveUp,

    /// The command is not valid in the current phase.
    #[error("cannot {command} while node is {phase}")]
    InvalidCommand {
        /// Command name.
        command: &'static str,
        /// Phase the machine was in.
        phase: NodePhase,
    },

    /// The state machine task has exited.
    #[error("supervisor is closed")]
    Closed,

    /// The backend was left running on exit and is no longer owned.
    #[error("node was detached and is no longer supervised")]
    Detached,

    /// A bounded wait on the node state expired.
    #[error("node state wait timed out after {timeout:?}")]
    WaitTimeout {
        /// Configured wait bound.
        timeout: Duration,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use nodevisor::SupervisorError;
    ///
    /// assert_eq!(SupervisorError::GaveUp.as_label(), "supervisor_gave_up");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::GaveUp => "supervisor_gave_up",
            SupervisorError::InvalidCommand { .. } => "supervisor_invalid_command",
            SupervisorError::Closed => "supervisor_closed",
            SupervisorError::Detached => "supervisor_detached",
            SupervisorError::WaitTimeout { .. } => "supervisor_wait_timeout",
        }
    }
}

/// # Errors produced while loading launcher configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The file is not valid TOML for [`NodeConfigFile`](crate::NodeConfigFile).
    #[error("invalid configuration: {source}")]
    Parse {
        /// Parser failure with location.
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but is out of range.
    #[error("invalid value for {field}: {message}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}
