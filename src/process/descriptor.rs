//! # Launch parameters for the backend process.
//!
//! [`ProcessDescriptor`] is created once, when the supervisor is built, and
//! never changes afterwards. Switching network (or any other launch input)
//! means tearing the supervisor down and building a new one.
//!
//! ## Example
//! ```rust
//! use nodevisor::ProcessDescriptor;
//!
//! let desc = ProcessDescriptor::builder("cardano-node", "mainnet")
//!     .args(["run", "--config", "config.yaml"])
//!     .extra_flags(["+RTS", "-N2", "-RTS"])
//!     .env("CARDANO_NODE_SOCKET_PATH", "/tmp/node.socket")
//!     .build();
//!
//! assert_eq!(desc.network(), "mainnet");
//! assert_eq!(
//!     desc.command_args().collect::<Vec<_>>(),
//!     ["run", "--config", "config.yaml", "+RTS", "-N2", "-RTS"],
//! );
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Immutable description of how to launch the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    network: String,
    log_file: Option<PathBuf>,
    extra_flags: Vec<String>,
}

impl ProcessDescriptor {
    /// Starts a builder for `program` serving `network`.
    pub fn builder(program: impl Into<PathBuf>, network: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            inner: ProcessDescriptor {
                program: program.into(),
                args: Vec::new(),
                working_dir: None,
                env: BTreeMap::new(),
                network: network.into(),
                log_file: None,
                extra_flags: Vec::new(),
            },
        }
    }

    /// Executable to run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Program rendered for logs and errors.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Base arguments, without installation flags.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if overridden.
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Environment overrides applied on top of the inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Network (chain) the backend must serve.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// File receiving the backend's stdout and stderr.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Installation-provided flags appended after the base arguments.
    pub fn extra_flags(&self) -> &[String] {
        &self.extra_flags
    }

    /// Full argument list: base arguments followed by extra flags.
    pub fn command_args(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .chain(self.extra_flags.iter())
            .map(String::as_str)
    }

    /// Builds the OS command (stdio is configured by the caller).
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args());
        cmd.envs(&self.env);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Builder for [`ProcessDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    inner: ProcessDescriptor,
}

impl DescriptorBuilder {
    /// Appends one base argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.inner.args.push(arg.into());
        self
    }

    /// Appends base arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.working_dir = Some(dir.into());
        self
    }

    /// Adds (or replaces) one environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.env.insert(key.into(), value.into());
        self
    }

    /// Redirects stdout and stderr to `path` (appending).
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.log_file = Some(path.into());
        self
    }

    /// Appends installation-provided flags.
    pub fn extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .extra_flags
            .extend(flags.into_iter().map(Into::into));
        self
    }

    /// Finishes the descriptor.
    pub fn build(self) -> ProcessDescriptor {
        self.inner
    }
}
