//! # Launcher configuration file.
//!
//! [`NodeConfigFile`] is the TOML document a host reads at startup. It is
//! converted into the immutable [`ProcessDescriptor`], a
//! [`SupervisorConfig`], an optional health [`Probe`] and an optional
//! [`DiskSpaceConfig`]. All durations are milliseconds; every section except
//! `[node]` may be omitted.
//!
//! ```toml
//! [node]
//! program = "/opt/wallet/bin/cardano-node"
//! network = "mainnet"
//! args = ["run", "--config", "config.yaml"]
//! working_dir = "/var/lib/wallet"
//! log_file = "/var/log/wallet/node.log"
//! extra_flags = ["+RTS", "-N2", "-RTS"]
//!
//! [node.env]
//! CARDANO_NODE_SOCKET_PATH = "/var/lib/wallet/node.socket"
//!
//! [supervisor]
//! grace_ms = 30000
//! max_crashes = 5
//!
//! [health]
//! kind = "tcp"
//! addr = "127.0.0.1:3001"
//!
//! [disk]
//! path = "/var/lib/wallet"
//! required_bytes = 2147483648
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::SupervisorConfig;
use crate::diskspace::DiskSpaceConfig;
use crate::error::ConfigError;
use crate::health::{Probe, TcpProbe};
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::process::ProcessDescriptor;

/// Root of the TOML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfigFile {
    /// Launch parameters.
    pub node: NodeSection,
    /// Timing and restart policy.
    #[serde(default)]
    pub supervisor: SupervisorSection,
    /// Health probe; absent = OS-level supervision only.
    #[serde(default)]
    pub health: Option<HealthSection>,
    /// Disk-space watcher; absent = disabled.
    #[serde(default)]
    pub disk: Option<DiskSection>,
}

/// `[node]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    pub program: PathBuf,
    pub network: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub extra_flags: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[supervisor]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorSection {
    pub startup_window_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub failure_threshold: u32,
    pub grace_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub kill_timeout_ms: u64,
    pub bus_capacity: usize,
    pub restart_window_ms: u64,
    pub max_crashes: u32,
    pub backoff_first_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    pub stability_threshold_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        let cfg = SupervisorConfig::default();
        let ms = |d: Duration| d.as_millis().min(u128::from(u64::MAX)) as u64;
        Self {
            startup_window_ms: ms(cfg.startup_window),
            probe_interval_ms: ms(cfg.probe_interval),
            probe_timeout_ms: ms(cfg.probe_timeout),
            failure_threshold: cfg.failure_threshold,
            grace_ms: ms(cfg.grace),
            shutdown_timeout_ms: ms(cfg.shutdown_timeout),
            kill_timeout_ms: ms(cfg.kill_timeout),
            bus_capacity: cfg.bus_capacity,
            restart_window_ms: ms(cfg.restart.window),
            max_crashes: cfg.restart.max_crashes,
            backoff_first_ms: ms(cfg.restart.backoff.first),
            backoff_max_ms: ms(cfg.restart.backoff.max),
            backoff_factor: cfg.restart.backoff.factor,
            stability_threshold_ms: ms(cfg.restart.stability_threshold),
        }
    }
}

/// `[health]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthSection {
    /// `GET url` must return 2xx.
    Http { url: String },
    /// `addr` must accept a TCP connection.
    Tcp { addr: String },
}

/// `[disk]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSection {
    pub path: PathBuf,
    #[serde(default)]
    pub required_bytes: Option<u64>,
    #[serde(default)]
    pub hysteresis_bytes: Option<u64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

impl NodeConfigFile {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { source })
    }

    /// Reads and parses `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Launch parameters.
    pub fn descriptor(&self) -> Result<ProcessDescriptor, ConfigError> {
        let node = &self.node;
        if node.program.as_os_str().is_empty() {
            return Err(invalid("node.program", "must not be empty"));
        }
        if node.network.trim().is_empty() {
            return Err(invalid("node.network", "must not be empty"));
        }

        let mut b = ProcessDescriptor::builder(node.program.clone(), node.network.clone())
            .args(node.args.iter().cloned())
            .extra_flags(node.extra_flags.iter().cloned());
        if let Some(dir) = &node.working_dir {
            b = b.working_dir(dir.clone());
        }
        if let Some(log) = &node.log_file {
            b = b.log_file(log.clone());
        }
        for (k, v) in &node.env {
            b = b.env(k.clone(), v.clone());
        }
        Ok(b.build())
    }

    /// Runtime configuration, validated.
    pub fn supervisor_config(&self) -> Result<SupervisorConfig, ConfigError> {
        let s = &self.supervisor;
        if s.probe_interval_ms == 0 {
            return Err(invalid("supervisor.probe_interval_ms", "must be positive"));
        }
        if s.probe_timeout_ms == 0 {
            return Err(invalid("supervisor.probe_timeout_ms", "must be positive"));
        }
        if !s.backoff_factor.is_finite() || s.backoff_factor < 1.0 {
            return Err(invalid("supervisor.backoff_factor", "must be a finite number >= 1.0"));
        }
        if s.backoff_first_ms > s.backoff_max_ms {
            return Err(invalid(
                "supervisor.backoff_first_ms",
                "must not exceed backoff_max_ms",
            ));
        }

        Ok(SupervisorConfig {
            startup_window: Duration::from_millis(s.startup_window_ms),
            probe_interval: Duration::from_millis(s.probe_interval_ms),
            probe_timeout: Duration::from_millis(s.probe_timeout_ms),
            failure_threshold: s.failure_threshold,
            grace: Duration::from_millis(s.grace_ms),
            shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms),
            kill_timeout: Duration::from_millis(s.kill_timeout_ms),
            bus_capacity: s.bus_capacity,
            restart: RestartPolicy {
                window: Duration::from_millis(s.restart_window_ms),
                max_crashes: s.max_crashes,
                backoff: BackoffPolicy {
                    first: Duration::from_millis(s.backoff_first_ms),
                    max: Duration::from_millis(s.backoff_max_ms),
                    factor: s.backoff_factor,
                },
                stability_threshold: Duration::from_millis(s.stability_threshold_ms),
            },
        })
    }

    /// Health probe described by `[health]`, if any.
    pub fn probe(&self) -> Result<Option<Arc<dyn Probe>>, ConfigError> {
        match &self.health {
            None => Ok(None),
            Some(HealthSection::Tcp { addr }) => Ok(Some(Arc::new(TcpProbe::new(addr.clone())))),
            #[cfg(feature = "http-probe")]
            Some(HealthSection::Http { url }) => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid("health.url", "must start with http:// or https://"));
                }
                Ok(Some(Arc::new(crate::health::HttpProbe::new(url.clone()))))
            }
            #[cfg(not(feature = "http-probe"))]
            Some(HealthSection::Http { .. }) => Err(invalid(
                "health.kind",
                "http probes require the `http-probe` feature",
            )),
        }
    }

    /// Disk watcher settings described by `[disk]`, if any.
    pub fn disk_config(&self) -> Option<DiskSpaceConfig> {
        self.disk.as_ref().map(|d| {
            let mut cfg = DiskSpaceConfig::new(d.path.clone());
            if let Some(v) = d.required_bytes {
                cfg.required_bytes = v;
            }
            if let Some(v) = d.hysteresis_bytes {
                cfg.hysteresis_bytes = v;
            }
            if let Some(ms) = d.interval_ms {
                cfg.interval = Duration::from_millis(ms);
            }
            cfg
        })
    }
}

fn invalid(field: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.to_string(),
    }
}
