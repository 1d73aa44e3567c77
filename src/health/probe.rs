//! # Health probes.
//!
//! A [`Probe`] answers one question: is the backend accepting and answering
//! requests right now? It is distinct from OS-level presence
//! ([`ProcessHandle::is_alive`](crate::ProcessHandle::is_alive)).
//!
//! Built-in probes:
//! - [`TcpProbe`]: the status port accepts a TCP connection.
//! - [`HttpProbe`]: a `GET` on the status URL returns 2xx (`http-probe` feature).
//!
//! Probes never enforce their own deadline; the
//! [`HealthMonitor`](crate::HealthMonitor) wraps every call in a timeout.

use std::fmt;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The backend answered correctly.
    Reachable,
    /// The backend refused or answered with an error.
    Unreachable(String),
    /// No answer within the probe timeout.
    TimedOut,
}

impl ProbeOutcome {
    /// True only for [`ProbeOutcome::Reachable`].
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Reachable => f.write_str("reachable"),
            ProbeOutcome::Unreachable(why) => write!(f, "unreachable: {why}"),
            ProbeOutcome::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Application-level liveness check against the backend.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    /// Performs one probe.
    async fn probe(&self) -> ProbeOutcome;

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Succeeds when a TCP connection to `addr` can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    /// Probe for `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self) -> ProbeOutcome {
        match TcpStream::connect(self.addr.as_str()).await {
            Ok(_) => ProbeOutcome::Reachable,
            Err(err) => ProbeOutcome::Unreachable(err.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// Succeeds when `GET url` returns a 2xx status.
#[cfg(feature = "http-probe")]
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "http-probe")]
impl HttpProbe {
    /// Probe for a status endpoint such as `http://127.0.0.1:8090/v2/network/information`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "http-probe")]
#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> ProbeOutcome {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => ProbeOutcome::Reachable,
            Ok(resp) => ProbeOutcome::Unreachable(format!("http status {}", resp.status())),
            Err(err) => ProbeOutcome::Unreachable(err.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_probe_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert_eq!(TcpProbe::new(&addr).probe().await, ProbeOutcome::Reachable);

        drop(listener);
        assert!(matches!(
            TcpProbe::new(&addr).probe().await,
            ProbeOutcome::Unreachable(_)
        ));
    }

    #[cfg(feature = "http-probe")]
    #[tokio::test]
    async fn http_probe_reports_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/status", listener.local_addr().unwrap());
        tokio::spawn(async move {
            for reply in ["HTTP/1.1 200 OK", "HTTP/1.1 503 Service Unavailable"] {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let resp = format!("{reply}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                sock.write_all(resp.as_bytes()).await.unwrap();
            }
        });

        let probe = HttpProbe::new(url);
        assert_eq!(probe.probe().await, ProbeOutcome::Reachable);
        assert!(matches!(probe.probe().await, ProbeOutcome::Unreachable(m) if m.contains("503")));
    }

    #[test]
    fn only_reachable_is_success() {
        assert!(ProbeOutcome::Reachable.is_success());
        assert!(!ProbeOutcome::TimedOut.is_success());
        assert!(!ProbeOutcome::Unreachable("refused".into()).is_success());
    }
}
