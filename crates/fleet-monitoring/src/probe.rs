//! One-shot health probes.

use crate::{HealthCheckError, HealthCheckResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_common::{HealthProbeTimeoutError, HealthResult};
use fleet_registry::HealthCheckSpec;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// A single health check against one service.
///
/// Implementations report failure as an error and leave timeouts to
/// [`run_probe`].
#[async_trait]
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    /// Human readable target, e.g. the URL.
    fn target(&self) -> String;

    async fn check(&self) -> HealthCheckResult<()>;
}

/// `GET` an HTTP endpoint; any 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    pub id: String,
    pub endpoint: String,
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn target(&self) -> String {
        self.endpoint.clone()
    }

    async fn check(&self) -> HealthCheckResult<()> {
        let uri: Uri = self
            .endpoint
            .parse()
            .map_err(|e| HealthCheckError::InvalidResponse {
                id: self.id.clone(),
                response: format!("Invalid URI: {}", e),
            })?;

        let client = Client::builder(TokioExecutor::new()).build_http();
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("User-Agent", "fleet-supervisor/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| HealthCheckError::InvalidResponse {
                id: self.id.clone(),
                response: format!("Failed to build request: {}", e),
            })?;

        let response = client
            .request(request)
            .await
            .map_err(|e| HealthCheckError::ConnectionFailed {
                id: self.id.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HealthCheckError::InvalidResponse {
                id: self.id.clone(),
                response: format!("Unexpected status code: {}", status),
            })
        }
    }
}

/// Connect to a TCP port.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub id: String,
    pub addr: SocketAddr,
}

#[async_trait]
impl HealthProbe for TcpProbe {
    fn target(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn check(&self) -> HealthCheckResult<()> {
        TcpStream::connect(self.addr)
            .await
            .map(|_| ())
            .map_err(|e| HealthCheckError::ConnectionFailed {
                id: self.id.clone(),
                reason: e.to_string(),
            })
    }
}

/// PID liveness only.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    pub id: String,
    pub pid: u32,
}

#[async_trait]
impl HealthProbe for ProcessProbe {
    fn target(&self) -> String {
        format!("pid://{}", self.pid)
    }

    async fn check(&self) -> HealthCheckResult<()> {
        match fleet_process::process_exists(self.pid) {
            Ok(true) => Ok(()),
            Ok(false) => Err(HealthCheckError::ProcessCheckFailed {
                id: self.id.clone(),
                reason: format!("Process {} not found", self.pid),
            }),
            Err(e) => Err(HealthCheckError::ProcessCheckFailed {
                id: self.id.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Build the probe a service declares. Network probes target loopback.
pub fn probe_for(service: &str, spec: &HealthCheckSpec, port: u16, pid: u32) -> Box<dyn HealthProbe> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match spec {
        HealthCheckSpec::Http { path } => Box::new(HttpProbe {
            id: service.to_string(),
            endpoint: format!("http://{}{}", addr, path),
        }),
        HealthCheckSpec::Tcp => Box::new(TcpProbe {
            id: service.to_string(),
            addr,
        }),
        HealthCheckSpec::Process => Box::new(ProcessProbe {
            id: service.to_string(),
            pid,
        }),
    }
}

/// Result of one bounded probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// `Healthy` or `Unhealthy`; a completed probe is never `Unknown`.
    pub result: HealthResult,
    pub reason: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: u64,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        self.result == HealthResult::Healthy
    }
}

/// Run `probe` bounded by `timeout`. A timeout is an `Unhealthy` result.
pub async fn run_probe(service: &str, probe: &dyn HealthProbe, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    let (result, reason) = match tokio::time::timeout(timeout, probe.check()).await {
        Ok(Ok(())) => (HealthResult::Healthy, None),
        Ok(Err(e)) => (HealthResult::Unhealthy, Some(e.to_string())),
        Err(_) => {
            let err = HealthProbeTimeoutError {
                service: service.to_string(),
                timeout,
            };
            (HealthResult::Unhealthy, Some(err.to_string()))
        }
    };

    let response_time_ms = start.elapsed().as_millis() as u64;
    debug!(
        service,
        probe = %probe.target(),
        result = %result,
        response_time_ms,
        "Health probe complete"
    );

    ProbeOutcome {
        result,
        reason,
        checked_at: Utc::now(),
        response_time_ms,
    }
}
