//! Health checking for supervised services.
//!
//! - [`probe`]: one-shot HTTP, TCP and process probes
//! - [`health_monitor`]: the periodic loop that probes every running service
//!   and reports [`HealthEvent`]s to the supervisor

pub mod health_monitor;
pub mod probe;

use thiserror::Error;

/// Why a probe failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("Health check connection failed: {id} - {reason}")]
    ConnectionFailed { id: String, reason: String },

    #[error("Health check invalid response: {id} - {response}")]
    InvalidResponse { id: String, response: String },

    #[error("Health check process check failed: {id} - {reason}")]
    ProcessCheckFailed { id: String, reason: String },
}

pub type HealthCheckResult<T> = Result<T, HealthCheckError>;

pub use health_monitor::{probe_all, HealthEvent, HealthMonitor, HealthMonitorConfig, ProbeTarget};
pub use probe::{probe_for, run_probe, HealthProbe, HttpProbe, ProbeOutcome, ProcessProbe, TcpProbe};
