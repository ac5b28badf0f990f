//! Error types for the fleet supervisor.
//!
//! The taxonomy follows the lifecycle of a supervised fleet:
//!
//! - [`ConfigError`] and [`PortConflictError`] are load-time errors. They abort
//!   the whole registry load; a partial roster is never supervised.
//! - [`ComplianceViolationError`], [`ProcessSpawnError`],
//!   [`HealthProbeTimeoutError`] and [`RestartBudgetExhaustedError`] are
//!   runtime errors scoped to one service. They change that service's state
//!   and never take the supervisor down.
//! - [`SupervisorError`] is the umbrella type returned by supervisor internals.
//!
//! [`ProcessError`] is the low-level error of the OS process primitives.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Two services claim the same port.
///
/// Raised by the registry at load time (two enabled services declare the same
/// `target_port`) and by the port allocator at runtime (a reservation for a
/// port already held by a different service).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Port conflict: port {port} is claimed by both '{holder}' and '{requester}'")]
pub struct PortConflictError {
    pub port: u16,
    /// Service that already owns the port (or was declared first).
    pub holder: String,
    /// Service whose claim was rejected.
    pub requester: String,
}

impl PortConflictError {
    pub fn new(port: u16, holder: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            port,
            holder: holder.into(),
            requester: requester.into(),
        }
    }

    /// Returns true if `service` is one of the two parties of the conflict.
    pub fn involves(&self, service: &str) -> bool {
        self.holder == service || self.requester == service
    }
}

/// Registry loading and validation errors. Always fatal for the load.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Failed to read registry file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse registry: {reason}")]
    Parse { reason: String },

    #[error("Invalid registry: {message}")]
    Validation { message: String },

    #[error("Duplicate service name: {name}")]
    DuplicateName { name: String },

    #[error("Service '{service}': port {port} is outside the allowed range {min}-{max}")]
    PortOutOfRange {
        service: String,
        port: u16,
        min: u16,
        max: u16,
    },

    #[error(transparent)]
    PortConflict(#[from] PortConflictError),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }
}

/// A CRITICAL compliance finding prevented a start. The service is BLOCKED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Service '{service}' blocked by compliance rule '{rule_id}': {fix_hint}")]
pub struct ComplianceViolationError {
    pub service: String,
    pub rule_id: String,
    pub fix_hint: String,
}

/// The OS refused to create the process. The service stays STOPPED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to spawn service '{service}': {reason}")]
pub struct ProcessSpawnError {
    pub service: String,
    pub reason: String,
}

/// A health probe did not answer in time. Recorded as UNHEALTHY.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Health probe for '{service}' timed out after {timeout:?}")]
pub struct HealthProbeTimeoutError {
    pub service: String,
    pub timeout: Duration,
}

/// The restart budget is spent. The service is FAILED until a manual start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Restart budget exhausted for '{service}' after {attempts} attempt(s)")]
pub struct RestartBudgetExhaustedError {
    pub service: String,
    pub attempts: u32,
}

/// Umbrella error for supervisor operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    PortConflict(#[from] PortConflictError),

    #[error(transparent)]
    ComplianceViolation(#[from] ComplianceViolationError),

    #[error(transparent)]
    ProcessSpawn(#[from] ProcessSpawnError),

    #[error(transparent)]
    HealthProbeTimeout(#[from] HealthProbeTimeoutError),

    #[error(transparent)]
    RestartBudgetExhausted(#[from] RestartBudgetExhaustedError),

    #[error("Service not found: {service}")]
    NotFound { service: String },

    #[error("Operation '{operation}' not allowed for '{service}' in state {state}")]
    OperationNotAllowed {
        service: String,
        operation: String,
        state: String,
    },

    #[error("Failed to stop service '{service}': {reason}")]
    Termination { service: String, reason: String },

    #[error("Supervisor unavailable: {reason}")]
    Unavailable { reason: String },
}

impl SupervisorError {
    pub fn not_found(service: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
        }
    }

    pub fn operation_not_allowed(
        service: impl Into<String>,
        operation: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self::OperationNotAllowed {
            service: service.into(),
            operation: operation.into(),
            state: state.into(),
        }
    }

    pub fn termination(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Termination {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

// ==============================================================================
// OS Process Errors
// ==============================================================================

/// Errors of the low-level process primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Signal delivery failed: pid {pid} - {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("Process check failed: pid {pid} - {reason}")]
    CheckFailed { pid: u32, reason: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },
}

impl ProcessError {
    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn signal_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
