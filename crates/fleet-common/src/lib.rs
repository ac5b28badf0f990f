//! # Fleet Common
//!
//! Shared building blocks for the fleet supervisor workspace.
//!
//! This crate holds the error taxonomy used across every component and the
//! small domain enums (severity, health result) that more than one crate
//! needs to agree on.

pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{
    ComplianceViolationError, ConfigError, HealthProbeTimeoutError, PortConflictError,
    ProcessError, ProcessResult, ProcessSpawnError, RestartBudgetExhaustedError, Result,
    SupervisorError,
};
pub use types::{HealthResult, Severity};
