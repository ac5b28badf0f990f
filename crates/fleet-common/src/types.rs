//! Domain enums shared by several crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a compliance finding.
///
/// Ordered so that `Critical > Warning > Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Returns true if a finding of this severity prevents a start.
    pub fn blocks_start(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent health probe of a service.
///
/// `Unknown` means no probe has completed since the service last started.
/// A probe that times out is `Unhealthy`, never `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthResult {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthResult::Healthy => "HEALTHY",
            HealthResult::Unhealthy => "UNHEALTHY",
            HealthResult::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for HealthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
