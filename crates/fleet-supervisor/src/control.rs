//! Control Surface: the operator-facing operations.
//!
//! Wraps a [`Supervisor`] and turns every result into a value: operations
//! return an [`OperationOutcome`] instead of an error, so callers (the HTTP
//! API, the CLI) can report partial failures of fleet-wide operations.

use crate::supervisor::{BatchResults, ReloadSummary, ServiceStatus, Supervisor};
use fleet_common::{Result, SupervisorError};
use fleet_compliance::ComplianceReport;
use fleet_registry::RegistryConfig;
use fleet_service_state::ServiceState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of one control operation on one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub service: String,
    pub success: bool,
    /// State after the operation, if the service exists.
    pub state: Option<ServiceState>,
    pub message: String,
}

impl OperationOutcome {
    fn succeeded(status: &ServiceStatus, message: impl Into<String>) -> Self {
        Self {
            service: status.name.clone(),
            success: true,
            state: Some(status.state),
            message: message.into(),
        }
    }

    fn failed(service: &str, state: Option<ServiceState>, error: &SupervisorError) -> Self {
        Self {
            service: service.to_string(),
            success: false,
            state,
            message: error.to_string(),
        }
    }
}

/// Outcome of a registry reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub success: bool,
    pub message: String,
    pub summary: Option<ReloadSummary>,
}

#[derive(Clone)]
pub struct ControlSurface {
    supervisor: Supervisor,
    /// Registry file used by `reload` when no path is given.
    registry_path: Option<PathBuf>,
}

impl ControlSurface {
    pub fn new(supervisor: Supervisor, registry_path: Option<PathBuf>) -> Self {
        Self {
            supervisor,
            registry_path,
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn start(&self, name: &str, skip_compliance_check: bool) -> OperationOutcome {
        info!(service = name, skip_compliance_check, "Control: start");
        let result = self.supervisor.start(name, skip_compliance_check).await;
        self.outcome(name, result, "start").await
    }

    pub async fn stop(&self, name: &str) -> OperationOutcome {
        info!(service = name, "Control: stop");
        let result = self.supervisor.stop(name).await;
        self.outcome(name, result, "stop").await
    }

    pub async fn restart(&self, name: &str) -> OperationOutcome {
        info!(service = name, "Control: restart");
        let result = self.supervisor.restart(name).await;
        self.outcome(name, result, "restart").await
    }

    pub async fn status(&self, name: &str) -> Result<ServiceStatus> {
        self.supervisor.status(name).await
    }

    pub async fn status_all(&self) -> Result<Vec<ServiceStatus>> {
        self.supervisor.status_all().await
    }

    pub async fn start_all(&self) -> Vec<OperationOutcome> {
        info!("Control: start all");
        match self.supervisor.start_all().await {
            Ok(results) => batch_outcomes(results, "start"),
            Err(e) => vec![OperationOutcome::failed("*", None, &e)],
        }
    }

    pub async fn shutdown(&self) -> Vec<OperationOutcome> {
        info!("Control: shutdown");
        match self.supervisor.shutdown_all().await {
            Ok(results) => batch_outcomes(results, "stop"),
            Err(e) => vec![OperationOutcome::failed("*", None, &e)],
        }
    }

    pub async fn compliance_report(&self, name: Option<&str>) -> Result<ComplianceReport> {
        self.supervisor.compliance_report(name).await
    }

    /// Re-read the registry from `path` (or the file the supervisor was
    /// started with) and apply it.
    pub async fn reload(&self, path: Option<&Path>) -> ReloadOutcome {
        let Some(path) = path.or(self.registry_path.as_deref()) else {
            return ReloadOutcome {
                success: false,
                message: "no registry file to reload from".to_string(),
                summary: None,
            };
        };
        info!("Control: reload from {}", path.display());

        let applied = match RegistryConfig::load_from_file(path) {
            Ok(config) => self.supervisor.reload(config).await,
            Err(e) => Err(e.into()),
        };

        match applied {
            Ok(summary) => ReloadOutcome {
                success: true,
                message: format!(
                    "{} added, {} removed, {} updated",
                    summary.added.len(),
                    summary.removed.len(),
                    summary.updated.len()
                ),
                summary: Some(summary),
            },
            Err(e) => {
                warn!("Reload rejected: {}", e);
                ReloadOutcome {
                    success: false,
                    message: e.to_string(),
                    summary: None,
                }
            }
        }
    }

    async fn outcome(
        &self,
        name: &str,
        result: Result<ServiceStatus>,
        verb: &str,
    ) -> OperationOutcome {
        match result {
            Ok(status) => OperationOutcome::succeeded(&status, format!("{} {}: {}", verb, name, status.state)),
            Err(e) => {
                let state = self.supervisor.status(name).await.ok().map(|s| s.state);
                OperationOutcome::failed(name, state, &e)
            }
        }
    }
}

fn batch_outcomes(results: BatchResults, verb: &str) -> Vec<OperationOutcome> {
    results
        .into_iter()
        .map(|(name, result)| match result {
            Ok(status) => OperationOutcome::succeeded(&status, format!("{} {}: {}", verb, name, status.state)),
            Err(e) => {
                let state = match &e {
                    SupervisorError::ComplianceViolation(_) => Some(ServiceState::Blocked),
                    _ => None,
                };
                OperationOutcome::failed(&name, state, &e)
            }
        })
        .collect()
}
