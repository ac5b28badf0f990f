//! Supervisor handle - the public API of the supervisor actor.
//!
//! A lightweight, cloneable handle. Every method sends a command to the actor
//! and awaits its response.

use super::commands::SupervisorCommand;
use super::types::{BatchResults, ComplianceContext, ReloadSummary, ServiceStatus};
use fleet_common::{Result, SupervisorError};
use fleet_compliance::{ComplianceReport, RuntimeSnapshot};
use fleet_monitoring::{probe_for, run_probe};
use fleet_registry::{RegistryConfig, ServiceDefinition};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone)]
pub struct Supervisor {
    pub(super) cmd_tx: mpsc::Sender<SupervisorCommand>,
}

impl Supervisor {
    // -------------------------------------------------------------------------
    // Error Mapping Helpers
    // -------------------------------------------------------------------------

    fn map_send_err(context: &str) -> SupervisorError {
        SupervisorError::unavailable(format!("{}: actor unavailable (channel closed)", context))
    }

    fn map_recv_err(context: &str) -> SupervisorError {
        SupervisorError::unavailable(format!("{}: actor dropped response (internal error)", context))
    }

    async fn request<T>(
        &self,
        context: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| Self::map_send_err(context))?;
        rx.await.map_err(|_| Self::map_recv_err(context))
    }

    // -------------------------------------------------------------------------
    // Service Control
    // -------------------------------------------------------------------------

    /// Start a service.
    ///
    /// Idempotent for RUNNING and STARTING services. Unless
    /// `skip_compliance_check` is set, a CRITICAL finding moves the service to
    /// BLOCKED and returns [`SupervisorError::ComplianceViolation`].
    pub async fn start(&self, name: &str, skip_compliance_check: bool) -> Result<ServiceStatus> {
        self.request("start", |resp| SupervisorCommand::Start {
            name: name.to_string(),
            skip_compliance_check,
            resp,
        })
        .await?
    }

    /// Stop a service: SIGTERM, grace period, then SIGKILL.
    ///
    /// A no-op for STOPPED, BLOCKED and FAILED services. Cancels a pending
    /// automatic restart.
    pub async fn stop(&self, name: &str) -> Result<ServiceStatus> {
        self.request("stop", |resp| SupervisorCommand::Stop {
            name: name.to_string(),
            resp,
        })
        .await?
    }

    /// Stop then start, with the compliance check. Refills the restart budget.
    pub async fn restart(&self, name: &str) -> Result<ServiceStatus> {
        self.request("restart", |resp| SupervisorCommand::Restart {
            name: name.to_string(),
            resp,
        })
        .await?
    }

    pub async fn status(&self, name: &str) -> Result<ServiceStatus> {
        self.request("status", |resp| SupervisorCommand::Status {
            name: name.to_string(),
            resp,
        })
        .await?
    }

    /// Status of every service, ordered by name.
    pub async fn status_all(&self) -> Result<Vec<ServiceStatus>> {
        self.request("status_all", |resp| SupervisorCommand::StatusAll { resp })
            .await
    }

    // -------------------------------------------------------------------------
    // Fleet Operations
    // -------------------------------------------------------------------------

    /// Enable automatic restarts and start every enabled auto-start service.
    ///
    /// Services are started concurrently; one failure does not affect the
    /// others.
    pub async fn start_all(&self) -> Result<BatchResults> {
        self.request("start_all", |resp| SupervisorCommand::StartAll { resp })
            .await
    }

    /// Disable automatic restarts and stop every service concurrently.
    pub async fn shutdown_all(&self) -> Result<BatchResults> {
        self.request("shutdown_all", |resp| SupervisorCommand::ShutdownAll { resp })
            .await
    }

    /// Replace the registry. See the actor for what may change at runtime.
    pub async fn reload(&self, config: RegistryConfig) -> Result<ReloadSummary> {
        self.request("reload", |resp| SupervisorCommand::Reload {
            config: Box::new(config),
            resp,
        })
        .await?
    }

    // -------------------------------------------------------------------------
    // Compliance
    // -------------------------------------------------------------------------

    /// Evaluate compliance for one service (`Some`) or the whole fleet.
    ///
    /// RUNNING services are evaluated against a fresh runtime snapshot; the
    /// others against their definition only. Findings are stored on the
    /// service statuses.
    pub async fn compliance_report(&self, name: Option<&str>) -> Result<ComplianceReport> {
        let context = self
            .request("compliance_report", |resp| SupervisorCommand::ComplianceContext {
                name: name.map(str::to_string),
                resp,
            })
            .await??;

        let snapshots = capture_snapshots(&context).await;
        let definitions: Vec<ServiceDefinition> = context
            .services
            .iter()
            .map(|s| s.definition.clone())
            .collect();
        let report = context.evaluator.evaluate_all(&definitions, &snapshots);

        self.cmd_tx
            .send(SupervisorCommand::RecordCompliance {
                entries: report.services.clone(),
            })
            .await
            .map_err(|_| Self::map_send_err("compliance_report"))?;

        Ok(report)
    }
}

/// Probe and inspect every RUNNING service of `context` concurrently.
async fn capture_snapshots(context: &ComplianceContext) -> HashMap<String, RuntimeSnapshot> {
    let captures = context.services.iter().filter_map(|input| {
        let (pid, port) = input.running?;
        let definition = &input.definition;
        Some(async move {
            let check = definition.effective_health_check();
            let probe = probe_for(&definition.name, &check, port, pid);
            let outcome = run_probe(&definition.name, probe.as_ref(), context.probe_timeout).await;
            let snapshot = RuntimeSnapshot::capture(pid, port, Some(outcome.is_healthy()));
            (definition.name.clone(), snapshot)
        })
    });

    futures::future::join_all(captures).await.into_iter().collect()
}
