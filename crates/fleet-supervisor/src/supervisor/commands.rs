//! Internal command protocol between the [`Supervisor`](super::Supervisor)
//! handle and the actor. Not exposed outside the supervisor module.

use super::types::{BatchResults, ComplianceContext, ReloadSummary, ServiceStatus};
use fleet_common::Result;
use fleet_compliance::ComplianceEntry;
use fleet_registry::RegistryConfig;
use tokio::sync::oneshot;

pub(super) enum SupervisorCommand {
    Start {
        name: String,
        skip_compliance_check: bool,
        resp: oneshot::Sender<Result<ServiceStatus>>,
    },
    Stop {
        name: String,
        resp: oneshot::Sender<Result<ServiceStatus>>,
    },
    /// Stop then start, as one queued pair.
    Restart {
        name: String,
        resp: oneshot::Sender<Result<ServiceStatus>>,
    },
    Status {
        name: String,
        resp: oneshot::Sender<Result<ServiceStatus>>,
    },
    StatusAll {
        resp: oneshot::Sender<Vec<ServiceStatus>>,
    },
    /// Re-enable automatic restarts and start every enabled auto-start service.
    StartAll {
        resp: oneshot::Sender<BatchResults>,
    },
    /// Disable automatic restarts and stop everything.
    ShutdownAll {
        resp: oneshot::Sender<BatchResults>,
    },
    /// Gather what a compliance report needs. `None` means every service.
    ComplianceContext {
        name: Option<String>,
        resp: oneshot::Sender<Result<ComplianceContext>>,
    },
    /// Store the findings of a finished report on the service statuses.
    RecordCompliance {
        entries: Vec<ComplianceEntry>,
    },
    Reload {
        config: Box<RegistryConfig>,
        resp: oneshot::Sender<Result<ReloadSummary>>,
    },
}
