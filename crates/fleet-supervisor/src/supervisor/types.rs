//! Shared data types for the supervisor module.
//!
//! - Public types returned to callers (ServiceStatus, Violation, ReloadSummary)
//! - Crate-internal types used by the actor (ManagedService, OpRequest, ...)

use chrono::{DateTime, Utc};
use fleet_common::{HealthResult, Result, Severity};
use fleet_compliance::ComplianceEvaluator;
use fleet_process::ProcessHandle;
use fleet_registry::ServiceDefinition;
use fleet_service_state::{ServiceState, ServiceStateMachine};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ============================================================================
// Public Types
// ============================================================================

/// A failed compliance rule as recorded on the service status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
}

/// Runtime status of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub state_since: DateTime<Utc>,
    pub pid: Option<u32>,
    pub target_port: u16,
    pub enabled: bool,
    pub auto_start: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub last_health_check_time: Option<DateTime<Utc>>,
    pub last_health_result: HealthResult,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub compliance_violations: Vec<Violation>,
    /// Incremented on every start, restart and stop.
    pub generation: u64,
}

impl ServiceStatus {
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match self.state {
            ServiceState::Running => self.start_time.map(|t| Utc::now() - t),
            _ => None,
        }
    }
}

/// Changes applied by a registry reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

/// Per-service result of a fleet-wide operation.
pub type BatchResults = Vec<(String, Result<ServiceStatus>)>;

// ============================================================================
// Crate-Internal Types
// ============================================================================

/// Kind of a queued per-service operation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OpKind {
    Start { skip_compliance_check: bool, manual: bool },
    Stop,
    /// Restart decided by the policy engine for process run `generation`.
    AutoRestart { generation: u64, attempt: u32, delay: Duration },
    /// Restart budget exhausted for process run `generation`.
    GiveUp { generation: u64, attempts: u32 },
    /// Backoff delay elapsed; spawn again.
    DelayedSpawn { generation: u64 },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Start { .. } => "start",
            OpKind::Stop => "stop",
            OpKind::AutoRestart { .. } => "auto_restart",
            OpKind::GiveUp { .. } => "give_up",
            OpKind::DelayedSpawn { .. } => "delayed_spawn",
        }
    }
}

/// Where the result of an operation goes.
pub(crate) enum Reply {
    None,
    Caller(oneshot::Sender<Result<ServiceStatus>>),
    Batch(u64),
}

/// A queued operation waiting for the service to become idle.
pub(crate) struct OpRequest {
    pub kind: OpKind,
    pub reply: Reply,
}

impl OpRequest {
    pub fn internal(kind: OpKind) -> Self {
        Self {
            kind,
            reply: Reply::None,
        }
    }
}

/// The operation whose job is currently running for a service.
pub(crate) struct InFlightOp {
    pub kind: OpKind,
    pub reply: Reply,
}

/// A fleet-wide operation waiting for its per-service operations.
pub(crate) struct PendingBatch {
    pub name: &'static str,
    pub pending: usize,
    pub results: BatchResults,
    pub resp: oneshot::Sender<BatchResults>,
}

/// Actor-owned record of one service.
pub(super) struct ManagedService {
    pub definition: ServiceDefinition,
    pub state_machine: ServiceStateMachine,
    pub generation: u64,
    pub process: Option<ProcessHandle>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_health_check_time: Option<DateTime<Utc>>,
    pub last_health_result: HealthResult,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub compliance_violations: Vec<Violation>,
    /// The last manual start skipped the compliance check; restarts inherit it.
    pub compliance_override: bool,
    /// Backoff timer of a pending automatic restart.
    pub restart_timer: Option<JoinHandle<()>>,
    pub in_flight: Option<InFlightOp>,
    pub pending_ops: VecDeque<OpRequest>,
}

impl ManagedService {
    pub fn new(definition: ServiceDefinition) -> Self {
        let state_machine = ServiceStateMachine::new(&definition.name);
        Self {
            definition,
            state_machine,
            generation: 0,
            process: None,
            start_time: None,
            last_health_check_time: None,
            last_health_result: HealthResult::Unknown,
            restart_count: 0,
            last_error: None,
            compliance_violations: Vec::new(),
            compliance_override: false,
            restart_timer: None,
            in_flight: None,
            pending_ops: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn state(&self) -> ServiceState {
        self.state_machine.current_state()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn cancel_restart_timer(&mut self) -> bool {
        match self.restart_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.definition.name.clone(),
            state: self.state(),
            state_since: self.state_machine.last_transition_time(),
            pid: self.process.as_ref().map(ProcessHandle::pid),
            target_port: self.definition.target_port,
            enabled: self.definition.enabled,
            auto_start: self.definition.auto_start,
            start_time: self.start_time,
            last_health_check_time: self.last_health_check_time,
            last_health_result: self.last_health_result,
            restart_count: self.restart_count,
            last_error: self.last_error.clone(),
            compliance_violations: self.compliance_violations.clone(),
            generation: self.generation,
        }
    }
}

/// What the compliance report needs to know about one service.
#[derive(Debug, Clone)]
pub(crate) struct ComplianceInput {
    pub definition: ServiceDefinition,
    /// `(pid, port)` of a RUNNING service.
    pub running: Option<(u32, u16)>,
}

/// Snapshot of everything a compliance report is computed from.
#[derive(Debug, Clone)]
pub(crate) struct ComplianceContext {
    pub evaluator: ComplianceEvaluator,
    pub probe_timeout: Duration,
    pub services: Vec<ComplianceInput>,
}
