//! Supervisor actor: the single owner of every service's runtime state.
//!
//! The actor never blocks. Process work (spawning, terminating) runs on the
//! [`OpRunner`]; exits, backoff timers and finished jobs come back as
//! [`Completion`]s. Per service at most one operation is in flight and further
//! requests wait in a FIFO queue.
//!
//! Every start, restart and stop increments the service's generation. Exit
//! events, health results and restart decisions carry the generation they were
//! produced for and are dropped when it no longer matches.

use super::commands::SupervisorCommand;
use super::ops::{Completion, Job, JobOutput, OpRunner, MAX_CONCURRENT_JOBS};
use super::types::{
    BatchResults, ComplianceContext, ComplianceInput, InFlightOp, ManagedService, OpKind,
    OpRequest, PendingBatch, ReloadSummary, Reply, ServiceStatus, Violation,
};
use crate::ports::PortAllocator;
use crate::restart::{PolicyInput, RestartAction, RestartDecision, RestartPolicyConfig};
use fleet_common::{
    ComplianceViolationError, ProcessError, ProcessResult, ProcessSpawnError,
    RestartBudgetExhaustedError, Result, SupervisorError,
};
use fleet_compliance::{ComplianceEntry, ComplianceEvaluator};
use fleet_monitoring::{HealthEvent, ProbeTarget};
use fleet_process::{ExitInfo, LaunchSpec, ProcessHandle, TerminationOutcome};
use fleet_registry::{RegistryConfig, ServiceDefinition, SupervisorOptions};
use fleet_service_state::ServiceState;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Queued operations allowed per service before new requests are refused.
const MAX_PENDING_OPS_PER_SERVICE: usize = 32;

/// Result of deciding an operation: either done on the spot or a job to run.
enum OpStep {
    Done(Result<ServiceStatus>),
    Job(Job),
}

pub(super) struct SupervisorActor {
    services: BTreeMap<String, ManagedService>,
    options: SupervisorOptions,
    evaluator: ComplianceEvaluator,
    ports: PortAllocator,
    /// Cleared by shutdown_all, set again by start_all.
    auto_restart: bool,
    runner: OpRunner,
    completed_tx: mpsc::Sender<Completion>,
    targets_tx: watch::Sender<Vec<ProbeTarget>>,
    policy_tx: mpsc::UnboundedSender<PolicyInput>,
    batches: HashMap<u64, PendingBatch>,
    next_batch_id: u64,
}

impl SupervisorActor {
    pub fn new(
        config: RegistryConfig,
        completed_tx: mpsc::Sender<Completion>,
        targets_tx: watch::Sender<Vec<ProbeTarget>>,
        policy_tx: mpsc::UnboundedSender<PolicyInput>,
    ) -> Self {
        let evaluator = ComplianceEvaluator::new(config.compliance.rules);

        let mut services = BTreeMap::new();
        for definition in config.services {
            let mut service = ManagedService::new(definition);
            service.compliance_violations = violations(&evaluator.evaluate(&service.definition, None));
            services.insert(service.name().to_string(), service);
        }

        Self {
            services,
            options: config.supervisor,
            evaluator,
            ports: PortAllocator::new(),
            auto_restart: true,
            runner: OpRunner::new(MAX_CONCURRENT_JOBS, completed_tx.clone()),
            completed_tx,
            targets_tx,
            policy_tx,
            batches: HashMap::new(),
            next_batch_id: 1,
        }
    }

    /// Main event loop.
    ///
    /// Biased: completions first so in-flight operations clear promptly, then
    /// commands, then health results and restart decisions. When every handle
    /// is dropped the actor stops all services and exits once they are down.
    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SupervisorCommand>,
        mut completed_rx: mpsc::Receiver<Completion>,
        mut health_rx: mpsc::Receiver<HealthEvent>,
        mut decision_rx: mpsc::UnboundedReceiver<RestartDecision>,
    ) {
        info!("Supervisor actor started with {} service(s)", self.services.len());
        let mut cmd_closed = false;

        loop {
            tokio::select! {
                biased;

                Some(completion) = completed_rx.recv() => {
                    self.handle_completion(completion);
                }

                cmd = cmd_rx.recv(), if !cmd_closed => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("All supervisor handles dropped, stopping every service");
                        cmd_closed = true;
                        self.begin_drain();
                    }
                },

                Some(event) = health_rx.recv() => {
                    self.handle_health_event(event);
                }

                Some(decision) = decision_rx.recv() => {
                    self.handle_decision(decision);
                }

                else => break,
            }

            if cmd_closed && self.is_drained() {
                break;
            }
        }

        info!("Supervisor actor stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Start {
                name,
                skip_compliance_check,
                resp,
            } => self.schedule_op(
                &name,
                OpRequest {
                    kind: OpKind::Start {
                        skip_compliance_check,
                        manual: true,
                    },
                    reply: Reply::Caller(resp),
                },
            ),

            SupervisorCommand::Stop { name, resp } => self.schedule_op(
                &name,
                OpRequest {
                    kind: OpKind::Stop,
                    reply: Reply::Caller(resp),
                },
            ),

            SupervisorCommand::Restart { name, resp } => {
                if !self.services.contains_key(&name) {
                    let _ = resp.send(Err(SupervisorError::not_found(&name)));
                    return;
                }
                self.schedule_op(&name, OpRequest::internal(OpKind::Stop));
                self.schedule_op(
                    &name,
                    OpRequest {
                        kind: OpKind::Start {
                            skip_compliance_check: false,
                            manual: true,
                        },
                        reply: Reply::Caller(resp),
                    },
                );
            }

            SupervisorCommand::Status { name, resp } => {
                let status = self
                    .services
                    .get(&name)
                    .map(ManagedService::status)
                    .ok_or_else(|| SupervisorError::not_found(&name));
                let _ = resp.send(status);
            }

            SupervisorCommand::StatusAll { resp } => {
                let _ = resp.send(self.services.values().map(ManagedService::status).collect());
            }

            SupervisorCommand::StartAll { resp } => {
                if !self.auto_restart {
                    info!("Automatic restarts re-enabled");
                }
                self.auto_restart = true;
                let names = self
                    .services
                    .values()
                    .filter(|s| s.definition.enabled && s.definition.auto_start)
                    .map(|s| s.name().to_string())
                    .collect();
                self.start_batch(
                    "start_all",
                    names,
                    OpKind::Start {
                        skip_compliance_check: false,
                        manual: true,
                    },
                    resp,
                );
            }

            SupervisorCommand::ShutdownAll { resp } => {
                info!("Shutting down all services, automatic restarts disabled");
                self.auto_restart = false;
                let names = self.services.keys().cloned().collect();
                self.start_batch("shutdown_all", names, OpKind::Stop, resp);
            }

            SupervisorCommand::ComplianceContext { name, resp } => {
                let _ = resp.send(self.compliance_context(name.as_deref()));
            }

            SupervisorCommand::RecordCompliance { entries } => self.record_compliance(&entries),

            SupervisorCommand::Reload { config, resp } => {
                let _ = resp.send(self.reload(*config));
            }
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Queue an operation and run it right away if the service is idle.
    fn schedule_op(&mut self, name: &str, request: OpRequest) {
        let Some(service) = self.services.get_mut(name) else {
            self.reply(name, request.reply, Err(SupervisorError::not_found(name)));
            return;
        };

        if service.pending_ops.len() >= MAX_PENDING_OPS_PER_SERVICE {
            warn!(
                service = name,
                op = request.kind.name(),
                "Operation queue full ({} pending)",
                service.pending_ops.len()
            );
            let err = SupervisorError::operation_not_allowed(
                name,
                request.kind.name(),
                format!("{} (operation queue full)", service.state()),
            );
            self.reply(name, request.reply, Err(err));
            return;
        }

        if service.is_busy() {
            debug!(
                service = name,
                op = request.kind.name(),
                "Service busy, operation queued"
            );
        }
        service.pending_ops.push_back(request);
        self.drive_queue(name);
    }

    /// Start queued operations until one needs a job or the queue is empty.
    fn drive_queue(&mut self, name: &str) {
        loop {
            let request = match self.services.get_mut(name) {
                Some(service) if !service.is_busy() => match service.pending_ops.pop_front() {
                    Some(request) => request,
                    None => return,
                },
                _ => return,
            };
            self.start_op_now(name, request);
        }
    }

    fn start_op_now(&mut self, name: &str, request: OpRequest) {
        let OpRequest { kind, reply } = request;
        debug!(service = name, op = kind.name(), "Running operation");

        let step = match kind {
            OpKind::Start {
                skip_compliance_check,
                manual,
            } => self.begin_start(name, skip_compliance_check, manual),
            OpKind::Stop => self.begin_stop(name),
            OpKind::AutoRestart {
                generation,
                attempt,
                delay,
            } => self.begin_auto_restart(name, generation, attempt, delay),
            OpKind::GiveUp {
                generation,
                attempts,
            } => self.begin_give_up(name, generation, attempts),
            OpKind::DelayedSpawn { generation } => self.begin_delayed_spawn(name, generation),
        };

        match step {
            OpStep::Done(result) => self.reply(name, reply, result),
            OpStep::Job(job) => match self.services.get_mut(name) {
                Some(service) => {
                    service.in_flight = Some(InFlightOp { kind, reply });
                    self.runner.submit(name, job);
                }
                None => self.reply(name, reply, Err(SupervisorError::not_found(name))),
            },
        }
    }

    fn reply(&mut self, name: &str, reply: Reply, result: Result<ServiceStatus>) {
        match reply {
            Reply::None => {
                if let Err(e) = &result {
                    debug!(service = name, "Internal operation failed: {}", e);
                }
            }
            Reply::Caller(tx) => {
                let _ = tx.send(result);
            }
            Reply::Batch(batch_id) => self.batch_op_completed(batch_id, name, result),
        }
    }

    fn start_batch(
        &mut self,
        name: &'static str,
        services: Vec<String>,
        kind: OpKind,
        resp: oneshot::Sender<BatchResults>,
    ) {
        if services.is_empty() {
            let _ = resp.send(Vec::new());
            return;
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        info!(batch = name, batch_id, "Batch started for {} service(s)", services.len());

        self.batches.insert(
            batch_id,
            PendingBatch {
                name,
                pending: services.len(),
                results: Vec::with_capacity(services.len()),
                resp,
            },
        );

        for service in services {
            self.schedule_op(
                &service,
                OpRequest {
                    kind: kind.clone(),
                    reply: Reply::Batch(batch_id),
                },
            );
        }
    }

    fn batch_op_completed(&mut self, batch_id: u64, name: &str, result: Result<ServiceStatus>) {
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            warn!(batch_id, "Result for unknown batch");
            return;
        };

        batch.results.push((name.to_string(), result));
        batch.pending = batch.pending.saturating_sub(1);
        if batch.pending > 0 {
            return;
        }

        if let Some(mut batch) = self.batches.remove(&batch_id) {
            batch.results.sort_by(|a, b| a.0.cmp(&b.0));
            let failed = batch.results.iter().filter(|(_, r)| r.is_err()).count();
            if failed > 0 {
                warn!(
                    batch = batch.name,
                    batch_id,
                    "Batch complete, {} of {} service(s) failed",
                    failed,
                    batch.results.len()
                );
            } else {
                info!(batch = batch.name, batch_id, "Batch complete");
            }
            let _ = batch.resp.send(batch.results);
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn begin_start(&mut self, name: &str, skip_compliance_check: bool, manual: bool) -> OpStep {
        let Some(service) = self.services.get_mut(name) else {
            return OpStep::Done(Err(SupervisorError::not_found(name)));
        };

        let state = service.state();
        if matches!(state, ServiceState::Running | ServiceState::Starting) {
            debug!(service = name, "Already {}, nothing to start", state);
            return OpStep::Done(Ok(service.status()));
        }
        if !service.state_machine.can_start() {
            return OpStep::Done(Err(SupervisorError::operation_not_allowed(
                name,
                "start",
                state.as_str(),
            )));
        }

        if manual {
            service.restart_count = 0;
            let _ = self.policy_tx.send(PolicyInput::Reset {
                service: name.to_string(),
            });
        }

        service.compliance_override = skip_compliance_check;
        if let Err(violation) = enforce_compliance(&self.evaluator, service) {
            return OpStep::Done(Err(violation.into()));
        }

        if let Err(conflict) = self.ports.reserve(name, service.definition.target_port) {
            warn!(service = name, "{}", conflict);
            service.last_error = Some(conflict.to_string());
            return OpStep::Done(Err(conflict.into()));
        }

        service.generation += 1;
        service.start_time = None;
        service.last_health_check_time = None;
        service.last_health_result = Default::default();
        transition(service, ServiceState::Starting, "start requested");

        OpStep::Job(Job::Spawn(launch_spec(&service.definition)))
    }

    fn begin_stop(&mut self, name: &str) -> OpStep {
        let Some(service) = self.services.get_mut(name) else {
            return OpStep::Done(Err(SupervisorError::not_found(name)));
        };

        let state = service.state();
        match state {
            ServiceState::Stopped | ServiceState::Blocked | ServiceState::Failed => {
                debug!(service = name, "Already {}, nothing to stop", state);
                OpStep::Done(Ok(service.status()))
            }
            ServiceState::Starting => {
                // Idle in STARTING means a restart is pending: waiting for its
                // backoff delay or for the policy decision after an exit.
                service.cancel_restart_timer();
                service.generation += 1;
                transition(service, ServiceState::Stopped, "pending restart cancelled");
                info!(service = name, "Pending restart cancelled");
                let status = service.status();
                self.ports.release(name);
                OpStep::Done(Ok(status))
            }
            ServiceState::Running => {
                service.generation += 1;
                let grace = service.definition.grace_period.unwrap_or(self.options.grace_period);
                match service.process.clone() {
                    Some(handle) => {
                        transition(service, ServiceState::Stopping, "stop requested");
                        self.publish_targets();
                        OpStep::Job(Job::Terminate { handle, grace })
                    }
                    None => {
                        transition(service, ServiceState::Stopped, "stop requested");
                        let status = service.status();
                        self.ports.release(name);
                        self.publish_targets();
                        OpStep::Done(Ok(status))
                    }
                }
            }
            ServiceState::Stopping => OpStep::Done(Err(SupervisorError::operation_not_allowed(
                name,
                "stop",
                state.as_str(),
            ))),
        }
    }

    fn begin_auto_restart(
        &mut self,
        name: &str,
        generation: u64,
        attempt: u32,
        delay: Duration,
    ) -> OpStep {
        let Some(service) = self.services.get_mut(name) else {
            return OpStep::Done(Err(SupervisorError::not_found(name)));
        };

        let state = service.state();
        if !self.auto_restart
            || service.generation != generation
            || !matches!(state, ServiceState::Running | ServiceState::Starting)
            || service.restart_timer.is_some()
        {
            debug!(service = name, generation, "Discarding stale restart decision");
            return OpStep::Done(Ok(service.status()));
        }

        service.restart_count += 1;
        service.generation += 1;
        service.last_health_result = Default::default();
        if state == ServiceState::Running {
            transition(
                service,
                ServiceState::Starting,
                &format!("restart attempt {} after failed health checks", attempt),
            );
        }
        info!(
            service = name,
            attempt,
            restart_count = service.restart_count,
            "Restarting in {:?}",
            delay
        );

        let grace = service.definition.grace_period.unwrap_or(self.options.grace_period);
        match service.process.take() {
            Some(handle) => {
                self.publish_targets();
                OpStep::Job(Job::Terminate { handle, grace })
            }
            None => {
                let status = service.status();
                self.arm_restart_timer(name, delay);
                self.publish_targets();
                OpStep::Done(Ok(status))
            }
        }
    }

    fn begin_give_up(&mut self, name: &str, generation: u64, attempts: u32) -> OpStep {
        let Some(service) = self.services.get_mut(name) else {
            return OpStep::Done(Err(SupervisorError::not_found(name)));
        };

        let state = service.state();
        if !self.auto_restart
            || service.generation != generation
            || !matches!(state, ServiceState::Running | ServiceState::Starting)
        {
            debug!(service = name, generation, "Discarding stale give-up decision");
            return OpStep::Done(Ok(service.status()));
        }

        let err = RestartBudgetExhaustedError {
            service: name.to_string(),
            attempts,
        };
        error!(alert = true, service = name, attempts, "{}", err);

        service.cancel_restart_timer();
        service.generation += 1;
        service.start_time = None;
        service.last_error = Some(err.to_string());
        transition(service, ServiceState::Failed, &err.to_string());

        let grace = service.definition.grace_period.unwrap_or(self.options.grace_period);
        match service.process.take() {
            Some(handle) => {
                self.publish_targets();
                OpStep::Job(Job::Terminate { handle, grace })
            }
            None => {
                let status = service.status();
                self.ports.release(name);
                self.publish_targets();
                OpStep::Done(Ok(status))
            }
        }
    }

    fn begin_delayed_spawn(&mut self, name: &str, generation: u64) -> OpStep {
        let Some(service) = self.services.get_mut(name) else {
            return OpStep::Done(Err(SupervisorError::not_found(name)));
        };

        if service.generation != generation || service.state() != ServiceState::Starting {
            debug!(service = name, generation, "Discarding stale restart");
            return OpStep::Done(Ok(service.status()));
        }

        // The definition may have changed through a reload since the last start
        if let Err(violation) = enforce_compliance(&self.evaluator, service) {
            service.generation += 1;
            self.ports.release(name);
            return OpStep::Done(Err(violation.into()));
        }

        // Normally still held from the original start
        if let Err(conflict) = self.ports.reserve(name, service.definition.target_port) {
            warn!(service = name, "{}", conflict);
            service.last_error = Some(conflict.to_string());
            transition(service, ServiceState::Stopped, "port unavailable for restart");
            return OpStep::Done(Err(conflict.into()));
        }

        OpStep::Job(Job::Spawn(launch_spec(&service.definition)))
    }

    // ========================================================================
    // Completions
    // ========================================================================

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Job { service, output } => self.handle_job_completed(&service, output),
            Completion::Exited {
                service,
                generation,
                info,
            } => self.handle_exit(&service, generation, info),
            Completion::RestartDue { service, generation } => {
                let Some(managed) = self.services.get_mut(&service) else {
                    return;
                };
                if managed.generation != generation || managed.state() != ServiceState::Starting {
                    debug!(service = %service, generation, "Ignoring stale restart timer");
                    return;
                }
                managed.restart_timer = None;
                self.schedule_op(&service, OpRequest::internal(OpKind::DelayedSpawn { generation }));
            }
        }
    }

    fn handle_job_completed(&mut self, name: &str, output: JobOutput) {
        let in_flight = match self.services.get_mut(name) {
            Some(service) => service.in_flight.take(),
            None => None,
        };
        let Some(in_flight) = in_flight else {
            warn!(service = name, "Job completed without an in-flight operation");
            return;
        };

        let result = match output {
            JobOutput::Spawned(result) => self.finish_spawn(name, result),
            JobOutput::Terminated(result) => self.finish_terminate(name, &in_flight.kind, result),
        };

        self.reply(name, in_flight.reply, result);
        self.drive_queue(name);
    }

    fn finish_spawn(&mut self, name: &str, result: ProcessResult<ProcessHandle>) -> Result<ServiceStatus> {
        let Some(service) = self.services.get_mut(name) else {
            return Err(SupervisorError::not_found(name));
        };

        match result {
            Ok(handle) => {
                let generation = service.generation;
                service.start_time = Some(handle.started_at());
                service.last_error = None;
                service.process = Some(handle.clone());
                transition(
                    service,
                    ServiceState::Running,
                    &format!("spawned with PID {}", handle.pid()),
                );
                info!(
                    service = name,
                    pid = handle.pid(),
                    port = service.definition.target_port,
                    generation,
                    "Service running"
                );
                let status = service.status();

                spawn_exit_watcher(self.completed_tx.clone(), name.to_string(), generation, handle);
                let _ = self.policy_tx.send(PolicyInput::Started {
                    service: name.to_string(),
                });
                self.publish_targets();
                Ok(status)
            }
            Err(e) => {
                let reason = match e {
                    ProcessError::SpawnFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                let err = ProcessSpawnError {
                    service: name.to_string(),
                    reason,
                };
                error!(service = name, "{}", err);
                service.last_error = Some(err.to_string());
                transition(service, ServiceState::Stopped, "spawn failed");
                self.ports.release(name);
                Err(err.into())
            }
        }
    }

    fn finish_terminate(
        &mut self,
        name: &str,
        kind: &OpKind,
        result: ProcessResult<TerminationOutcome>,
    ) -> Result<ServiceStatus> {
        let Some(service) = self.services.get_mut(name) else {
            return Err(SupervisorError::not_found(name));
        };
        service.process = None;
        service.start_time = None;

        match kind {
            OpKind::Stop => {
                let outcome = match result {
                    Ok(outcome) => {
                        info!(service = name, outcome = ?outcome, "Service stopped");
                        transition(service, ServiceState::Stopped, "stopped");
                        Ok(())
                    }
                    Err(e) => {
                        let err = SupervisorError::termination(name, e.to_string());
                        error!(service = name, "{}", err);
                        service.last_error = Some(err.to_string());
                        transition(service, ServiceState::Stopped, "stop failed");
                        Err(err)
                    }
                };
                let status = service.status();
                self.ports.release(name);
                outcome.map(|()| status)
            }
            OpKind::AutoRestart { delay, .. } => {
                if let Err(e) = result {
                    error!(service = name, "Failed to stop process before restart: {}", e);
                }
                let status = service.status();
                self.arm_restart_timer(name, *delay);
                Ok(status)
            }
            _ => {
                if let Err(e) = result {
                    error!(service = name, "Failed to stop process: {}", e);
                }
                let status = service.status();
                self.ports.release(name);
                Ok(status)
            }
        }
    }

    fn arm_restart_timer(&mut self, name: &str, delay: Duration) {
        let Some(service) = self.services.get_mut(name) else {
            return;
        };

        let generation = service.generation;
        let completed_tx = self.completed_tx.clone();
        let target = name.to_string();
        service.cancel_restart_timer();
        service.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completed_tx
                .send(Completion::RestartDue {
                    service: target,
                    generation,
                })
                .await;
        }));
    }

    fn handle_exit(&mut self, name: &str, generation: u64, info: ExitInfo) {
        let Some(service) = self.services.get_mut(name) else {
            return;
        };
        if service.generation != generation || service.state() != ServiceState::Running {
            debug!(service = name, generation, "Ignoring exit of a previous run ({})", info);
            return;
        }

        service.process = None;
        service.start_time = None;
        let reason = format!("process exited unexpectedly ({})", info);
        warn!(service = name, generation, "{}", reason);
        service.last_error = Some(reason.clone());

        if self.auto_restart {
            transition(service, ServiceState::Starting, &reason);
            let _ = self.policy_tx.send(PolicyInput::Exited {
                service: name.to_string(),
                generation,
            });
        } else {
            transition(service, ServiceState::Stopped, &reason);
            self.ports.release(name);
        }
        self.publish_targets();
    }

    // ========================================================================
    // Health and restart policy
    // ========================================================================

    fn handle_health_event(&mut self, event: HealthEvent) {
        let Some(service) = self.services.get_mut(&event.service) else {
            return;
        };
        if service.generation != event.generation || service.state() != ServiceState::Running {
            debug!(
                service = %event.service,
                generation = event.generation,
                "Discarding stale health result"
            );
            return;
        }

        service.last_health_check_time = Some(event.timestamp);
        service.last_health_result = event.result;
        let _ = self.policy_tx.send(PolicyInput::Health {
            service: event.service,
            generation: event.generation,
            result: event.result,
        });
    }

    fn handle_decision(&mut self, decision: RestartDecision) {
        let RestartDecision {
            service,
            generation,
            action,
        } = decision;

        let kind = match action {
            RestartAction::RestartNow { delay, attempt } => OpKind::AutoRestart {
                generation,
                attempt,
                delay,
            },
            RestartAction::GiveUp { attempts } => OpKind::GiveUp {
                generation,
                attempts,
            },
        };

        if self.services.contains_key(&service) {
            self.schedule_op(&service, OpRequest::internal(kind));
        }
    }

    /// Publish the current set of RUNNING services to the health monitor.
    fn publish_targets(&self) {
        let targets = self
            .services
            .values()
            .filter(|s| s.state() == ServiceState::Running)
            .filter_map(|s| {
                s.process.as_ref().map(|process| ProbeTarget {
                    service: s.name().to_string(),
                    generation: s.generation,
                    pid: process.pid(),
                    port: s.definition.target_port,
                    check: s.definition.effective_health_check(),
                })
            })
            .collect();
        self.targets_tx.send_replace(targets);
    }

    // ========================================================================
    // Compliance and reload
    // ========================================================================

    fn compliance_context(&self, name: Option<&str>) -> Result<ComplianceContext> {
        let selected: Vec<&ManagedService> = match name {
            Some(name) => vec![self
                .services
                .get(name)
                .ok_or_else(|| SupervisorError::not_found(name))?],
            None => self.services.values().collect(),
        };

        let services = selected
            .into_iter()
            .map(|s| ComplianceInput {
                definition: s.definition.clone(),
                running: match (s.state(), &s.process) {
                    (ServiceState::Running, Some(process)) => {
                        Some((process.pid(), s.definition.target_port))
                    }
                    _ => None,
                },
            })
            .collect();

        Ok(ComplianceContext {
            evaluator: self.evaluator.clone(),
            probe_timeout: self.options.health.timeout,
            services,
        })
    }

    fn record_compliance(&mut self, entries: &[ComplianceEntry]) {
        for entry in entries {
            if let Some(service) = self.services.get_mut(&entry.service) {
                service.compliance_violations = violations(entry);
            }
        }
    }

    /// Replace the registry.
    ///
    /// Active services (STARTING, RUNNING, STOPPING or with queued work) may
    /// not be removed or moved to another port. Everything else is applied;
    /// changed definitions take effect on the next start.
    fn reload(&mut self, config: RegistryConfig) -> Result<ReloadSummary> {
        config.validate()?;

        let incoming: HashMap<&str, &ServiceDefinition> =
            config.services.iter().map(|d| (d.name.as_str(), d)).collect();

        for service in self.services.values() {
            let active = service.state().is_active()
                || service.is_busy()
                || !service.pending_ops.is_empty();
            if !active {
                continue;
            }
            match incoming.get(service.name()) {
                None => {
                    return Err(SupervisorError::operation_not_allowed(
                        service.name(),
                        "remove",
                        service.state().as_str(),
                    ))
                }
                Some(def) if def.target_port != service.definition.target_port => {
                    return Err(SupervisorError::operation_not_allowed(
                        service.name(),
                        "change port",
                        service.state().as_str(),
                    ))
                }
                Some(_) => {}
            }
        }

        let keep: HashSet<String> = incoming.keys().map(|n| n.to_string()).collect();
        drop(incoming);

        let evaluator = ComplianceEvaluator::new(config.compliance.rules);
        let mut summary = ReloadSummary::default();

        let removed: Vec<String> = self
            .services
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            if let Some(mut service) = self.services.remove(&name) {
                service.cancel_restart_timer();
            }
            self.ports.release(&name);
            let _ = self.policy_tx.send(PolicyInput::Forget {
                service: name.clone(),
            });
            summary.removed.push(name);
        }

        for definition in config.services {
            let found = violations(&evaluator.evaluate(&definition, None));
            match self.services.get_mut(&definition.name) {
                Some(service) => {
                    if service.definition != definition {
                        summary.updated.push(definition.name.clone());
                        service.definition = definition;
                    }
                    service.compliance_violations = found;
                }
                None => {
                    summary.added.push(definition.name.clone());
                    let mut service = ManagedService::new(definition);
                    service.compliance_violations = found;
                    self.services.insert(service.name().to_string(), service);
                }
            }
        }

        if config.supervisor.health.interval != self.options.health.interval {
            warn!("Health check interval change takes effect after a supervisor restart");
        }
        if config.supervisor.health != self.options.health
            || config.supervisor.restart != self.options.restart
        {
            let _ = self.policy_tx.send(PolicyInput::Reconfigure(RestartPolicyConfig::from_options(
                &config.supervisor.health,
                &config.supervisor.restart,
            )));
        }
        self.evaluator = evaluator;
        self.options = config.supervisor;

        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            "Registry reloaded"
        );
        Ok(summary)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    fn begin_drain(&mut self) {
        self.auto_restart = false;
        let names: Vec<String> = self.services.keys().cloned().collect();
        for name in names {
            self.schedule_op(&name, OpRequest::internal(OpKind::Stop));
        }
    }

    fn is_drained(&self) -> bool {
        self.services.values().all(|s| {
            !s.is_busy() && s.pending_ops.is_empty() && !s.state().is_active()
        })
    }
}

fn transition(service: &mut ManagedService, target: ServiceState, reason: &str) {
    let from = service.state();
    match service.state_machine.transition_to(target, Some(reason.to_string())) {
        Ok(()) => {
            if from != target {
                info!(
                    service = %service.definition.name,
                    from = %from,
                    to = %target,
                    generation = service.generation,
                    "{}",
                    reason
                );
            }
        }
        Err(e) => error!("{}", e),
    }
}

/// Evaluate `service` before it is spawned and move it to BLOCKED on a
/// critical finding. Skipped while the operator override is in effect.
fn enforce_compliance(
    evaluator: &ComplianceEvaluator,
    service: &mut ManagedService,
) -> std::result::Result<(), ComplianceViolationError> {
    let name = service.definition.name.clone();
    if service.compliance_override {
        warn!(service = %name, "Starting without compliance check");
        return Ok(());
    }

    let entry = evaluator.evaluate(&service.definition, None);
    service.compliance_violations = violations(&entry);
    match entry.violation_error() {
        Some(violation) => {
            warn!(
                service = %name,
                rule = %violation.rule_id,
                "Start blocked by compliance: {}",
                violation.fix_hint
            );
            service.last_error = Some(violation.to_string());
            transition(service, ServiceState::Blocked, &violation.to_string());
            Err(violation)
        }
        None => Ok(()),
    }
}

fn violations(entry: &ComplianceEntry) -> Vec<Violation> {
    entry
        .violations()
        .into_iter()
        .map(|(rule_id, severity)| Violation { rule_id, severity })
        .collect()
}

fn launch_spec(definition: &ServiceDefinition) -> LaunchSpec {
    LaunchSpec {
        id: definition.name.clone(),
        command: definition.command.clone(),
        args: definition.resolved_args(),
        working_directory: definition.working_directory.as_ref().map(PathBuf::from),
        environment: definition.resolved_environment(),
    }
}

/// Report the exit of `handle` back to the actor.
fn spawn_exit_watcher(
    completed_tx: mpsc::Sender<Completion>,
    service: String,
    generation: u64,
    handle: ProcessHandle,
) {
    tokio::spawn(async move {
        let info = handle.exited().await;
        let _ = completed_tx
            .send(Completion::Exited {
                service,
                generation,
                info,
            })
            .await;
    });
}
