//! Unit tests for the supervisor module.
//!
//! These run real `sh` processes with millisecond-scale intervals.

#![cfg(unix)]

use super::*;
use fleet_common::{HealthResult, SupervisorError};
use fleet_registry::{
    Capability, ComplianceConfig, HealthCheckSpec, RegistryConfig, ServiceDefinition,
    SupervisorOptions,
};
use fleet_monitoring::HealthEvent;
use fleet_service_state::ServiceState;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const WAIT: Duration = Duration::from_secs(10);

/// Poll `supervisor.status(name)` until `predicate` holds or `timeout` expires.
async fn wait_for_status(
    supervisor: &Supervisor,
    name: &str,
    predicate: impl Fn(&ServiceStatus) -> bool,
    timeout: Duration,
) -> ServiceStatus {
    let poll_interval = Duration::from_millis(10);
    let result = tokio::time::timeout(timeout, async {
        loop {
            let status = supervisor.status(name).await.unwrap();
            if predicate(&status) {
                return status;
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
    .await;

    match result {
        Ok(status) => status,
        Err(_) => {
            let final_status = supervisor.status(name).await.unwrap();
            panic!(
                "wait_for_status timed out after {:?}. Final status: {:?}",
                timeout, final_status
            );
        }
    }
}

fn options() -> SupervisorOptions {
    let mut options = SupervisorOptions::default();
    options.grace_period = Duration::from_secs(2);
    options.health.interval = Duration::from_millis(100);
    options.health.timeout = Duration::from_millis(50);
    options.health.failure_threshold = 2;
    options.restart.max_attempts = 2;
    options.restart.base_delay = Duration::from_millis(50);
    options.restart.max_delay = Duration::from_millis(200);
    options
}

fn config(services: Vec<ServiceDefinition>) -> RegistryConfig {
    RegistryConfig {
        supervisor: options(),
        compliance: ComplianceConfig::default(),
        services,
    }
}

/// A compliant service running `script`, probed by PID.
fn service(name: &str, port: u16, script: &str) -> ServiceDefinition {
    let mut def = ServiceDefinition::new(name, "sh", port);
    def.args = vec!["-c".to_string(), script.to_string()];
    def.capabilities.insert(Capability::BindsAllInterfaces);
    def.capabilities.insert(Capability::ExposesHealthEndpoint);
    def.capabilities.insert(Capability::UsesSharedAuth);
    def.health_check = Some(HealthCheckSpec::Process);
    def
}

/// A localhost port nothing listens on.
fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn sleeper(name: &str, port: u16) -> ServiceDefinition {
    service(name, port, "exec sleep 30")
}

/// A supervisor without a health monitor. Results sent on the returned
/// channel reach the actor as if probed.
fn supervisor_with_health_feed(config: RegistryConfig) -> (Supervisor, mpsc::Sender<HealthEvent>) {
    let (targets_tx, _) = watch::channel(Vec::new());
    let (health_tx, health_rx) = mpsc::channel(16);
    (Supervisor::spawn_actor(config, targets_tx, health_rx), health_tx)
}

fn health_event(service: &str, generation: u64, result: HealthResult) -> HealthEvent {
    HealthEvent {
        service: service.to_string(),
        generation,
        result,
        reason: None,
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_start_and_stop() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18501)])).unwrap();

    let status = supervisor.start("alpha", false).await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert!(status.pid.is_some());
    assert!(status.start_time.is_some());
    assert_eq!(status.last_health_result, HealthResult::Unknown);

    let status = supervisor.stop("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.pid, None);
    assert_eq!(status.last_error, None);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18502)])).unwrap();

    let first = supervisor.start("alpha", false).await.unwrap();
    let second = supervisor.start("alpha", false).await.unwrap();
    assert_eq!(first.pid, second.pid);
    assert_eq!(first.generation, second.generation);

    // Stopping a stopped service is a no-op as well
    supervisor.stop("alpha").await.unwrap();
    let status = supervisor.stop("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
}

#[tokio::test]
async fn test_unknown_service() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18503)])).unwrap();

    let err = supervisor.start("ghost", false).await.unwrap_err();
    assert_eq!(err, SupervisorError::not_found("ghost"));
    assert!(supervisor.restart("ghost").await.is_err());
    assert!(supervisor.status("ghost").await.is_err());
}

#[tokio::test]
async fn test_critical_violation_blocks_start() {
    let mut def = sleeper("alpha", 18504);
    def.capabilities.remove(&Capability::BindsAllInterfaces);
    let supervisor = Supervisor::new(config(vec![def])).unwrap();

    let err = supervisor.start("alpha", false).await.unwrap_err();
    match err {
        SupervisorError::ComplianceViolation(ref v) => assert_eq!(v.rule_id, "binds-all-interfaces"),
        other => panic!("unexpected error: {:?}", other),
    }

    let status = supervisor.status("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Blocked);
    assert_eq!(status.pid, None);
    assert!(status.last_error.unwrap().contains("binds-all-interfaces"));
    assert!(status
        .compliance_violations
        .iter()
        .any(|v| v.rule_id == "binds-all-interfaces"));

    // The operator override starts it anyway
    let status = supervisor.start("alpha", true).await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_spawn_failure_leaves_service_stopped() {
    let mut def = sleeper("alpha", 18505);
    def.command = "/nonexistent/binary".to_string();
    let supervisor = Supervisor::new(config(vec![def])).unwrap();

    let err = supervisor.start("alpha", false).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ProcessSpawn(ref e) if e.service == "alpha"));

    let status = supervisor.status("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.restart_count, 0);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_unexpected_exit_restarts_until_budget_exhausted() {
    // Probed over TCP so a short-lived run never refills the budget
    let mut def = service("alpha", unused_port(), "sleep 0.05; exit 1");
    def.health_check = Some(HealthCheckSpec::Tcp);
    let supervisor = Supervisor::new(config(vec![def])).unwrap();
    supervisor.start("alpha", false).await.unwrap();

    let status = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Failed,
        WAIT,
    )
    .await;

    assert_eq!(status.restart_count, 2);
    assert_eq!(status.pid, None);
    assert!(status.last_error.unwrap().contains("Restart budget exhausted"));

    // A manual start refills the budget and clears the count
    let status = supervisor.start("alpha", false).await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.restart_count, 0);
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_failing_health_checks_restart_then_fail() {
    let mut def = sleeper("alpha", unused_port());
    def.health_check = Some(HealthCheckSpec::Tcp);
    let supervisor = Supervisor::new(config(vec![def])).unwrap();

    let first = supervisor.start("alpha", false).await.unwrap();
    let first_pid = first.pid.unwrap();

    let restarted = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Running && s.restart_count == 1,
        WAIT,
    )
    .await;
    assert_ne!(restarted.pid, Some(first_pid));
    assert!(restarted.generation > first.generation);

    let status = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Failed,
        WAIT,
    )
    .await;
    assert_eq!(status.restart_count, 2);
    assert_eq!(status.last_health_result, HealthResult::Unhealthy);
    // The unhealthy process was terminated
    assert_eq!(status.pid, None);
}

#[tokio::test]
async fn test_stop_cancels_pending_restart() {
    let mut options = options();
    options.restart.base_delay = Duration::from_secs(30);
    options.restart.max_delay = Duration::from_secs(30);
    let supervisor = Supervisor::new(RegistryConfig {
        supervisor: options,
        compliance: ComplianceConfig::default(),
        services: vec![service("alpha", 18507, "exit 1")],
    })
    .unwrap();

    supervisor.start("alpha", false).await.unwrap();
    wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Starting && s.restart_count == 1,
        WAIT,
    )
    .await;

    let status = supervisor.stop("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = supervisor.status("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.restart_count, 1);
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18508)])).unwrap();

    let before = supervisor.start("alpha", false).await.unwrap();
    let after = supervisor.restart("alpha").await.unwrap();

    assert_eq!(after.state, ServiceState::Running);
    assert_ne!(after.pid, before.pid);
    // Stop and start each bump the generation
    assert_eq!(after.generation, before.generation + 2);
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_health_results_of_previous_run_are_discarded() {
    let (supervisor, health_tx) = supervisor_with_health_feed(config(vec![sleeper("alpha", 18520)]));

    let old = supervisor.start("alpha", false).await.unwrap();
    supervisor.stop("alpha").await.unwrap();
    let current = supervisor.start("alpha", false).await.unwrap();
    assert!(current.generation > old.generation);

    // Failures reported for the old run arrive late
    for _ in 0..3 {
        health_tx
            .send(health_event("alpha", old.generation, HealthResult::Unhealthy))
            .await
            .unwrap();
    }
    health_tx
        .send(health_event("alpha", current.generation, HealthResult::Healthy))
        .await
        .unwrap();

    wait_for_status(
        &supervisor,
        "alpha",
        |s| s.last_health_check_time.is_some(),
        WAIT,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = supervisor.status("alpha").await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, current.pid);
    assert_eq!(status.generation, current.generation);
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.last_health_result, HealthResult::Healthy);

    // The same failures for the current run trigger a restart
    for _ in 0..2 {
        health_tx
            .send(health_event("alpha", current.generation, HealthResult::Unhealthy))
            .await
            .unwrap();
    }
    let restarted = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Running && s.restart_count == 1,
        WAIT,
    )
    .await;
    assert_ne!(restarted.pid, current.pid);
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_start_all_and_shutdown_all() {
    let mut manual = sleeper("beta", 18510);
    manual.auto_start = false;
    let mut disabled = sleeper("gamma", 18511);
    disabled.enabled = false;

    let supervisor =
        Supervisor::new(config(vec![sleeper("alpha", 18509), manual, disabled])).unwrap();

    let results = supervisor.start_all().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "alpha");
    assert!(results[0].1.is_ok());

    let all = supervisor.status_all().await.unwrap();
    let states: Vec<_> = all.iter().map(|s| (s.name.as_str(), s.state)).collect();
    assert_eq!(
        states,
        vec![
            ("alpha", ServiceState::Running),
            ("beta", ServiceState::Stopped),
            ("gamma", ServiceState::Stopped),
        ]
    );

    let results = supervisor.shutdown_all().await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(supervisor
        .status_all()
        .await
        .unwrap()
        .iter()
        .all(|s| s.state == ServiceState::Stopped));
}

#[tokio::test]
async fn test_exit_after_shutdown_all_is_not_restarted() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18512)])).unwrap();
    supervisor.shutdown_all().await.unwrap();

    // Started by hand while automatic restarts are off
    supervisor.start("alpha", false).await.unwrap();
    let status = supervisor.status("alpha").await.unwrap();
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(status.pid.unwrap() as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();

    let status = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Stopped,
        WAIT,
    )
    .await;
    assert_eq!(status.restart_count, 0);
}

#[tokio::test]
async fn test_port_conflict_at_runtime() {
    // Disabled services may share a port with an enabled one
    let mut shadow = sleeper("beta", 18513);
    shadow.enabled = false;
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18513), shadow])).unwrap();

    supervisor.start("alpha", false).await.unwrap();
    let err = supervisor.start("beta", false).await.unwrap_err();
    match err {
        SupervisorError::PortConflict(ref c) => {
            assert_eq!(c.port, 18513);
            assert_eq!(c.holder, "alpha");
            assert_eq!(c.requester, "beta");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        supervisor.status("beta").await.unwrap().state,
        ServiceState::Stopped
    );

    // Released on stop
    supervisor.stop("alpha").await.unwrap();
    supervisor.start("beta", false).await.unwrap();
    supervisor.stop("beta").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18514)])).unwrap();

    let (a, b, c) = tokio::join!(
        supervisor.start("alpha", false),
        supervisor.stop("alpha"),
        supervisor.start("alpha", false),
    );
    assert_eq!(a.unwrap().state, ServiceState::Running);
    assert_eq!(b.unwrap().state, ServiceState::Stopped);
    assert_eq!(c.unwrap().state, ServiceState::Running);
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_reload_rules() {
    let supervisor =
        Supervisor::new(config(vec![sleeper("alpha", 18515), sleeper("beta", 18516)])).unwrap();
    supervisor.start("alpha", false).await.unwrap();

    // Removing a running service is refused
    let err = supervisor
        .reload(config(vec![sleeper("beta", 18516)]))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::OperationNotAllowed { ref service, .. } if service == "alpha"));

    // Moving it to another port as well
    let err = supervisor
        .reload(config(vec![sleeper("alpha", 18599), sleeper("beta", 18516)]))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::OperationNotAllowed { .. }));

    // Removing a stopped one and adding another is fine
    let mut alpha = sleeper("alpha", 18515);
    alpha.grace_period = Some(Duration::from_secs(1));
    let summary = supervisor
        .reload(config(vec![alpha, sleeper("delta", 18517)]))
        .await
        .unwrap();
    assert_eq!(summary.added, vec!["delta".to_string()]);
    assert_eq!(summary.removed, vec!["beta".to_string()]);
    assert_eq!(summary.updated, vec!["alpha".to_string()]);
    assert!(supervisor.status("beta").await.is_err());
    assert_eq!(
        supervisor.status("delta").await.unwrap().state,
        ServiceState::Stopped
    );
    supervisor.stop("alpha").await.unwrap();
}

#[tokio::test]
async fn test_restart_is_blocked_by_new_critical_finding() {
    let mut options = options();
    options.restart.base_delay = Duration::from_secs(1);
    options.restart.max_delay = Duration::from_secs(1);
    let supervisor = Supervisor::new(RegistryConfig {
        supervisor: options.clone(),
        compliance: ComplianceConfig::default(),
        services: vec![service("alpha", 18521, "exit 1")],
    })
    .unwrap();

    supervisor.start("alpha", false).await.unwrap();
    wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Starting && s.restart_count == 1,
        WAIT,
    )
    .await;

    // The restart is pending when the definition loses a required capability
    let mut alpha = service("alpha", 18521, "exit 1");
    alpha.capabilities.remove(&Capability::BindsAllInterfaces);
    let summary = supervisor
        .reload(RegistryConfig {
            supervisor: options,
            compliance: ComplianceConfig::default(),
            services: vec![alpha],
        })
        .await
        .unwrap();
    assert_eq!(summary.updated, vec!["alpha".to_string()]);

    let status = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Blocked,
        WAIT,
    )
    .await;
    assert_eq!(status.pid, None);
    assert_eq!(status.restart_count, 1);
    assert!(status.last_error.unwrap().contains("binds-all-interfaces"));

    // Nothing holds the port any more, and the override still starts it
    let status = supervisor.start("alpha", true).await.unwrap();
    assert_eq!(status.state, ServiceState::Running);
    supervisor.stop("alpha").await.ok();
}

#[tokio::test]
async fn test_override_carries_over_to_restarts() {
    let mut def = service("alpha", unused_port(), "sleep 0.05; exit 1");
    def.capabilities.remove(&Capability::BindsAllInterfaces);
    def.health_check = Some(HealthCheckSpec::Tcp);
    let supervisor = Supervisor::new(config(vec![def])).unwrap();

    supervisor.start("alpha", true).await.unwrap();
    let status = wait_for_status(
        &supervisor,
        "alpha",
        |s| s.state == ServiceState::Failed,
        WAIT,
    )
    .await;
    assert_eq!(status.restart_count, 2);
}

#[tokio::test]
async fn test_compliance_report() {
    let mut weak = sleeper("beta", 18519);
    weak.capabilities.clear();
    let supervisor = Supervisor::new(config(vec![sleeper("alpha", 18518), weak])).unwrap();
    supervisor.start("alpha", false).await.unwrap();

    let report = supervisor.compliance_report(None).await.unwrap();
    assert_eq!(report.services.len(), 2);
    assert_eq!(report.critical_services, 1);

    // Stopped services are evaluated statically
    let beta = report.entry("beta").unwrap();
    assert_eq!(beta.skipped, 2);
    assert!(beta.is_blocked());

    // Running services get a runtime snapshot; a live PID passes the probe
    let alpha = report.entry("alpha").unwrap();
    assert!(alpha.skipped < 2);
    assert!(!alpha
        .findings
        .iter()
        .any(|f| f.rule_id == "runtime-health-reachable"));

    let single = supervisor.compliance_report(Some("beta")).await.unwrap();
    assert_eq!(single.services.len(), 1);
    assert!(supervisor.compliance_report(Some("ghost")).await.is_err());

    let status = supervisor.status("beta").await.unwrap();
    assert!(!status.compliance_violations.is_empty());
    supervisor.stop("alpha").await.unwrap();
}
