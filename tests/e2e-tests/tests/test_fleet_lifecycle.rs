//! Fleet lifecycle through the CLI: start-all at boot, manual start/stop/restart,
//! and a clean shutdown on SIGTERM.

use e2e_tests::{free_port, testsvc_service, FleetTest, TestRegistry};
use fleet_common::HealthResult;
use fleet_service_state::ServiceState;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(15);

fn process_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
fn test_fleet_lifecycle() {
    let test = FleetTest::new("fleet-lifecycle");

    let mut registry = TestRegistry::new(
        free_port(),
        vec![
            testsvc_service(&test.testsvc_bin, "alpha", free_port(), &[]),
            testsvc_service(&test.testsvc_bin, "beta", free_port(), &[]),
        ],
    );
    registry.service_mut("beta").unwrap().auto_start = false;

    let mut daemon = test.start(&registry).expect("supervisor should start");

    // Step 1: alpha comes up with the daemon and turns healthy
    let alpha = daemon
        .wait_for_status(
            "alpha",
            |s| s.state == ServiceState::Running && s.last_health_result == HealthResult::Healthy,
            WAIT,
        )
        .unwrap();
    let alpha_pid = alpha.pid.unwrap();
    assert!(process_alive(alpha_pid));
    assert_eq!(daemon.status("beta").unwrap().state, ServiceState::Stopped);

    // Step 2: manual start of the non-auto-start service
    let output = daemon.cli(&["start", "beta"]).unwrap();
    assert!(output.status.success());
    let beta = daemon.status("beta").unwrap();
    assert_eq!(beta.state, ServiceState::Running);

    // Step 3: restart replaces the process
    let output = daemon.cli(&["restart", "beta"]).unwrap();
    assert!(output.status.success());
    let restarted = daemon.status("beta").unwrap();
    assert_eq!(restarted.state, ServiceState::Running);
    assert_ne!(restarted.pid, beta.pid);
    assert!(!process_alive(beta.pid.unwrap()));

    // Step 4: stop, then stop again (no-op)
    assert!(daemon.cli(&["stop", "alpha"]).unwrap().status.success());
    assert!(daemon.cli(&["stop", "alpha"]).unwrap().status.success());
    assert_eq!(daemon.status("alpha").unwrap().state, ServiceState::Stopped);
    assert!(!process_alive(alpha_pid));

    // Unknown services fail
    assert!(!daemon.cli(&["start", "ghost"]).unwrap().status.success());

    // Step 5: SIGTERM stops the fleet and the daemon
    let beta_pid = restarted.pid.unwrap();
    daemon.shutdown(WAIT).expect("supervisor should exit cleanly");
    assert!(!process_alive(beta_pid));
    assert!(daemon.has_log_matching("Fleet Supervisor shut down"));
}

#[test]
fn test_shutdown_command_keeps_daemon_running() {
    let test = FleetTest::new("shutdown-command");
    let registry = TestRegistry::new(
        free_port(),
        vec![testsvc_service(&test.testsvc_bin, "alpha", free_port(), &[])],
    );
    let mut daemon = test.start(&registry).expect("supervisor should start");
    daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Running, WAIT)
        .unwrap();

    assert!(daemon.cli(&["shutdown"]).unwrap().status.success());
    let statuses = daemon.status_all().unwrap();
    assert!(statuses.iter().all(|s| s.state == ServiceState::Stopped));

    // The API still answers and the fleet can come back
    assert!(daemon.cli(&["start-all"]).unwrap().status.success());
    assert_eq!(daemon.status("alpha").unwrap().state, ServiceState::Running);

    daemon.shutdown(WAIT).unwrap();
}
