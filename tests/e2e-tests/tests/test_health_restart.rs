//! Restarts driven by failing health checks and by crashes, and the FAILED
//! state once the restart budget is spent.

use e2e_tests::{free_port, testsvc_service, FleetTest, TestRegistry};
use fleet_service_state::ServiceState;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(20);

#[test]
fn test_unhealthy_service_is_restarted() {
    let test = FleetTest::new("health-restart");
    let registry = TestRegistry::new(
        free_port(),
        vec![testsvc_service(
            &test.testsvc_bin,
            "alpha",
            free_port(),
            &["--fail-health-after", "1"],
        )],
    );
    let mut daemon = test.start(&registry).expect("supervisor should start");

    let first = daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Running, WAIT)
        .unwrap();

    // Two failed probes trigger a restart with a new process
    let restarted = daemon
        .wait_for_status(
            "alpha",
            |s| s.state == ServiceState::Running && s.restart_count >= 1,
            WAIT,
        )
        .unwrap();
    assert_ne!(restarted.pid, first.pid);
    assert!(restarted.generation > first.generation);

    daemon.shutdown(WAIT).unwrap();
    assert!(daemon.has_log_matching("Restarting"));
}

#[test]
fn test_crash_loop_ends_in_failed() {
    let test = FleetTest::new("crash-loop");
    // Binding a non-local address makes every run exit at once
    let registry = TestRegistry::new(
        free_port(),
        vec![testsvc_service(
            &test.testsvc_bin,
            "alpha",
            free_port(),
            &["--bind", "203.0.113.1"],
        )],
    );
    let mut daemon = test.start(&registry).expect("supervisor should start");

    let failed = daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Failed, WAIT)
        .unwrap();
    assert_eq!(failed.restart_count, 2);
    assert_eq!(failed.pid, None);
    assert!(failed
        .last_error
        .unwrap()
        .contains("Restart budget exhausted"));

    daemon.collect_logs();
    assert!(daemon.has_log_matching("alert"));

    // A manual start is allowed again from FAILED and begins a fresh count
    let output = daemon.cli(&["start", "alpha"]).unwrap();
    assert!(output.status.success());

    let failed_again = daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Failed, WAIT)
        .unwrap();
    assert_eq!(failed_again.restart_count, 2);

    daemon.shutdown(WAIT).unwrap();
}
