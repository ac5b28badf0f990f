//! Compliance gating, the offline `check` command and registry reload.

use e2e_tests::{free_port, testsvc_service, FleetTest, TestRegistry};
use fleet_registry::Capability;
use fleet_service_state::ServiceState;
use std::process::Command;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(15);

#[test]
fn test_check_command() {
    let test = FleetTest::new("check-command");

    let mut registry = TestRegistry::new(
        free_port(),
        vec![
            testsvc_service(&test.testsvc_bin, "alpha", 8501, &[]),
            testsvc_service(&test.testsvc_bin, "beta", 8502, &[]),
        ],
    );
    registry
        .service_mut("beta")
        .unwrap()
        .capabilities
        .remove(&Capability::BindsAllInterfaces);
    let path = registry.write(&test.test_dir, "valid.yaml").unwrap();

    let output = Command::new(&test.supervisor_bin)
        .args(["check", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    println!("{}", stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Registry OK: 2 service(s)"));
    assert!(stdout.contains("binds-all-interfaces"));
    assert!(stdout.contains("BLOCKED"));

    // Two enabled services on one port fail the load
    registry.service_mut("beta").unwrap().target_port = 8501;
    let path = registry.write(&test.test_dir, "conflict.yaml").unwrap();
    let output = Command::new(&test.supervisor_bin)
        .args(["check", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("8501"));
}

#[test]
fn test_blocked_service_and_override() {
    let test = FleetTest::new("blocked-service");

    let mut registry = TestRegistry::new(
        free_port(),
        vec![
            testsvc_service(&test.testsvc_bin, "alpha", free_port(), &[]),
            testsvc_service(&test.testsvc_bin, "gamma", free_port(), &[]),
        ],
    );
    registry
        .service_mut("gamma")
        .unwrap()
        .capabilities
        .remove(&Capability::BindsAllInterfaces);
    let mut daemon = test.start(&registry).expect("supervisor should start");

    daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Running, WAIT)
        .unwrap();
    let gamma = daemon.status("gamma").unwrap();
    assert_eq!(gamma.state, ServiceState::Blocked);
    assert!(gamma.pid.is_none());
    assert!(gamma
        .compliance_violations
        .iter()
        .any(|v| v.rule_id == "binds-all-interfaces"));

    // A plain start is refused, the override is not
    assert!(!daemon.cli(&["start", "gamma"]).unwrap().status.success());
    assert_eq!(daemon.status("gamma").unwrap().state, ServiceState::Blocked);
    assert!(daemon
        .cli(&["start", "gamma", "--skip-compliance-check"])
        .unwrap()
        .status
        .success());
    assert_eq!(daemon.status("gamma").unwrap().state, ServiceState::Running);

    // The fleet report evaluates runtime rules for running services
    let output = daemon.cli(&["compliance", "--json"]).unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["services"].as_array().unwrap().len(), 2);
    assert_eq!(report["critical_services"], 1);

    daemon.shutdown(WAIT).unwrap();
}

#[test]
fn test_reload_adds_service() {
    let test = FleetTest::new("reload");

    let mut registry = TestRegistry::new(
        free_port(),
        vec![testsvc_service(&test.testsvc_bin, "alpha", free_port(), &[])],
    );
    let mut daemon = test.start(&registry).expect("supervisor should start");
    daemon
        .wait_for_status("alpha", |s| s.state == ServiceState::Running, WAIT)
        .unwrap();

    // Removing a running service is rejected and changes nothing
    let running_alpha = registry.config.services.clone();
    registry.config.services = vec![testsvc_service(&test.testsvc_bin, "delta", free_port(), &[])];
    registry.write(&test.test_dir, "registry.yaml").unwrap();
    assert!(!daemon.cli(&["reload"]).unwrap().status.success());
    assert_eq!(daemon.status_all().unwrap().len(), 1);

    // Adding one next to it is accepted; new services stay STOPPED
    registry.config.services = running_alpha;
    registry
        .config
        .services
        .push(testsvc_service(&test.testsvc_bin, "delta", free_port(), &[]));
    let path = registry.write(&test.test_dir, "next.yaml").unwrap();
    let output = daemon.cli(&["reload", path.to_str().unwrap()]).unwrap();
    assert!(output.status.success());
    assert_eq!(daemon.status("delta").unwrap().state, ServiceState::Stopped);
    assert_eq!(daemon.status("alpha").unwrap().state, ServiceState::Running);

    daemon.shutdown(WAIT).unwrap();
}
