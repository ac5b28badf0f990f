//! E2E test framework for Fleet Supervisor.
//!
//! Drives the compiled `fleet-supervisor` and `testsvc` binaries; build the
//! workspace before running these tests.

pub mod fleet;
pub mod registry;

pub use fleet::{FleetTest, SupervisorProcess};
pub use registry::{testsvc_service, TestRegistry};

use std::env;
use std::path::PathBuf;

/// Path of a binary built into the same target directory as this test.
pub fn binary_path(name: &str) -> PathBuf {
    let mut path = env::current_exe()
        .expect("Failed to get current exe path")
        .parent()
        .expect("Failed to get parent dir")
        .to_path_buf();

    // If we're in deps/, go up one level
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(name);

    if !path.exists() {
        panic!("{} binary not found at: {}", name, path.display());
    }
    path
}

/// Create a fresh directory under `target/tmp` for one test.
pub fn create_test_dir(test_name: &str) -> PathBuf {
    let target_dir = binary_path("fleet-supervisor")
        .parent()
        .expect("Failed to get target dir")
        .to_path_buf();

    let test_dir = target_dir.join("tmp").join(format!("e2e-{}", test_name));
    if test_dir.exists() {
        std::fs::remove_dir_all(&test_dir).ok();
    }
    std::fs::create_dir_all(&test_dir).expect("Failed to create test directory");
    test_dir
}

/// A localhost port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}
