//! Supervisor daemon wrapper for E2E testing.

use crate::registry::TestRegistry;
use crate::{binary_path, create_test_dir};
use anyhow::{anyhow, bail, Context, Result};
use fleet_supervisor::ServiceStatus;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// One E2E scenario: a scratch directory and the binaries under test.
pub struct FleetTest {
    pub test_dir: PathBuf,
    pub supervisor_bin: PathBuf,
    pub testsvc_bin: PathBuf,
}

impl FleetTest {
    pub fn new(test_name: &str) -> Self {
        let test = Self {
            test_dir: create_test_dir(test_name),
            supervisor_bin: binary_path("fleet-supervisor"),
            testsvc_bin: binary_path("testsvc"),
        };
        println!("=== {} ===", test_name);
        println!("Test dir: {}", test.test_dir.display());
        test
    }

    /// Write `registry` and start a daemon on it, waiting until its API is up.
    pub fn start(&self, registry: &TestRegistry) -> Result<SupervisorProcess> {
        let config_path = registry.write(&self.test_dir, "registry.yaml")?;
        let mut daemon = SupervisorProcess::start(
            &self.supervisor_bin,
            &config_path,
            &self.test_dir,
            registry.config.supervisor.control_port,
        )?;
        daemon.wait_for_ready(Duration::from_secs(10))?;
        Ok(daemon)
    }
}

impl Drop for FleetTest {
    fn drop(&mut self) {
        // Keep the directory for debugging if the test panicked
        if !thread::panicking() {
            fs::remove_dir_all(&self.test_dir).ok();
        } else {
            println!("Keeping test directory: {}", self.test_dir.display());
        }
    }
}

/// A running `fleet-supervisor run` process plus a CLI bound to its API.
pub struct SupervisorProcess {
    process: Option<Child>,
    binary: PathBuf,
    control_url: String,
    log_file_path: PathBuf,
    log_output: Vec<String>,
}

impl SupervisorProcess {
    pub fn start(binary: &Path, config_path: &Path, test_dir: &Path, control_port: u16) -> Result<Self> {
        let log_file_path = test_dir.join("supervisor.log");
        let log_file = fs::File::create(&log_file_path).context("Failed to create log file")?;
        let log_file_clone = log_file.try_clone().context("Failed to clone log file")?;

        let child = Command::new(binary)
            .arg("run")
            .arg("--config")
            .arg(config_path)
            .current_dir(test_dir)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_clone))
            .spawn()
            .context("Failed to spawn fleet-supervisor")?;
        println!("Supervisor started with PID: {}", child.id());

        Ok(Self {
            process: Some(child),
            binary: binary.to_path_buf(),
            control_url: format!("http://127.0.0.1:{}", control_port),
            log_file_path,
            log_output: Vec::new(),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.id())
    }

    pub fn wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            self.collect_logs();
            if self.has_log_matching("Control API listening") {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        bail!("Supervisor did not become ready within {:?}", timeout)
    }

    /// Run a control command against this daemon.
    pub fn cli(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(&self.binary)
            .arg("--control")
            .arg(&self.control_url)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run CLI {:?}", args))?;
        println!(
            "[CLI {:?}] {} {}",
            args,
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(output)
    }

    pub fn status(&self, name: &str) -> Result<ServiceStatus> {
        let output = self.cli(&["status", name, "--json"])?;
        if !output.status.success() {
            bail!("status {} failed: {}", name, String::from_utf8_lossy(&output.stderr));
        }
        serde_json::from_slice(&output.stdout).context("Failed to parse status")
    }

    pub fn status_all(&self) -> Result<Vec<ServiceStatus>> {
        let output = self.cli(&["status", "--json"])?;
        serde_json::from_slice(&output.stdout).context("Failed to parse status list")
    }

    /// Poll the status of `name` until `predicate` holds.
    pub fn wait_for_status(
        &self,
        name: &str,
        predicate: impl Fn(&ServiceStatus) -> bool,
        timeout: Duration,
    ) -> Result<ServiceStatus> {
        let start = Instant::now();
        let mut last = None;
        while start.elapsed() < timeout {
            let status = self.status(name)?;
            if predicate(&status) {
                return Ok(status);
            }
            last = Some(status);
            thread::sleep(Duration::from_millis(100));
        }
        Err(anyhow!("Timed out waiting for '{}'. Last status: {:?}", name, last))
    }

    /// SIGTERM the daemon and wait for it to exit.
    pub fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        let Some(mut child) = self.process.take() else {
            return Ok(());
        };
        println!("Sending SIGTERM to supervisor...");
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(child.id() as i32),
            nix::sys::signal::Signal::SIGTERM,
        )
        .context("Failed to send SIGTERM")?;

        let result = match child.wait_timeout(timeout).context("Error waiting for supervisor")? {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(anyhow!("Supervisor exited with {}", status)),
            None => {
                child.kill().ok();
                child.wait().ok();
                Err(anyhow!("Supervisor did not exit within {:?}", timeout))
            }
        };
        self.collect_logs();
        result
    }

    pub fn collect_logs(&mut self) {
        if let Ok(content) = fs::read_to_string(&self.log_file_path) {
            let lines: Vec<String> = content.lines().map(str::to_string).collect();
            for line in lines.iter().skip(self.log_output.len()) {
                println!("[SUPERVISOR] {}", line);
            }
            self.log_output = lines;
        }
    }

    pub fn logs(&self) -> &[String] {
        &self.log_output
    }

    pub fn has_log_matching(&self, pattern: &str) -> bool {
        self.log_output.iter().any(|line| line.contains(pattern))
    }
}

impl Drop for SupervisorProcess {
    fn drop(&mut self) {
        if self.process.is_some() {
            println!("Cleaning up supervisor in Drop");
            self.shutdown(Duration::from_secs(10)).ok();
        }
    }
}
