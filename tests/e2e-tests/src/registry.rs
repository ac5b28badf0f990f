//! Registry files for E2E scenarios.

use anyhow::{Context, Result};
use fleet_registry::{
    Capability, ComplianceConfig, HealthCheckSpec, RegistryConfig, ServiceDefinition,
    SupervisorOptions,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A compliant `testsvc` service serving `/health` on `port`.
///
/// `extra_args` are appended to `--port={port}`.
pub fn testsvc_service(testsvc: &Path, name: &str, port: u16, extra_args: &[&str]) -> ServiceDefinition {
    let mut def = ServiceDefinition::new(name, testsvc.to_string_lossy(), port);
    def.args = std::iter::once("--port={port}".to_string())
        .chain(extra_args.iter().map(|a| a.to_string()))
        .collect();
    def.capabilities = [
        Capability::BindsAllInterfaces,
        Capability::ExposesHealthEndpoint,
        Capability::UsesSharedAuth,
    ]
    .into_iter()
    .collect();
    def.health_check = Some(HealthCheckSpec::default());
    def
}

/// Registry with fast health and restart timings.
pub struct TestRegistry {
    pub config: RegistryConfig,
}

impl TestRegistry {
    pub fn new(control_port: u16, services: Vec<ServiceDefinition>) -> Self {
        let mut options = SupervisorOptions {
            control_port,
            log_level: "debug".to_string(),
            grace_period: Duration::from_secs(3),
            ..SupervisorOptions::default()
        };
        options.health.interval = Duration::from_millis(200);
        options.health.timeout = Duration::from_millis(150);
        options.health.failure_threshold = 2;
        options.restart.max_attempts = 2;
        options.restart.base_delay = Duration::from_millis(200);
        options.restart.max_delay = Duration::from_secs(1);

        Self {
            config: RegistryConfig {
                supervisor: options,
                compliance: ComplianceConfig::default(),
                services,
            },
        }
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut ServiceDefinition> {
        self.config.services.iter_mut().find(|s| s.name == name)
    }

    /// Write the registry as YAML to `dir/file_name`.
    pub fn write(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let path = dir.join(file_name);
        let yaml = serde_yaml::to_string(&self.config).context("Failed to serialize registry")?;
        std::fs::write(&path, yaml)
            .with_context(|| format!("Failed to write registry {}", path.display()))?;
        println!("Created registry at: {}", path.display());
        Ok(path)
    }
}
