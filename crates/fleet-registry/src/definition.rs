use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Health endpoint probed when a service declares no `health_check`.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

const PORT_PLACEHOLDER: &str = "{port}";

/// Architectural property a service declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    BindsAllInterfaces,
    ExposesHealthEndpoint,
    UsesSharedAuth,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::BindsAllInterfaces => "binds-all-interfaces",
            Capability::ExposesHealthEndpoint => "exposes-health-endpoint",
            Capability::UsesSharedAuth => "uses-shared-auth",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the health monitor probes a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheckSpec {
    /// `GET http://127.0.0.1:{target_port}{path}`, healthy on 2xx.
    Http {
        #[serde(default = "default_health_path")]
        path: String,
    },
    /// TCP connect to `127.0.0.1:{target_port}`.
    Tcp,
    /// Liveness of the PID only.
    Process,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        HealthCheckSpec::Http {
            path: default_health_path(),
        }
    }
}

/// One entry of the roster. Immutable for the lifetime of a registry load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    pub target_port: u16,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
    /// Overrides the supervisor-wide stop grace period.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::config::option_duration_serde"
    )]
    pub grace_period: Option<Duration>,
}

impl ServiceDefinition {
    /// Minimal enabled definition; mostly useful in tests.
    pub fn new(name: impl Into<String>, command: impl Into<String>, target_port: u16) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_directory: None,
            environment: HashMap::new(),
            target_port,
            capabilities: BTreeSet::new(),
            enabled: true,
            auto_start: true,
            health_check: None,
            grace_period: None,
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// The probe the health monitor should run for this service.
    pub fn effective_health_check(&self) -> HealthCheckSpec {
        self.health_check.clone().unwrap_or_default()
    }

    /// Arguments with `{port}` replaced by the target port.
    pub fn resolved_args(&self) -> Vec<String> {
        self.args.iter().map(|a| self.substitute_port(a)).collect()
    }

    /// Environment with `{port}` substituted and `PORT` exported.
    pub fn resolved_environment(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), self.substitute_port(v)))
            .collect();
        env.entry("PORT".to_string())
            .or_insert_with(|| self.target_port.to_string());
        env
    }

    fn substitute_port(&self, value: &str) -> String {
        value.replace(PORT_PLACEHOLDER, &self.target_port.to_string())
    }
}

fn default_true() -> bool {
    true
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}
