//! Service Registry: the static roster of supervised services.
//!
//! The registry is pure data. [`RegistryConfig::load_from_file`] parses and
//! validates a YAML file and either returns the complete roster or a
//! [`ConfigError`](fleet_common::ConfigError); a partially valid file is never
//! accepted.

pub mod config;
pub mod definition;
pub mod rules;
pub mod validation;

pub use config::{
    load, ComplianceConfig, HealthOptions, PortRange, RegistryConfig, RestartOptions,
    SupervisorOptions,
};
pub use definition::{Capability, HealthCheckSpec, ServiceDefinition, DEFAULT_HEALTH_PATH};
pub use rules::{default_rules, ComplianceRule, RuleKind};
