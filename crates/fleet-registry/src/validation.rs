use crate::config::{RegistryConfig, SupervisorOptions};
use crate::definition::{HealthCheckSpec, ServiceDefinition};
use crate::rules::{ComplianceRule, RuleKind};
use fleet_common::{ConfigError, PortConflictError};
use std::collections::{HashMap, HashSet};

const MAX_NAME_LEN: usize = 64;

/// Validate the complete registry. The first problem found aborts the load.
pub fn validate_config(config: &RegistryConfig) -> Result<(), ConfigError> {
    validate_supervisor_options(&config.supervisor)?;
    validate_rules(&config.compliance.rules)?;
    validate_services(&config.services, &config.supervisor)?;
    Ok(())
}

/// Validate a service or rule identifier.
pub fn validate_name(kind: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::validation(format!("{} name cannot be empty", kind)));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ConfigError::validation(format!(
            "{} name too long (max {} characters): {}",
            kind, MAX_NAME_LEN, name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::validation(format!(
            "{} name can only contain alphanumeric characters, hyphens, and underscores: {}",
            kind, name
        )));
    }

    Ok(())
}

fn validate_supervisor_options(options: &SupervisorOptions) -> Result<(), ConfigError> {
    if options.control_port == 0 {
        return Err(ConfigError::validation("Control port must be between 1 and 65535"));
    }

    match options.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(ConfigError::validation(format!(
                "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
                options.log_level
            )))
        }
    }

    let range = options.port_range;
    if range.min == 0 || range.min > range.max {
        return Err(ConfigError::validation(format!(
            "Invalid port range {}-{}",
            range.min, range.max
        )));
    }

    if options.grace_period.is_zero() {
        return Err(ConfigError::validation("Grace period must be greater than 0"));
    }

    let health = &options.health;
    if health.interval.is_zero() || health.timeout.is_zero() {
        return Err(ConfigError::validation(
            "Health check interval and timeout must be greater than 0",
        ));
    }
    if health.timeout >= health.interval {
        return Err(ConfigError::validation(
            "Health check timeout must be less than interval",
        ));
    }
    if health.failure_threshold == 0 {
        return Err(ConfigError::validation(
            "Health failure threshold must be at least 1",
        ));
    }

    let restart = &options.restart;
    if !restart.multiplier.is_finite() || restart.multiplier < 1.0 {
        return Err(ConfigError::validation(format!(
            "Restart multiplier must be >= 1.0, got {}",
            restart.multiplier
        )));
    }
    if restart.base_delay > restart.max_delay {
        return Err(ConfigError::validation(
            "Restart base_delay must not exceed max_delay",
        ));
    }

    Ok(())
}

fn validate_rules(rules: &[ComplianceRule]) -> Result<(), ConfigError> {
    let mut ids = HashSet::new();
    for rule in rules {
        validate_name("Rule", &rule.id)?;
        if !ids.insert(rule.id.as_str()) {
            return Err(ConfigError::validation(format!(
                "Duplicate compliance rule id: {}",
                rule.id
            )));
        }

        match &rule.kind {
            RuleKind::PortInRange { min, max } if min > max => {
                return Err(ConfigError::validation(format!(
                    "Rule '{}': empty port range {}-{}",
                    rule.id, min, max
                )));
            }
            RuleKind::ArgsContain { needle } if needle.is_empty() => {
                return Err(ConfigError::validation(format!(
                    "Rule '{}': needle cannot be empty",
                    rule.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_services(
    services: &[ServiceDefinition],
    options: &SupervisorOptions,
) -> Result<(), ConfigError> {
    if services.is_empty() {
        return Err(ConfigError::validation("At least one service must be configured"));
    }

    let mut names = HashSet::new();
    // port -> first enabled service declaring it
    let mut ports: HashMap<u16, &str> = HashMap::new();

    for service in services {
        if !names.insert(service.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                name: service.name.clone(),
            });
        }

        validate_service(service, options)?;

        if !service.enabled {
            continue;
        }
        if let Some(holder) = ports.get(&service.target_port) {
            return Err(
                PortConflictError::new(service.target_port, *holder, &service.name).into(),
            );
        }
        ports.insert(service.target_port, &service.name);
    }

    Ok(())
}

fn validate_service(
    service: &ServiceDefinition,
    options: &SupervisorOptions,
) -> Result<(), ConfigError> {
    validate_name("Service", &service.name)?;

    if service.command.trim().is_empty() {
        return Err(ConfigError::validation(format!(
            "Service '{}': command cannot be empty",
            service.name
        )));
    }

    if !options.port_range.contains(service.target_port) {
        return Err(ConfigError::PortOutOfRange {
            service: service.name.clone(),
            port: service.target_port,
            min: options.port_range.min,
            max: options.port_range.max,
        });
    }

    if let Some(HealthCheckSpec::Http { path }) = &service.health_check {
        if !path.starts_with('/') {
            return Err(ConfigError::validation(format!(
                "Service '{}': health check path must start with '/': {}",
                service.name, path
            )));
        }
    }

    if matches!(service.grace_period, Some(d) if d.is_zero()) {
        return Err(ConfigError::validation(format!(
            "Service '{}': grace period must be greater than 0",
            service.name
        )));
    }

    Ok(())
}
