//! Compliance rule declarations.
//!
//! Rules are data: a closed set of [`RuleKind`] predicates plus an id, a
//! severity and a fix hint. Evaluation lives in `fleet-compliance`.

use crate::definition::Capability;
use fleet_common::Severity;
use serde::{Deserialize, Serialize};

/// Predicate of a rule.
///
/// Static kinds only look at the [`ServiceDefinition`](crate::ServiceDefinition).
/// Runtime kinds need a snapshot of the running process and are skipped
/// without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RuleKind {
    RequiresCapability { capability: Capability },
    PortInRange { min: u16, max: u16 },
    /// Some argument contains `needle`, e.g. `--address=0.0.0.0`.
    ArgsContain { needle: String },
    HealthCheckDeclared,
    /// A listener on the target port is bound to `0.0.0.0` or `::`.
    RuntimeBindsAllInterfaces,
    /// The health endpoint answered the last probe.
    RuntimeHealthReachable,
}

impl RuleKind {
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            RuleKind::RuntimeBindsAllInterfaces | RuleKind::RuntimeHealthReachable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: RuleKind,
    pub fix_hint: String,
}

impl ComplianceRule {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        kind: RuleKind,
        fix_hint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            kind,
            fix_hint: fix_hint.into(),
        }
    }
}

/// Rule set used when the registry file has no `compliance` section.
pub fn default_rules() -> Vec<ComplianceRule> {
    vec![
        ComplianceRule::new(
            "binds-all-interfaces",
            Severity::Critical,
            RuleKind::RequiresCapability {
                capability: Capability::BindsAllInterfaces,
            },
            "Start the service with its listen address set to 0.0.0.0 and declare the \
             'binds-all-interfaces' capability",
        ),
        ComplianceRule::new(
            "exposes-health-endpoint",
            Severity::Warning,
            RuleKind::RequiresCapability {
                capability: Capability::ExposesHealthEndpoint,
            },
            "Serve GET /health on the target port and declare the 'exposes-health-endpoint' \
             capability",
        ),
        ComplianceRule::new(
            "uses-shared-auth",
            Severity::Warning,
            RuleKind::RequiresCapability {
                capability: Capability::UsesSharedAuth,
            },
            "Route authentication through the shared auth module and declare the \
             'uses-shared-auth' capability",
        ),
        ComplianceRule::new(
            "runtime-binds-all-interfaces",
            Severity::Warning,
            RuleKind::RuntimeBindsAllInterfaces,
            "The running process is not listening on 0.0.0.0; check its bind address flag",
        ),
        ComplianceRule::new(
            "runtime-health-reachable",
            Severity::Warning,
            RuleKind::RuntimeHealthReachable,
            "The health endpoint did not answer; check the service logs",
        ),
    ]
}
