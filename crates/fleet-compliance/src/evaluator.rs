use crate::report::{ComplianceEntry, ComplianceReport, Finding};
use crate::snapshot::RuntimeSnapshot;
use fleet_registry::{default_rules, ComplianceRule, RuleKind, ServiceDefinition};
use std::collections::HashMap;

/// Result of one rule against one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Passed,
    Failed,
    /// The rule needs runtime data that is not available.
    Skipped,
}

impl From<bool> for RuleOutcome {
    fn from(holds: bool) -> Self {
        if holds {
            RuleOutcome::Passed
        } else {
            RuleOutcome::Failed
        }
    }
}

/// Evaluate a single rule.
pub fn check_rule(
    rule: &ComplianceRule,
    service: &ServiceDefinition,
    snapshot: Option<&RuntimeSnapshot>,
) -> RuleOutcome {
    match &rule.kind {
        RuleKind::RequiresCapability { capability } => service.has_capability(*capability).into(),
        RuleKind::PortInRange { min, max } => (*min..=*max).contains(&service.target_port).into(),
        RuleKind::ArgsContain { needle } => service
            .args
            .iter()
            .any(|arg| arg.contains(needle.as_str()))
            .into(),
        RuleKind::HealthCheckDeclared => service.health_check.is_some().into(),
        RuleKind::RuntimeBindsAllInterfaces => snapshot
            .and_then(RuntimeSnapshot::binds_all_interfaces)
            .map_or(RuleOutcome::Skipped, RuleOutcome::from),
        RuleKind::RuntimeHealthReachable => snapshot
            .and_then(|s| s.health_reachable)
            .map_or(RuleOutcome::Skipped, RuleOutcome::from),
    }
}

/// Runs a fixed rule set against services.
#[derive(Debug, Clone)]
pub struct ComplianceEvaluator {
    rules: Vec<ComplianceRule>,
}

impl Default for ComplianceEvaluator {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl ComplianceEvaluator {
    pub fn new(rules: Vec<ComplianceRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ComplianceRule] {
        &self.rules
    }

    /// Evaluate every rule against `service`.
    ///
    /// Without a snapshot only static rules can apply; runtime rules are
    /// counted as skipped and excluded from the score.
    pub fn evaluate(
        &self,
        service: &ServiceDefinition,
        snapshot: Option<&RuntimeSnapshot>,
    ) -> ComplianceEntry {
        let mut findings = Vec::new();
        let mut passed = 0;
        let mut skipped = 0;

        for rule in &self.rules {
            match check_rule(rule, service, snapshot) {
                RuleOutcome::Passed => passed += 1,
                RuleOutcome::Skipped => skipped += 1,
                RuleOutcome::Failed => findings.push(Finding {
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    fix_hint: rule.fix_hint.clone(),
                }),
            }
        }

        let entry = ComplianceEntry::new(&service.name, service.enabled, findings, passed, skipped);
        tracing::debug!(
            service = %service.name,
            passed = entry.passed,
            applicable = entry.applicable,
            skipped = entry.skipped,
            "Compliance evaluated"
        );
        entry
    }

    /// Evaluate every service, using a snapshot where one is given.
    pub fn evaluate_all(
        &self,
        services: &[ServiceDefinition],
        snapshots: &HashMap<String, RuntimeSnapshot>,
    ) -> ComplianceReport {
        let entries = services
            .iter()
            .map(|s| self.evaluate(s, snapshots.get(&s.name)))
            .collect();
        ComplianceReport::from_entries(entries)
    }
}
