use chrono::{DateTime, Utc};
use fleet_common::{ComplianceViolationError, Severity};
use serde::{Deserialize, Serialize};

/// A rule whose predicate did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub fix_hint: String,
}

/// Evaluation result for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceEntry {
    pub service: String,
    pub enabled: bool,
    /// Failed rules, in rule declaration order.
    pub findings: Vec<Finding>,
    pub passed: usize,
    pub applicable: usize,
    /// Rules that could not be evaluated for lack of runtime data.
    pub skipped: usize,
    /// `passed / applicable`, or 1.0 when no rule applies.
    pub score: f64,
}

impl ComplianceEntry {
    pub(crate) fn new(service: &str, enabled: bool, findings: Vec<Finding>, passed: usize, skipped: usize) -> Self {
        let applicable = passed + findings.len();
        let score = if applicable == 0 {
            1.0
        } else {
            passed as f64 / applicable as f64
        };

        Self {
            service: service.to_string(),
            enabled,
            findings,
            passed,
            applicable,
            skipped,
            score,
        }
    }

    pub fn has_severity(&self, severity: Severity) -> bool {
        self.findings.iter().any(|f| f.severity == severity)
    }

    /// The first finding that forbids a start, if any.
    pub fn blocking_finding(&self) -> Option<&Finding> {
        self.findings.iter().find(|f| f.severity.blocks_start())
    }

    pub fn is_blocked(&self) -> bool {
        self.blocking_finding().is_some()
    }

    pub fn violation_error(&self) -> Option<ComplianceViolationError> {
        self.blocking_finding().map(|f| ComplianceViolationError {
            service: self.service.clone(),
            rule_id: f.rule_id.clone(),
            fix_hint: f.fix_hint.clone(),
        })
    }

    /// `(rule_id, severity)` pairs, as stored in the service status.
    pub fn violations(&self) -> Vec<(String, Severity)> {
        self.findings
            .iter()
            .map(|f| (f.rule_id.clone(), f.severity))
            .collect()
    }
}

/// Fleet-wide compliance report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub services: Vec<ComplianceEntry>,
    /// Mean score over enabled services; 1.0 if none is enabled.
    pub mean_score: f64,
    /// Enabled services with at least one CRITICAL finding.
    pub critical_services: usize,
    /// Enabled services with at least one WARNING finding.
    pub warning_services: usize,
}

impl ComplianceReport {
    pub fn from_entries(services: Vec<ComplianceEntry>) -> Self {
        let enabled: Vec<&ComplianceEntry> = services.iter().filter(|e| e.enabled).collect();

        let mean_score = if enabled.is_empty() {
            1.0
        } else {
            enabled.iter().map(|e| e.score).sum::<f64>() / enabled.len() as f64
        };
        let critical_services = enabled
            .iter()
            .filter(|e| e.has_severity(Severity::Critical))
            .count();
        let warning_services = enabled
            .iter()
            .filter(|e| e.has_severity(Severity::Warning))
            .count();

        Self {
            generated_at: Utc::now(),
            services,
            mean_score,
            critical_services,
            warning_services,
        }
    }

    pub fn entry(&self, service: &str) -> Option<&ComplianceEntry> {
        self.services.iter().find(|e| e.service == service)
    }
}
