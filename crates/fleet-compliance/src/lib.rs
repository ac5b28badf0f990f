//! Compliance Evaluator.
//!
//! Checks service definitions (and, when available, a snapshot of the running
//! process) against the closed set of compliance rules declared in the
//! registry. Evaluation is pure: the caller gathers snapshots, the evaluator
//! only classifies.

pub mod evaluator;
pub mod report;
pub mod snapshot;

pub use evaluator::{check_rule, ComplianceEvaluator, RuleOutcome};
pub use fleet_registry::{default_rules, ComplianceRule, RuleKind};
pub use report::{ComplianceEntry, ComplianceReport, Finding};
pub use snapshot::RuntimeSnapshot;
