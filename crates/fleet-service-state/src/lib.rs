//! Lifecycle state of a supervised service.
//!
//! [`ServiceStateMachine`] enforces the allowed transitions and keeps a bounded
//! history of them. The supervisor actor owns one machine per service and is
//! the only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_HISTORY: usize = 100;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    /// No process. Initial state.
    Stopped,
    /// A CRITICAL compliance finding refused the last start. No process.
    Blocked,
    /// Spawn in progress, or waiting out a restart delay.
    Starting,
    /// Process is alive.
    Running,
    /// Termination in progress.
    Stopping,
    /// Restart budget exhausted. Needs a manual start.
    Failed,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "STOPPED",
            ServiceState::Blocked => "BLOCKED",
            ServiceState::Starting => "STARTING",
            ServiceState::Running => "RUNNING",
            ServiceState::Stopping => "STOPPING",
            ServiceState::Failed => "FAILED",
        }
    }

    /// States with no process and no pending work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Stopped | ServiceState::Blocked | ServiceState::Failed
        )
    }

    pub fn is_transitional(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }

    /// States in which the service holds its port reservation.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for '{service}': {from} -> {to}")]
pub struct InvalidTransition {
    pub service: String,
    pub from: ServiceState,
    pub to: ServiceState,
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ServiceState,
    pub to_state: ServiceState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceStateMachine {
    service: String,
    current_state: ServiceState,
    previous_state: Option<ServiceState>,
    state_history: Vec<StateTransition>,
    last_transition_time: DateTime<Utc>,
}

impl ServiceStateMachine {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            current_state: ServiceState::Stopped,
            previous_state: None,
            state_history: Vec::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn current_state(&self) -> ServiceState {
        self.current_state
    }

    pub fn previous_state(&self) -> Option<ServiceState> {
        self.previous_state
    }

    pub fn state_history(&self) -> &[StateTransition] {
        &self.state_history
    }

    pub fn last_transition_time(&self) -> DateTime<Utc> {
        self.last_transition_time
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.state_history.last()
    }

    /// Check if a transition from the current state to `target` is allowed.
    pub fn is_valid_transition(&self, target: ServiceState) -> bool {
        use ServiceState::*;

        match (self.current_state, target) {
            // Start requests, compliance refusals
            (Stopped | Blocked | Failed, Starting) => true,
            (Stopped | Blocked | Failed, Blocked) => true,

            // From Starting
            (Starting, Running) => true,
            (Starting, Stopped) => true, // spawn failed or start cancelled
            (Starting, Failed) => true,  // give up while waiting out a delay
            (Starting, Blocked) => true, // compliance refused a restart

            // From Running
            (Running, Stopping) => true,
            (Running, Starting) => true, // restart
            (Running, Failed) => true,
            (Running, Stopped) => true, // exited with auto restart off

            // From Stopping
            (Stopping, Stopped) => true,

            (state, target) if state == target => true,

            _ => false,
        }
    }

    /// Move to `target`, recording the transition.
    pub fn transition_to(
        &mut self,
        target: ServiceState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.is_valid_transition(target) {
            return Err(InvalidTransition {
                service: self.service.clone(),
                from: self.current_state,
                to: target,
            });
        }

        let from = self.current_state;
        let now = Utc::now();
        self.state_history.push(StateTransition {
            from_state: from,
            to_state: target,
            timestamp: now,
            reason,
        });
        if self.state_history.len() > MAX_HISTORY {
            self.state_history.remove(0);
        }

        self.previous_state = Some(from);
        self.current_state = target;
        self.last_transition_time = now;

        tracing::debug!(
            service = %self.service,
            from = %from,
            to = %target,
            "State transition"
        );

        Ok(())
    }

    pub fn can_start(&self) -> bool {
        self.current_state.is_terminal()
    }

    pub fn can_stop(&self) -> bool {
        matches!(
            self.current_state,
            ServiceState::Starting | ServiceState::Running
        )
    }

    pub fn time_in_current_state(&self) -> chrono::Duration {
        Utc::now() - self.last_transition_time
    }

    /// Count transitions into `state` that are still in the history.
    pub fn count_transitions_to(&self, state: ServiceState) -> usize {
        self.state_history
            .iter()
            .filter(|t| t.to_state == state)
            .count()
    }
}
