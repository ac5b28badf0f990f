//! Restart Policy Engine.
//!
//! Turns health results and exit events into restart decisions. The policy
//! itself ([`RestartPolicy`]) is a pure function of the per-service
//! [`RestartHistory`]; [`RestartEngine`] runs it on its own task and talks to
//! the supervisor over channels only.
//!
//! A restart is triggered by `failure_threshold` consecutive UNHEALTHY results
//! or by any unexpected exit. Attempt `n` (1-based) waits
//! `base_delay × multiplier^(n-1)`, capped at `max_delay`. Once `max_attempts`
//! restarts have been spent the next trigger gives up. The budget refills on the
//! first HEALTHY result after a restart and on a manual start.

use fleet_common::HealthResult;
use fleet_registry::{HealthOptions, RestartOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicyConfig {
    pub failure_threshold: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RestartPolicyConfig {
    pub fn from_options(health: &HealthOptions, restart: &RestartOptions) -> Self {
        Self {
            failure_threshold: health.failure_threshold,
            max_attempts: restart.max_attempts,
            base_delay: restart.base_delay,
            multiplier: restart.multiplier,
            max_delay: restart.max_delay,
        }
    }

    /// Delay before restart attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self::from_options(&HealthOptions::default(), &RestartOptions::default())
    }
}

/// Per-service counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartHistory {
    pub consecutive_failures: u32,
    /// Restarts spent from the current budget.
    pub attempts: u32,
    /// Set on every start; the first HEALTHY result after it refills the budget.
    pub awaiting_healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartAction {
    RestartNow { delay: Duration, attempt: u32 },
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    config: RestartPolicyConfig,
}

impl RestartPolicy {
    pub fn new(config: RestartPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RestartPolicyConfig {
        &self.config
    }

    /// Feed one health result. Returns an action once the threshold is hit.
    pub fn on_health(&self, history: &mut RestartHistory, result: HealthResult) -> Option<RestartAction> {
        match result {
            HealthResult::Healthy => {
                history.consecutive_failures = 0;
                if history.awaiting_healthy {
                    history.awaiting_healthy = false;
                    history.attempts = 0;
                }
                None
            }
            HealthResult::Unhealthy => {
                history.consecutive_failures += 1;
                if history.consecutive_failures >= self.config.failure_threshold {
                    history.consecutive_failures = 0;
                    Some(self.trigger(history))
                } else {
                    None
                }
            }
            HealthResult::Unknown => None,
        }
    }

    /// An unexpected exit always triggers.
    pub fn on_exit(&self, history: &mut RestartHistory) -> RestartAction {
        history.consecutive_failures = 0;
        self.trigger(history)
    }

    /// The service reached RUNNING.
    pub fn on_started(&self, history: &mut RestartHistory) {
        history.consecutive_failures = 0;
        history.awaiting_healthy = true;
    }

    pub fn reset(&self, history: &mut RestartHistory) {
        *history = RestartHistory::default();
    }

    fn trigger(&self, history: &mut RestartHistory) -> RestartAction {
        if history.attempts >= self.config.max_attempts {
            return RestartAction::GiveUp {
                attempts: history.attempts,
            };
        }
        history.attempts += 1;
        RestartAction::RestartNow {
            delay: self.config.delay_for(history.attempts),
            attempt: history.attempts,
        }
    }
}

/// Input to the engine. `generation` identifies the process run the input
/// belongs to and is echoed back in the decision.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyInput {
    Health {
        service: String,
        generation: u64,
        result: HealthResult,
    },
    Exited {
        service: String,
        generation: u64,
    },
    Started {
        service: String,
    },
    /// Manual start: refill the budget.
    Reset {
        service: String,
    },
    /// Service removed from the registry.
    Forget {
        service: String,
    },
    Reconfigure(RestartPolicyConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestartDecision {
    pub service: String,
    pub generation: u64,
    pub action: RestartAction,
}

pub struct RestartEngine {
    policy: RestartPolicy,
    histories: HashMap<String, RestartHistory>,
    inputs: mpsc::UnboundedReceiver<PolicyInput>,
    decisions: mpsc::UnboundedSender<RestartDecision>,
}

impl RestartEngine {
    pub fn new(
        config: RestartPolicyConfig,
        inputs: mpsc::UnboundedReceiver<PolicyInput>,
        decisions: mpsc::UnboundedSender<RestartDecision>,
    ) -> Self {
        Self {
            policy: RestartPolicy::new(config),
            histories: HashMap::new(),
            inputs,
            decisions,
        }
    }

    /// Run on a background task until the input sender is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!("Restart policy engine started");
        while let Some(input) = self.inputs.recv().await {
            if let Some(decision) = self.handle(input) {
                if self.decisions.send(decision).is_err() {
                    break;
                }
            }
        }
        debug!("Restart policy engine stopped");
    }

    fn handle(&mut self, input: PolicyInput) -> Option<RestartDecision> {
        let (service, generation, action) = match input {
            PolicyInput::Health {
                service,
                generation,
                result,
            } => {
                let history = self.histories.entry(service.clone()).or_default();
                let action = self.policy.on_health(history, result)?;
                (service, generation, action)
            }
            PolicyInput::Exited { service, generation } => {
                let history = self.histories.entry(service.clone()).or_default();
                let action = self.policy.on_exit(history);
                (service, generation, action)
            }
            PolicyInput::Started { service } => {
                let history = self.histories.entry(service).or_default();
                self.policy.on_started(history);
                return None;
            }
            PolicyInput::Reset { service } => {
                let history = self.histories.entry(service).or_default();
                self.policy.reset(history);
                return None;
            }
            PolicyInput::Forget { service } => {
                self.histories.remove(&service);
                return None;
            }
            PolicyInput::Reconfigure(config) => {
                info!("Restart policy reconfigured: {:?}", config);
                self.policy = RestartPolicy::new(config);
                return None;
            }
        };

        match action {
            RestartAction::RestartNow { delay, attempt } => info!(
                service = %service,
                attempt,
                max_attempts = self.policy.config().max_attempts,
                "Restart scheduled in {:?}",
                delay
            ),
            RestartAction::GiveUp { attempts } => {
                warn!(service = %service, attempts, "Restart budget exhausted")
            }
        }

        Some(RestartDecision {
            service,
            generation,
            action,
        })
    }
}
