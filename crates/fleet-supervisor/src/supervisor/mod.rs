//! Process Supervisor - actor-based lifecycle management for the fleet.
//!
//! - A single event loop ([`actor`]) owns every service's state machine,
//!   process handle, port reservation and generation counter
//! - [`Supervisor`] is a cloneable handle that sends commands to it
//! - Process work runs on an operation runner ([`ops`]) and reports back
//!
//! ## Components
//!
//! `Supervisor::new` wires four tasks together:
//!
//! | Task | Input | Output |
//! |------|-------|--------|
//! | Supervisor actor | commands, completions, health events, decisions | probe targets, policy inputs |
//! | Health monitor | probe targets (`watch`) | health events |
//! | Restart policy engine | policy inputs | restart decisions |
//! | Operation runner workers | jobs | completions |
//!
//! Health results and restart decisions are tagged with the generation of the
//! process run they concern; the actor drops the ones that arrive late.
//!
//! ## Per-Service Operation Queueing
//!
//! Requests for a service that is busy are queued (FIFO, at most 32) rather
//! than rejected. A manual restart is queued as a stop followed by a start.
//!
//! ## Backpressure
//!
//! | Channel | Capacity |
//! |---------|----------|
//! | Commands | 32 |
//! | Completions | 256 |
//! | Health events | 256 |
//! | Policy inputs / decisions | unbounded (one message per probe or exit) |

mod actor;
mod commands;
mod handle;
mod ops;
mod types;

#[cfg(test)]
mod tests;

pub use handle::Supervisor;
pub use types::{BatchResults, ReloadSummary, ServiceStatus, Violation};

use crate::restart::{RestartEngine, RestartPolicyConfig};
use actor::SupervisorActor;
use commands::SupervisorCommand;
use fleet_common::Result;
use fleet_monitoring::{HealthEvent, HealthMonitor, HealthMonitorConfig, ProbeTarget};
use fleet_registry::RegistryConfig;
use ops::Completion;
use tokio::sync::{mpsc, watch};
use tracing::info;

impl Supervisor {
    /// Create a supervisor for the services of `config`.
    ///
    /// Every service starts out STOPPED; call [`Supervisor::start_all`] to
    /// bring up the auto-start services. Must be called within a Tokio
    /// runtime.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating supervisor with {} service(s), {} compliance rule(s)",
            config.services.len(),
            config.compliance.rules.len()
        );

        let (targets_tx, targets_rx) = watch::channel(Vec::new());
        let (health_tx, health_rx) = mpsc::channel(256);

        let health = &config.supervisor.health;
        HealthMonitor::new(
            HealthMonitorConfig {
                interval: health.interval,
                timeout: health.timeout,
            },
            targets_rx,
            health_tx,
        )
        .spawn();

        Ok(Self::spawn_actor(config, targets_tx, health_rx))
    }

    /// Start the restart engine and the actor, which reads health results
    /// from `health_rx` and publishes probe targets on `targets_tx`.
    fn spawn_actor(
        config: RegistryConfig,
        targets_tx: watch::Sender<Vec<ProbeTarget>>,
        health_rx: mpsc::Receiver<HealthEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SupervisorCommand>(32);
        let (completed_tx, completed_rx) = mpsc::channel::<Completion>(256);
        let (policy_tx, policy_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();

        RestartEngine::new(
            RestartPolicyConfig::from_options(&config.supervisor.health, &config.supervisor.restart),
            policy_rx,
            decision_tx,
        )
        .spawn();

        let actor = SupervisorActor::new(config, completed_tx, targets_tx, policy_tx);
        tokio::spawn(actor.run(cmd_rx, completed_rx, health_rx, decision_rx));

        Supervisor { cmd_tx }
    }
}
