//! Health Monitor: periodic probing of every running service.
//!
//! The monitor never touches service status. The supervisor publishes the set
//! of probe targets on a `watch` channel and consumes [`HealthEvent`]s from an
//! `mpsc` channel. Each event carries the start generation of the target it
//! was probed for, so the supervisor can drop results that arrive after a
//! restart.

use crate::probe::{probe_for, run_probe};
use chrono::{DateTime, Utc};
use fleet_common::HealthResult;
use fleet_registry::HealthCheckSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A RUNNING service to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service: String,
    pub generation: u64,
    pub pid: u32,
    pub port: u16,
    pub check: HealthCheckSpec,
}

/// Outcome of one probe, as reported to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub service: String,
    pub generation: u64,
    pub result: HealthResult,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub interval: Duration,
    /// Bound on each individual probe.
    pub timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    targets: watch::Receiver<Vec<ProbeTarget>>,
    events: mpsc::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        targets: watch::Receiver<Vec<ProbeTarget>>,
        events: mpsc::Sender<HealthEvent>,
    ) -> Self {
        Self {
            config,
            targets,
            events,
        }
    }

    /// Run the probing loop on a background task.
    ///
    /// The loop ends when the target sender or the event receiver is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            "Health monitor started (interval: {:?}, timeout: {:?})",
            self.config.interval, self.config.timeout
        );

        // First round one interval after start, like every later round.
        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.targets.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // New targets are picked up on the next tick
                    continue;
                }
            }

            let targets = self.targets.borrow_and_update().clone();
            if targets.is_empty() {
                continue;
            }

            debug!("Probing {} service(s)", targets.len());
            let events = probe_all(&targets, self.config.timeout).await;

            for event in events {
                if event.result == HealthResult::Unhealthy {
                    warn!(
                        service = %event.service,
                        generation = event.generation,
                        "Health check failed: {}",
                        event.reason.as_deref().unwrap_or("unknown reason")
                    );
                }
                if self.events.send(event).await.is_err() {
                    info!("Health event receiver dropped, stopping health monitor");
                    return;
                }
            }
        }

        info!("Health monitor stopped");
    }
}

/// Probe all targets concurrently.
pub async fn probe_all(targets: &[ProbeTarget], timeout: Duration) -> Vec<HealthEvent> {
    let probes = targets.iter().map(|target| async move {
        let probe = probe_for(&target.service, &target.check, target.port, target.pid);
        let outcome = run_probe(&target.service, probe.as_ref(), timeout).await;
        HealthEvent {
            service: target.service.clone(),
            generation: target.generation,
            result: outcome.result,
            reason: outcome.reason,
            timestamp: outcome.checked_at,
        }
    });

    futures::future::join_all(probes).await
}
