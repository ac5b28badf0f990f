//! Operation runner: executes process work off the actor task.
//!
//! Spawning and terminating can block for seconds (grace periods). The actor
//! only decides; [`OpRunner`] runs the resulting [`Job`] on a worker task and
//! always reports back with a [`Completion::Job`], even if the job panicked.

use fleet_common::{ProcessError, ProcessResult};
use fleet_process::{spawn, ExitInfo, LaunchSpec, ProcessHandle, TerminationOutcome};
use futures::future::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

/// Upper bound on jobs running at once across all services.
pub(super) const MAX_CONCURRENT_JOBS: usize = 16;

pub(super) enum Job {
    Spawn(LaunchSpec),
    Terminate { handle: ProcessHandle, grace: Duration },
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Spawn,
    Terminate,
}

impl JobKind {
    fn name(self) -> &'static str {
        match self {
            JobKind::Spawn => "spawn",
            JobKind::Terminate => "terminate",
        }
    }

    /// Output reported when the job could not produce one itself.
    fn failed(self, service: &str, reason: String) -> JobOutput {
        match self {
            JobKind::Spawn => JobOutput::Spawned(Err(ProcessError::spawn_failed(service, reason))),
            JobKind::Terminate => JobOutput::Terminated(Err(ProcessError::timeout(service, reason))),
        }
    }
}

impl Job {
    fn kind(&self) -> JobKind {
        match self {
            Job::Spawn(_) => JobKind::Spawn,
            Job::Terminate { .. } => JobKind::Terminate,
        }
    }

    async fn run(self) -> JobOutput {
        match self {
            Job::Spawn(spec) => JobOutput::Spawned(spawn(&spec)),
            Job::Terminate { handle, grace } => JobOutput::Terminated(handle.terminate(grace).await),
        }
    }
}

pub(super) enum JobOutput {
    Spawned(ProcessResult<ProcessHandle>),
    Terminated(ProcessResult<TerminationOutcome>),
}

/// Everything that flows back into the actor from background tasks.
pub(super) enum Completion {
    Job { service: String, output: JobOutput },
    /// A supervised process exited; `generation` is the run it belonged to.
    Exited {
        service: String,
        generation: u64,
        info: ExitInfo,
    },
    /// The backoff delay of a pending restart elapsed.
    RestartDue { service: String, generation: u64 },
}

pub(super) struct OpRunner {
    completed_tx: mpsc::Sender<Completion>,
    semaphore: Arc<Semaphore>,
}

impl OpRunner {
    pub fn new(concurrency: usize, completed_tx: mpsc::Sender<Completion>) -> Self {
        debug!("OpRunner started with {} permits", concurrency);
        Self {
            completed_tx,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Run `job` for `service` on a worker task.
    pub fn submit(&self, service: &str, job: Job) {
        let service = service.to_string();
        let completed_tx = self.completed_tx.clone();
        let semaphore = Arc::clone(&self.semaphore);

        tokio::spawn(async move {
            let kind = job.kind();
            let output = match semaphore.acquire_owned().await {
                Ok(_permit) => match AssertUnwindSafe(job.run()).catch_unwind().await {
                    Ok(output) => output,
                    Err(panic_info) => {
                        let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        error!(
                            "Job panicked for service {} during {}: {}",
                            service,
                            kind.name(),
                            panic_msg
                        );
                        kind.failed(&service, format!("{} panicked: {}", kind.name(), panic_msg))
                    }
                },
                Err(e) => {
                    error!("OpRunner semaphore closed unexpectedly: {}", e);
                    kind.failed(&service, format!("operation runner closed: {}", e))
                }
            };

            if completed_tx.send(Completion::Job { service, output }).await.is_err() {
                error!("Failed to report job completion: completion channel closed");
            }
        });
    }
}
