//! Low-level process operations.
//!
//! - Spawning a service process and watching it until it exits
//! - Liveness checks by PID
//! - Graceful and forced termination

pub mod check;
pub mod spawn;
pub mod terminate;

pub use check::process_exists;
pub use spawn::{spawn, ExitInfo, LaunchSpec, ProcessHandle, TerminationOutcome, FORCE_KILL_TIMEOUT};
pub use terminate::{force_kill, terminate_gracefully};
