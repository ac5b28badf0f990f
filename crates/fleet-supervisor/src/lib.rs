//! # Fleet Supervisor
//!
//! Lifecycle management for a fleet of long-running local services.
//!
//! - [`ports`]: port reservations, one holder per port
//! - [`restart`]: restart policy and the engine task that applies it
//! - [`supervisor`]: the supervisor actor and its [`Supervisor`] handle
//! - [`control`]: operator operations returning outcomes as values
//! - [`api`] / [`client`]: HTTP control API and its client

pub mod api;
pub mod client;
pub mod control;
pub mod ports;
pub mod restart;
pub mod supervisor;

pub use api::create_router;
pub use client::{ClientError, ControlClient};
pub use control::{ControlSurface, OperationOutcome, ReloadOutcome};
pub use ports::PortAllocator;
pub use restart::{
    RestartAction, RestartDecision, RestartEngine, RestartHistory, RestartPolicy,
    RestartPolicyConfig,
};
pub use supervisor::{BatchResults, ReloadSummary, ServiceStatus, Supervisor, Violation};
