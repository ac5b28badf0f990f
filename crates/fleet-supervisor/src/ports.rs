//! Port reservations.
//!
//! A port is held by at most one service. The reservation is taken before a
//! service enters STARTING and released once it is STOPPED or FAILED, so a
//! pending restart keeps the port.

use fleet_common::PortConflictError;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct PortAllocator {
    /// port -> holding service
    holders: HashMap<u16, String>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `port` for `service`.
    ///
    /// Re-reserving a port the service already holds succeeds. A service
    /// moving to a new port gives up its old one.
    pub fn reserve(&mut self, service: &str, port: u16) -> Result<u16, PortConflictError> {
        match self.holders.get(&port) {
            Some(holder) if holder == service => Ok(port),
            Some(holder) => Err(PortConflictError::new(port, holder.clone(), service)),
            None => {
                self.release(service);
                debug!(service, port, "Port reserved");
                self.holders.insert(port, service.to_string());
                Ok(port)
            }
        }
    }

    /// Release whatever port `service` holds. Releasing nothing is a no-op.
    pub fn release(&mut self, service: &str) -> Option<u16> {
        let port = self.port_of(service)?;
        self.holders.remove(&port);
        debug!(service, port, "Port released");
        Some(port)
    }

    pub fn holder(&self, port: u16) -> Option<&str> {
        self.holders.get(&port).map(String::as_str)
    }

    pub fn port_of(&self, service: &str) -> Option<u16> {
        self.holders
            .iter()
            .find(|(_, holder)| holder.as_str() == service)
            .map(|(port, _)| *port)
    }

    pub fn reserved_count(&self) -> usize {
        self.holders.len()
    }
}
