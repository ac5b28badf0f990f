use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Observed facts about a running service, consumed by runtime rules.
///
/// A field is `None` when it could not be determined; rules that need it are
/// skipped rather than failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub pid: Option<u32>,
    /// Local addresses listening on the service's target port.
    pub listen_addresses: Option<Vec<SocketAddr>>,
    pub health_reachable: Option<bool>,
}

impl RuntimeSnapshot {
    /// Snapshot of a process, reading its listeners from the OS.
    pub fn capture(pid: u32, port: u16, health_reachable: Option<bool>) -> Self {
        Self {
            pid: Some(pid),
            listen_addresses: listening_addresses(port),
            health_reachable,
        }
    }

    /// `Some(true)` if any listener is bound to the unspecified address.
    pub fn binds_all_interfaces(&self) -> Option<bool> {
        self.listen_addresses
            .as_ref()
            .map(|addrs| addrs.iter().any(|a| a.ip().is_unspecified()))
    }
}

/// Sockets in LISTEN state on `port`, from `/proc/net/tcp` and `/proc/net/tcp6`.
#[cfg(target_os = "linux")]
pub fn listening_addresses(port: u16) -> Option<Vec<SocketAddr>> {
    let mut found = Vec::new();
    let mut readable = false;

    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                readable = true;
                found.extend(parse_proc_net_tcp(&content, port));
            }
            Err(e) => tracing::trace!("Cannot read {}: {}", path, e),
        }
    }

    readable.then_some(found)
}

#[cfg(not(target_os = "linux"))]
pub fn listening_addresses(_port: u16) -> Option<Vec<SocketAddr>> {
    None
}

const TCP_LISTEN: &str = "0A";

/// Parse the body of a `/proc/net/tcp{,6}` table, keeping listeners on `port`.
pub(crate) fn parse_proc_net_tcp(content: &str, port: u16) -> Vec<SocketAddr> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != TCP_LISTEN {
                return None;
            }
            let addr = parse_hex_socket_addr(local)?;
            (addr.port() == port).then_some(addr)
        })
        .collect()
}

// Address words are printed in host byte order, the port in network order.
fn parse_hex_socket_addr(field: &str) -> Option<SocketAddr> {
    let (ip_hex, port_hex) = field.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let ip = match ip_hex.len() {
        8 => {
            let word = u32::from_str_radix(ip_hex, 16).ok()?;
            std::net::IpAddr::from(word.to_ne_bytes())
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(&ip_hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            std::net::IpAddr::from(octets)
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}
