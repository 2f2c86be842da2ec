//! Listening sockets of a container, read from `/proc/net/tcp{,6}`.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Command printing the TCP socket tables of the container.
pub const PROC_NET_TCP_COMMAND: [&str; 3] = ["cat", "/proc/net/tcp", "/proc/net/tcp6"];

/// `st` column value of a listening socket.
const TCP_LISTEN: &str = "0A";

/// A socket in the LISTEN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Listener {
    /// Bound address.
    pub address: IpAddr,
    /// Bound port.
    pub port: u16,
}

/// Kernel addresses are 32-bit words in host byte order.
fn parse_address(hex: &str) -> Option<IpAddr> {
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(word.swap_bytes())))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_mut(4).enumerate() {
                let word = u32::from_str_radix(hex.get(i * 8..i * 8 + 8)?, 16).ok()?;
                chunk.copy_from_slice(&word.swap_bytes().to_be_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Parses the listening sockets out of `/proc/net/tcp` and `/proc/net/tcp6`
/// lines. Header and malformed lines are skipped.
#[must_use]
pub fn parse_listeners<S: AsRef<str>>(lines: &[S]) -> BTreeSet<Listener> {
    lines
        .iter()
        .filter_map(|line| {
            let fields: Vec<&str> = line.as_ref().split_whitespace().collect();
            let (local, state) = (fields.get(1)?, fields.get(3)?);
            if *state != TCP_LISTEN {
                return None;
            }
            let (address, port) = local.split_once(':')?;
            Some(Listener {
                address: parse_address(address)?,
                port: u16::from_str_radix(port, 16).ok()?,
            })
        })
        .collect()
}

/// Whether something listens on `port`, on any address.
#[must_use]
pub fn is_listening(listeners: &BTreeSet<Listener>, port: u16) -> bool {
    listeners.iter().any(|l| l.port == port)
}

/// Whether `port` is only reachable through the loopback interface.
#[must_use]
pub fn is_loopback_only(listeners: &BTreeSet<Listener>, port: u16) -> bool {
    let mut bound = listeners.iter().filter(|l| l.port == port).peekable();
    bound.peek().is_some() && bound.all(|l| l.address.is_loopback())
}
