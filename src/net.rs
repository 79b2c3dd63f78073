use std::net::{Ipv4Addr, TcpListener};

use anyhow::Result;

/// Pick a random free TCP port by binding to port 0 and returning the assigned port.
pub fn pick_free_port() -> Result<u16> {
    let sock = TcpListener::bind(("0.0.0.0", 0))?;
    let port = sock.local_addr()?.port();
    drop(sock);
    Ok(port)
}

/// This host's first non-loopback IPv4 address, for the pairing string
/// (spec.md §6). Falls back to loopback if nothing else is found.
pub fn primary_ipv4() -> Ipv4Addr {
    get_if_addrs::get_if_addrs()
        .ok()
        .into_iter()
        .flatten()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            _ => None,
        })
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Best-effort local hostname, used for `AUSTREAM_ALIVE:<hostname>` replies
/// and the pairing string's `name=` field.
pub fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "austream-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_free_port_returns_a_bindable_port() {
        let port = pick_free_port().unwrap();
        assert!(port > 0);
    }

    #[test]
    fn primary_ipv4_never_panics() {
        let _ = primary_ipv4();
    }
}
