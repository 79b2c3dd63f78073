//! Pairing string format (spec.md §6): `austream://<ipv4>:<portA>?pin=<6-digit>&name=<url-encoded hostname>`.
//! QR rendering and "recent connections" are presentational collaborator
//! concerns outside this spec; this module only formats/parses the string.

use std::net::Ipv4Addr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::config::DEFAULT_PORT_A;
use crate::error::ProtocolError;

#[derive(Debug, Clone, Serialize)]
pub struct PairingInfo {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub pin: Option<String>,
    pub name: String,
}

/// Render `austream://ip:port?pin=NNNNNN&name=host`.
pub fn format(info: &PairingInfo) -> String {
    let encoded_name = utf8_percent_encode(&info.name, NON_ALPHANUMERIC);
    match &info.pin {
        Some(pin) => format!(
            "austream://{}:{}?pin={}&name={}",
            info.ip, info.port, pin, encoded_name
        ),
        None => format!("austream://{}:{}?name={}", info.ip, info.port, encoded_name),
    }
}

/// Parse a pairing string back into its parts. `?pin=` is optional; the port
/// defaults to [`DEFAULT_PORT_A`] when omitted.
pub fn parse(pairing_string: &str) -> Result<PairingInfo, ProtocolError> {
    let rest = pairing_string
        .strip_prefix("austream://")
        .ok_or_else(|| ProtocolError::UnknownControlResponse(pairing_string.to_string()))?;

    let (host_part, query) = match rest.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (rest, None),
    };

    let (ip_str, port) = match host_part.split_once(':') {
        Some((ip, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ProtocolError::UnknownControlResponse(pairing_string.to_string()))?;
            (ip, port)
        }
        None => (host_part, DEFAULT_PORT_A),
    };
    let ip = ip_str
        .parse::<Ipv4Addr>()
        .map_err(|_| ProtocolError::UnknownControlResponse(pairing_string.to_string()))?;

    let mut pin = None;
    let mut name = String::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                match key {
                    "pin" => pin = Some(value.to_string()),
                    "name" => {
                        name = percent_decode_str(value)
                            .decode_utf8_lossy()
                            .into_owned()
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(PairingInfo { ip, port, pin, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_pin_and_spaced_name() {
        let info = PairingInfo {
            ip: Ipv4Addr::new(192, 168, 1, 42),
            port: 5004,
            pin: Some("123456".into()),
            name: "Kyle's Laptop".into(),
        };
        let rendered = format(&info);
        let parsed = parse(&rendered).unwrap();
        assert_eq!(parsed.ip, info.ip);
        assert_eq!(parsed.port, info.port);
        assert_eq!(parsed.pin, info.pin);
        assert_eq!(parsed.name, info.name);
    }

    #[test]
    fn missing_port_defaults_to_5004() {
        let parsed = parse("austream://10.0.0.5?pin=000000&name=host").unwrap();
        assert_eq!(parsed.port, DEFAULT_PORT_A);
    }

    #[test]
    fn missing_pin_is_none() {
        let parsed = parse("austream://10.0.0.5:5004?name=host").unwrap();
        assert!(parsed.pin.is_none());
    }

    #[test]
    fn rejects_non_austream_scheme() {
        assert!(parse("http://10.0.0.5:5004").is_err());
    }
}
