//! Backend handshake line
//!
//! A backend announces where it listens by printing a single line to stdout:
//!
//! ```text
//! CORE|APP|NETWORK|ADDRESS[|PROTOCOL]
//! 1|2|tcp|127.0.0.1:41234|grpc
//! ```

use std::fmt;
use thiserror::Error;

/// Core protocol version a backend must speak
pub const CORE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    NetRpc,
    Grpc,
}

/// Address a started backend can be reached at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub app_version: u32,
    pub network: Network,
    pub address: String,
    pub protocol: Protocol,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let network = match self.network {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        };
        write!(f, "{}://{}", network, self.address)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("expected 4 or 5 '|'-separated fields, got {0}")]
    FieldCount(usize),

    #[error("unsupported core protocol version '{0}'")]
    CoreVersion(String),

    #[error("invalid app protocol version '{0}'")]
    AppVersion(String),

    #[error("unsupported network '{0}'")]
    Network(String),

    #[error("empty address")]
    EmptyAddress,

    #[error("unsupported protocol '{0}'")]
    Protocol(String),
}

/// Parse a handshake line
pub fn parse_handshake(line: &str) -> Result<Endpoint, HandshakeError> {
    let fields: Vec<&str> = line.trim().split('|').collect();
    if !(4..=5).contains(&fields.len()) {
        return Err(HandshakeError::FieldCount(fields.len()));
    }

    match fields[0].parse::<u32>() {
        Ok(CORE_PROTOCOL_VERSION) => {}
        _ => return Err(HandshakeError::CoreVersion(fields[0].to_string())),
    }

    let app_version = fields[1]
        .parse::<u32>()
        .map_err(|_| HandshakeError::AppVersion(fields[1].to_string()))?;

    let network = match fields[2] {
        "tcp" => Network::Tcp,
        "unix" => Network::Unix,
        other => return Err(HandshakeError::Network(other.to_string())),
    };

    let address = fields[3].trim();
    if address.is_empty() {
        return Err(HandshakeError::EmptyAddress);
    }

    let protocol = match fields.get(4).copied() {
        None | Some("") | Some("netrpc") => Protocol::NetRpc,
        Some("grpc") => Protocol::Grpc,
        Some(other) => return Err(HandshakeError::Protocol(other.to_string())),
    };

    Ok(Endpoint {
        app_version,
        network,
        address: address.to_string(),
        protocol,
    })
}
