//! Status endpoint resolution
//!
//! Rules:
//! - Blank means the default `http://127.0.0.1:4078/`
//! - `0` means the worker's JSON-API is disabled, which blocks launching
//! - The host must be an IP literal; IPv6 goes in brackets
//! - The address must be bindable locally before the worker is started

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:4078";
pub const DISABLED_ENDPOINT: &str = "0";
const HTTP_SCHEME: &str = "http://";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("JSON-API is disabled")]
    Disabled,

    #[error("Invalid port provided for JSON-API")]
    InvalidPort,

    #[error("Invalid IP address provided for JSON-API")]
    InvalidAddress,

    #[error("JSON-API failed to bind to: {0}")]
    BindFailed(String),
}

/// Validated status endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEndpoint {
    pub addr: SocketAddr,
    /// Normalized `http://host:port/` form
    pub uri: String,
}

impl fmt::Display for StatusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Parse the endpoint setting into a socket address and URI
pub fn resolve_endpoint(raw: &str) -> Result<StatusEndpoint, EndpointError> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { DEFAULT_ENDPOINT } else { raw };
    if raw == DISABLED_ENDPOINT {
        return Err(EndpointError::Disabled);
    }

    let authority = raw.strip_prefix(HTTP_SCHEME).unwrap_or(raw);
    let authority = authority.trim_end_matches('/');
    if authority.contains('/') {
        // Another scheme or a path component
        return Err(EndpointError::InvalidPort);
    }

    let (host, port) = match authority.rfind(':') {
        Some(idx) => (&authority[..idx], &authority[idx + 1..]),
        None => return Err(EndpointError::InvalidPort),
    };
    let port: u16 = port.parse().map_err(|_| EndpointError::InvalidPort)?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = host.parse().map_err(|_| EndpointError::InvalidAddress)?;

    let addr = SocketAddr::new(ip, port);
    Ok(StatusEndpoint {
        addr,
        uri: format!("{}{}/", HTTP_SCHEME, addr),
    })
}

/// Bind the endpoint address once and release it
pub async fn verify_bindable(endpoint: &StatusEndpoint) -> Result<(), EndpointError> {
    match tokio::net::TcpListener::bind(endpoint.addr).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(_) => Err(EndpointError::BindFailed(endpoint.uri.clone())),
    }
}
