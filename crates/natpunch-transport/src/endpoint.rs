//! Network endpoint value type.

use crate::transport::{TransportError, TransportResult};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// An (IP address, port) pair as published by the rendezvous service.
///
/// The host is kept as the string the service handed out, so an endpoint
/// compares equal only to one with the exact same host text and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host string and port
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host part (IP address text)
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse the host as a literal IP address.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unresolvable` if the host is not an IP literal.
    pub fn socket_addr(&self) -> TransportResult<SocketAddr> {
        let ip: IpAddr = self
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| TransportError::Unresolvable(self.to_string()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Resolve to a socket address, falling back to a DNS lookup when the
    /// host is not an IP literal.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unresolvable` if the lookup yields nothing.
    pub async fn resolve(&self) -> TransportResult<SocketAddr> {
        if let Ok(addr) = self.socket_addr() {
            return Ok(addr);
        }

        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|_| TransportError::Unresolvable(self.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Unresolvable(self.to_string()))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
