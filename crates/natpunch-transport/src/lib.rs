//! # natpunch Transport
//!
//! The single UDP socket of a punchthrough session.
//!
//! This crate provides:
//! - [`UdpChannel`]: one bound socket shared by every concurrent unit
//! - [`Datagrams`]: the single-consumer receive sequence, ended by closing
//! - [`Endpoint`]: the (host, port) value type handed out by the rendezvous service
//! - The [`Transport`] trait for code that only needs send/receive

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod endpoint;
pub mod transport;

pub use channel::{Datagram, Datagrams, UdpChannel};
pub use endpoint::Endpoint;
pub use transport::{Transport, TransportError, TransportResult, TransportStats};

/// Socket configuration applied at bind time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Send buffer size in bytes
    pub send_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}
