//! Transport trait abstraction over the datagram socket.
//!
//! Components that only need to push and pull datagrams are written against
//! this trait so they do not care whether the socket underneath is the shared
//! [`UdpChannel`](crate::channel::UdpChannel) or something else.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;

/// Socket-level failures of the shared channel
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket I/O failure
    #[error("Socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The channel has been closed
    #[error("Channel is closed")]
    Closed,

    /// The socket could not be created or bound
    #[error("Cannot bind UDP socket: {0}")]
    BindFailed(String),

    /// Endpoint could not be turned into a socket address
    #[error("Unresolvable endpoint: {0}")]
    Unresolvable(String),

    /// The single receive sequence has already been handed out
    #[error("Receive sequence already taken")]
    ReceiverTaken,
}

/// Shorthand for results carrying [`TransportError`]
pub type TransportResult<T> = Result<T, TransportError>;

/// Async datagram transport.
///
/// # Examples
///
/// ```no_run
/// use natpunch_transport::channel::UdpChannel;
/// use natpunch_transport::transport::Transport;
/// use std::net::SocketAddr;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let local: SocketAddr = "0.0.0.0:0".parse()?;
/// let channel = UdpChannel::bind(local).await?;
///
/// channel.send_to(b"PING from local", "192.0.2.10:41000".parse()?).await?;
///
/// let mut datagram = [0u8; 2048];
/// let (len, peer) = channel.recv_from(&mut datagram).await?;
/// println!("{len} bytes from {peer}");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr`.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` after close, or the socket error.
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Receive one datagram into `buf`.
    ///
    /// Yields the datagram length and its source address.
    ///
    /// # Errors
    /// Returns `TransportError::Closed` once the channel closes, even mid-wait.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Address the socket is bound to.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the OS cannot report it
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Close the channel. Idempotent.
    ///
    /// Pending receives are woken and return `TransportError::Closed`.
    ///
    /// # Errors
    /// Implementations may report a failure to release the socket
    async fn close(&self) -> TransportResult<()>;

    /// Whether [`Transport::close`] has run.
    fn is_closed(&self) -> bool;

    /// Counters since bind.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Datagram counters for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Datagrams sent
    pub packets_sent: u64,
    /// Datagrams received
    pub packets_received: u64,
    /// Sends the socket refused
    pub send_errors: u64,
    /// Receives that failed
    pub recv_errors: u64,
}

impl TransportStats {
    /// All counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of send attempts that failed, 0.0 when nothing was attempted
    #[must_use]
    pub fn send_error_rate(&self) -> f64 {
        let attempts = self.packets_sent + self.send_errors;
        if attempts == 0 {
            0.0
        } else {
            self.send_errors as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_have_no_error_rate() {
        let stats = TransportStats::new();
        assert_eq!(stats, TransportStats::default());
        assert_eq!(stats.send_error_rate(), 0.0);
    }

    #[test]
    fn test_send_error_rate() {
        let stats = TransportStats {
            packets_sent: 3,
            send_errors: 1,
            ..TransportStats::default()
        };
        assert!((stats.send_error_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(TransportError::Closed.to_string(), "Channel is closed");
        assert_eq!(
            TransportError::ReceiverTaken.to_string(),
            "Receive sequence already taken"
        );
        assert_eq!(
            TransportError::BindFailed("0.0.0.0:1: in use".to_string()).to_string(),
            "Cannot bind UDP socket: 0.0.0.0:1: in use"
        );
        assert_eq!(
            TransportError::Unresolvable("nowhere:1".to_string()).to_string(),
            "Unresolvable endpoint: nowhere:1"
        );
    }

    #[test]
    fn test_io_errors_convert() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        match TransportError::from(refused) {
            TransportError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected {other:?}"),
        }
    }
}
