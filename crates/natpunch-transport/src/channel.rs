//! The shared UDP channel.
//!
//! One [`UdpChannel`] owns the single socket of a punchthrough session. Handles
//! are cheap clones; any number of tasks may send concurrently, while exactly
//! one task consumes the [`Datagrams`] receive sequence.

use crate::endpoint::Endpoint;
use crate::transport::{Transport, TransportError, TransportResult, TransportStats};
use crate::TransportConfig;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Largest datagram the receive path accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

/// A received datagram and the address it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Raw payload, possibly empty
    pub payload: Vec<u8>,
    /// Sender address
    pub source: SocketAddr,
}

#[derive(Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

/// Async UDP channel shared by every unit of a session.
///
/// Clones share one socket. [`Transport::close`] ends every receive sequence
/// and refuses further sends, but the OS socket is only released when the
/// last clone (including any [`Datagrams`]) is dropped.
///
/// # Examples
///
/// ```no_run
/// use natpunch_transport::channel::UdpChannel;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = UdpChannel::bind("0.0.0.0:0".parse()?).await?;
/// println!("Now listening on {}", channel.local_endpoint()?);
///
/// let mut datagrams = channel.datagrams()?;
/// while let Some(datagram) = datagrams.next().await {
///     println!("{} bytes from {}", datagram.payload.len(), datagram.source);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    closed: Arc<watch::Sender<bool>>,
    receiver_taken: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl UdpChannel {
    /// Bind a channel with default socket buffer sizes.
    ///
    /// Use port 0 for an OS-assigned port.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind(addr: SocketAddr) -> TransportResult<Self> {
        Self::bind_with_config(addr, &TransportConfig::default()).await
    }

    /// Bind a channel applying the buffer sizes from `config`.
    ///
    /// # Errors
    /// Returns `TransportError::BindFailed` if the socket cannot be created or bound
    pub async fn bind_with_config(
        addr: SocketAddr,
        config: &TransportConfig,
    ) -> TransportResult<Self> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };

        let bind_err = |e: io::Error| TransportError::BindFailed(format!("{addr}: {e}"));

        let socket2 =
            socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))
                .map_err(bind_err)?;
        socket2
            .set_recv_buffer_size(config.recv_buffer_size)
            .map_err(bind_err)?;
        socket2
            .set_send_buffer_size(config.send_buffer_size)
            .map_err(bind_err)?;
        socket2.bind(&addr.into()).map_err(bind_err)?;
        socket2.set_nonblocking(true).map_err(bind_err)?;

        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        let channel = Self::from_socket(socket);
        tracing::debug!("UDP channel bound on {:?}", channel.socket.local_addr());
        Ok(channel)
    }

    /// Wrap an already-bound Tokio socket.
    #[must_use]
    pub fn from_socket(socket: UdpSocket) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            socket: Arc::new(socket),
            closed: Arc::new(closed),
            receiver_taken: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Local address as an [`Endpoint`]
    ///
    /// # Errors
    /// Returns `TransportError` if the address cannot be determined
    pub fn local_endpoint(&self) -> TransportResult<Endpoint> {
        self.local_addr().map(Endpoint::from)
    }

    /// Fire-and-forget send.
    ///
    /// Failures are counted and logged but never returned. The result only
    /// says whether the datagram was handed to the OS.
    pub async fn send_best_effort(&self, payload: &[u8], dest: SocketAddr) -> bool {
        match Transport::send_to(self, payload, dest).await {
            Ok(_) => true,
            Err(TransportError::Closed) => {
                tracing::debug!("Dropping {} byte datagram to {dest}: channel closed", payload.len());
                false
            }
            Err(e) => {
                tracing::warn!("Dropping {} byte datagram to {dest}: {e}", payload.len());
                false
            }
        }
    }

    /// Take the receive sequence.
    ///
    /// The sequence is single-consumer and cannot be restarted.
    ///
    /// # Errors
    /// Returns `TransportError::ReceiverTaken` on every call after the first
    pub fn datagrams(&self) -> TransportResult<Datagrams> {
        if self.receiver_taken.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ReceiverTaken);
        }
        Ok(Datagrams {
            channel: self.clone(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
            finished: false,
        })
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            let is_closed = *rx.borrow_and_update();
            if is_closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for UdpChannel {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.socket.send_to(buf, addr).await {
            Ok(sent) => {
                self.counters
                    .bytes_sent
                    .fetch_add(sent as u64, Ordering::Relaxed);
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(sent)
            }
            Err(e) => {
                self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let result = tokio::select! {
            biased;
            () = self.closed() => return Err(TransportError::Closed),
            result = self.socket.recv_from(buf) => result,
        };

        match result {
            Ok((size, addr)) => {
                self.counters
                    .bytes_received
                    .fetch_add(size as u64, Ordering::Relaxed);
                self.counters
                    .packets_received
                    .fetch_add(1, Ordering::Relaxed);
                Ok((size, addr))
            }
            Err(e) => {
                self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Io(e))
            }
        }
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.socket.local_addr().map_err(TransportError::Io)
    }

    /// Mark the channel closed. The socket stays bound until the last handle drops.
    async fn close(&self) -> TransportResult<()> {
        if !self.closed.send_replace(true) {
            tracing::debug!("UDP channel closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            recv_errors: self.counters.recv_errors.load(Ordering::Relaxed),
        }
    }
}

/// Lazy, infinite receive sequence over a [`UdpChannel`].
///
/// Ends (returns `None`) once the channel is closed.
pub struct Datagrams {
    channel: UdpChannel,
    buf: Vec<u8>,
    finished: bool,
}

impl Datagrams {
    /// Wait for the next datagram.
    pub async fn next(&mut self) -> Option<Datagram> {
        while !self.finished {
            match self.channel.recv_from(&mut self.buf).await {
                Ok((len, source)) => {
                    return Some(Datagram {
                        payload: self.buf[..len].to_vec(),
                        source,
                    });
                }
                Err(TransportError::Closed) => self.finished = true,
                Err(TransportError::Io(e)) if is_transient(&e) => {
                    // ICMP unreachable from an earlier send, nothing to do with this receive
                    tracing::debug!("Ignoring transient receive error: {e}");
                }
                Err(e) => {
                    tracing::warn!("Receive sequence ended: {e}");
                    self.finished = true;
                }
            }
        }
        None
    }

    /// Whether the sequence has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn loopback() -> UdpChannel {
        UdpChannel::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_assigns_port() {
        let channel = loopback().await;
        let endpoint = channel.local_endpoint().unwrap();
        assert_ne!(endpoint.port(), 0);
        assert_eq!(endpoint.host(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let server = loopback().await;
        let client = loopback().await;

        let sent = client
            .send_to(b"PING from abc", server.local_addr().unwrap())
            .await
            .unwrap();
        assert_eq!(sent, 13);

        let mut datagrams = server.datagrams().unwrap();
        let datagram = timeout(Duration::from_secs(1), datagrams.next())
            .await
            .expect("Timeout")
            .unwrap();

        assert_eq!(datagram.payload, b"PING from abc");
        assert_eq!(datagram.source, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_empty_datagram_passes_through() {
        let server = loopback().await;
        let client = loopback().await;

        client
            .send_to(&[], server.local_addr().unwrap())
            .await
            .unwrap();

        let mut datagrams = server.datagrams().unwrap();
        let datagram = timeout(Duration::from_secs(1), datagrams.next())
            .await
            .expect("Timeout")
            .unwrap();
        assert!(datagram.payload.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let server = loopback().await;
        let client = loopback().await;

        assert_eq!(client.stats(), TransportStats::default());

        assert!(client
            .send_best_effort(b"Test", server.local_addr().unwrap())
            .await);

        let stats = client.stats();
        assert_eq!(stats.packets_sent, 1);
        assert_eq!(stats.bytes_sent, 4);

        let mut buf = vec![0u8; 1500];
        timeout(Duration::from_secs(1), server.recv_from(&mut buf))
            .await
            .expect("Timeout")
            .unwrap();

        let stats = server.stats();
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.bytes_received, 4);
    }

    #[tokio::test]
    async fn test_receiver_is_single_consumer() {
        let channel = loopback().await;
        let _first = channel.datagrams().unwrap();

        assert!(matches!(
            channel.datagrams(),
            Err(TransportError::ReceiverTaken)
        ));
        assert!(matches!(
            channel.clone().datagrams(),
            Err(TransportError::ReceiverTaken)
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        let channel = loopback().await;
        let mut datagrams = channel.datagrams().unwrap();

        let pending = tokio::spawn(async move { datagrams.next().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close().await.unwrap();

        let result = timeout(Duration::from_secs(1), pending)
            .await
            .expect("receive did not observe close")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_sequence_stays_finished() {
        let channel = loopback().await;
        let mut datagrams = channel.datagrams().unwrap();

        channel.close().await.unwrap();

        assert!(datagrams.next().await.is_none());
        assert!(datagrams.is_finished());
        assert!(datagrams.next().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let channel = loopback().await;
        channel.close().await.unwrap();
        assert!(channel.is_closed());

        let result = channel
            .send_to(b"test", "127.0.0.1:1234".parse().unwrap())
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(!channel
            .send_best_effort(b"test", "127.0.0.1:1234".parse().unwrap())
            .await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let channel = loopback().await;
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(channel.is_closed());
        timeout(Duration::from_millis(100), channel.closed())
            .await
            .expect("closed() should resolve immediately");
    }

    #[tokio::test]
    async fn test_socket_released_after_last_handle_drops() {
        let channel = loopback().await;
        let addr = channel.local_addr().unwrap();
        let datagrams = channel.datagrams().unwrap();

        channel.close().await.unwrap();
        assert!(matches!(
            UdpChannel::bind(addr).await,
            Err(TransportError::BindFailed(_))
        ));

        drop(datagrams);
        drop(channel);
        let rebound = UdpChannel::bind(addr).await.unwrap();
        assert_eq!(rebound.local_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_concurrent_senders() {
        let server = loopback().await;
        let server_addr = server.local_addr().unwrap();
        let client = loopback().await;

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let data = format!("Concurrent {i}");
                    client.send_best_effort(data.as_bytes(), server_addr).await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let mut datagrams = server.datagrams().unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            let datagram = timeout(Duration::from_secs(1), datagrams.next())
                .await
                .expect("Timeout")
                .unwrap();
            seen.push(String::from_utf8(datagram.payload).unwrap());
        }
        seen.sort();

        let expected: Vec<_> = (0..5).map(|i| format!("Concurrent {i}")).collect();
        assert_eq!(seen, expected);
        assert_eq!(client.stats().packets_sent, 5);
    }

    #[tokio::test]
    async fn test_ipv6_bind() {
        let channel = UdpChannel::bind("[::1]:0".parse().unwrap()).await;
        // Hosts without IPv6 loopback are tolerated
        if let Ok(channel) = channel {
            assert!(channel.local_addr().unwrap().is_ipv6());
        }
    }
}
