//! Periodic peer probing.
//!
//! Every cycle takes a fresh directory snapshot and pings each candidate
//! endpoint from the shared channel. The pings double as NAT keep-alives.

use crate::directory::{DiscoveryError, PeerDirectory};
use crate::shutdown::ShutdownSignal;
use crate::types::{EndpointSet, SessionId};
use natpunch_transport::{Transport as _, UdpChannel};
use std::time::Duration;

/// Pause between probe cycles
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Ping payload prefix, followed by the sender's session id
pub const PING_PREFIX: &str = "PING from ";

/// Build the ping payload for a session
#[must_use]
pub fn ping_payload(session_id: &SessionId) -> Vec<u8> {
    format!("{PING_PREFIX}{session_id}").into_bytes()
}

/// Extract the sender of a ping payload, if it is one
#[must_use]
pub fn parse_ping(payload: &[u8]) -> Option<SessionId> {
    let text = std::str::from_utf8(payload).ok()?;
    let id = text.strip_prefix(PING_PREFIX)?;
    if id.is_empty() {
        None
    } else {
        Some(SessionId::new(id))
    }
}

/// Outcome of one probe sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Peers in the snapshot
    pub peers: usize,
    /// Pings handed to the socket
    pub pings_sent: usize,
    /// Pings dropped (unusable endpoint or send failure)
    pub pings_dropped: usize,
}

/// Discovery-and-ping loop
pub struct Prober {
    directory: PeerDirectory,
    channel: UdpChannel,
    session_id: SessionId,
    lobby_id: String,
    interval: Duration,
}

impl Prober {
    /// Create a prober for the local session in `lobby_id`
    #[must_use]
    pub fn new(
        directory: PeerDirectory,
        channel: UdpChannel,
        session_id: SessionId,
        lobby_id: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            channel,
            session_id,
            lobby_id: lobby_id.into(),
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    /// Override the pause between cycles
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one discovery cycle and ping every endpoint found.
    ///
    /// # Errors
    ///
    /// Returns the discovery error if no snapshot could be taken; nothing is
    /// sent in that case.
    pub async fn sweep(&self) -> Result<ProbeReport, DiscoveryError> {
        let snapshot = self.directory.discover(&self.lobby_id).await?;
        Ok(self.ping_all(&snapshot).await)
    }

    async fn ping_all(&self, snapshot: &EndpointSet) -> ProbeReport {
        let payload = ping_payload(&self.session_id);
        let mut report = ProbeReport {
            peers: snapshot.len(),
            ..ProbeReport::default()
        };

        tracing::info!("Sending PING packets to all discovered endpoints...");
        for (peer, endpoint) in snapshot.pairs() {
            let dest = match endpoint.socket_addr() {
                Ok(dest) => dest,
                Err(e) => {
                    tracing::warn!("Skipping endpoint of session {peer}: {e}");
                    report.pings_dropped += 1;
                    continue;
                }
            };

            tracing::debug!("Sending PING to {endpoint}");
            if self.channel.send_best_effort(&payload, dest).await {
                report.pings_sent += 1;
            } else {
                report.pings_dropped += 1;
            }
        }

        report
    }

    /// Probe until shutdown or until the channel closes.
    ///
    /// A failed cycle is logged and retried after the normal interval.
    /// Returns the number of completed cycles.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> u64 {
        let mut cycles = 0u64;

        while !shutdown.is_triggered() && !self.channel.is_closed() {
            let result = tokio::select! {
                biased;
                () = shutdown.recv() => break,
                result = self.sweep() => result,
            };

            match result {
                Ok(report) => tracing::debug!(
                    "Probe cycle {}: {} peers, {} pings sent, {} dropped",
                    cycles + 1,
                    report.peers,
                    report.pings_sent,
                    report.pings_dropped
                ),
                Err(e) => tracing::warn!("Probe cycle failed: {e}"),
            }
            cycles += 1;

            if !shutdown.sleep(self.interval).await {
                break;
            }
        }

        tracing::debug!("Prober stopped after {cycles} cycles");
        cycles
    }
}
