//! Inbound datagram tap.

use crate::prober::parse_ping;
use crate::types::SessionId;
use natpunch_transport::{Datagram, Datagrams, TransportResult, UdpChannel};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// One received, non-empty datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Payload rendered as text (lossy UTF-8)
    pub message: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Sender address
    pub source: SocketAddr,
}

impl InboundEvent {
    /// Session id of the sender, if this is a ping
    #[must_use]
    pub fn ping_sender(&self) -> Option<SessionId> {
        parse_ping(&self.payload)
    }
}

impl From<Datagram> for InboundEvent {
    fn from(datagram: Datagram) -> Self {
        Self {
            message: String::from_utf8_lossy(&datagram.payload).into_owned(),
            payload: datagram.payload,
            source: datagram.source,
        }
    }
}

/// Drains the channel's receive sequence and republishes each datagram.
///
/// Passive: no filtering beyond dropping empty payloads, no correlation.
pub struct InboundListener {
    datagrams: Datagrams,
    events: mpsc::UnboundedSender<InboundEvent>,
}

impl InboundListener {
    /// Take the channel's receive sequence.
    ///
    /// Returns the listener and the receiving end of its event stream.
    ///
    /// # Errors
    ///
    /// Fails if the channel's receive sequence was already taken.
    pub fn new(
        channel: &UdpChannel,
    ) -> TransportResult<(Self, mpsc::UnboundedReceiver<InboundEvent>)> {
        let datagrams = channel.datagrams()?;
        let (events, rx) = mpsc::unbounded_channel();
        Ok((Self { datagrams, events }, rx))
    }

    /// Run until the channel closes. Returns the number of events surfaced.
    pub async fn run(mut self) -> u64 {
        let mut surfaced = 0u64;
        let mut subscribed = true;

        while let Some(datagram) = self.datagrams.next().await {
            if datagram.payload.is_empty() {
                continue;
            }

            let event = InboundEvent::from(datagram);
            tracing::info!("Received remote packet from {}: {}", event.source, event.message);
            surfaced += 1;

            if subscribed && self.events.send(event).is_err() {
                tracing::debug!("Inbound event subscriber gone, logging only");
                subscribed = false;
            }
        }

        tracing::debug!("Inbound listener stopped after {surfaced} datagrams");
        surfaced
    }
}
