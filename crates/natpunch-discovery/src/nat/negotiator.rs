//! Punchthrough negotiation state machine.

use crate::services::{ServiceError, SignalingService};
use crate::shutdown::ShutdownSignal;
use crate::types::{PunchMessage, SessionId};
use natpunch_transport::{Endpoint, Transport as _, TransportError, UdpChannel};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Pause between sending the punch message and polling for completion
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive poll failures tolerated; the next one abandons
pub const DEFAULT_MAX_CONSECUTIVE_POLL_ERRORS: u32 = 5;

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Asking the signaling service for a punch message
    Requesting,
    /// Retransmitting the punch message and polling
    Probing,
    /// Punchthrough confirmed by the signaling service
    Confirmed,
    /// Cancelled or failed
    Abandoned,
}

impl NegotiationState {
    /// Whether no further transitions can happen
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Abandoned)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requesting => write!(f, "Requesting"),
            Self::Probing => write!(f, "Probing"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// Observable negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationProgress {
    /// Current state
    pub state: NegotiationState,
    /// Punch messages sent so far
    pub attempts: u32,
}

/// Negotiator timing and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatorConfig {
    /// Wait between a send and the following poll
    pub retransmit_interval: Duration,
    /// Consecutive poll failures tolerated; one more abandons. 0 retries forever
    pub max_consecutive_poll_errors: u32,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            max_consecutive_poll_errors: DEFAULT_MAX_CONSECUTIVE_POLL_ERRORS,
        }
    }
}

/// Result of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPath {
    /// Local session the path was confirmed for
    pub session_id: SessionId,
    /// Endpoints the local session is reachable at
    pub endpoints: Vec<Endpoint>,
    /// Punch messages sent before confirmation
    pub attempts: u32,
    /// Where the punch messages were sent
    pub target: SocketAddr,
}

/// Punchthrough negotiation error
#[derive(Debug, Error)]
pub enum PunchError {
    /// The initial punch message request failed
    #[error("Failed to obtain punch message: {0}")]
    RequestFailed(#[source] ServiceError),

    /// The punch target could not be turned into a socket address
    #[error("Punch target {target} is unresolvable: {source}")]
    Unresolvable {
        /// Target named by the punch message
        target: Endpoint,
        /// Resolution failure
        #[source]
        source: TransportError,
    },

    /// Completion polling kept failing
    #[error("Completion poll failed {failures} times in a row: {last}")]
    PollFailed {
        /// Consecutive failures
        failures: u32,
        /// Most recent failure
        #[source]
        last: ServiceError,
    },

    /// The shutdown signal fired
    #[error("Negotiation cancelled")]
    Cancelled,

    /// The shared channel was closed underneath the negotiation
    #[error("UDP channel closed during negotiation")]
    ChannelClosed,
}

/// Drives one punchthrough negotiation over the shared channel
pub struct PunchthroughNegotiator {
    signaling: Arc<dyn SignalingService>,
    channel: UdpChannel,
    session_id: SessionId,
    config: NegotiatorConfig,
    progress: watch::Sender<NegotiationProgress>,
}

impl PunchthroughNegotiator {
    /// Create a negotiator for the local session
    #[must_use]
    pub fn new(
        signaling: Arc<dyn SignalingService>,
        channel: UdpChannel,
        session_id: SessionId,
        config: NegotiatorConfig,
    ) -> Self {
        let (progress, _) = watch::channel(NegotiationProgress {
            state: NegotiationState::Requesting,
            attempts: 0,
        });
        Self {
            signaling,
            channel,
            session_id,
            config,
            progress,
        }
    }

    /// Current progress
    #[must_use]
    pub fn progress(&self) -> NegotiationProgress {
        *self.progress.borrow()
    }

    /// Subscribe to progress updates
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NegotiationProgress> {
        self.progress.subscribe()
    }

    /// Run the negotiation to a terminal state.
    ///
    /// There is no attempt limit; bound it with the shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns `PunchError` when the negotiation is abandoned:
    /// - the punch message request fails
    /// - the punch target cannot be resolved
    /// - completion polling fails more than the configured cap in a row
    /// - the shutdown signal fires or the channel closes
    pub async fn negotiate(
        &self,
        mut shutdown: ShutdownSignal,
    ) -> Result<ConfirmedPath, PunchError> {
        self.publish(NegotiationState::Requesting, 0);

        tracing::info!("Getting NAT punchthrough message...");
        let requested = tokio::select! {
            biased;
            () = shutdown.recv() => return self.abandon(PunchError::Cancelled),
            requested = self.signaling.request_punch_message(&self.session_id) => requested,
        };
        let message = match requested {
            Ok(message) => message,
            Err(e) => return self.abandon(PunchError::RequestFailed(e)),
        };

        let target_endpoint = message.target();
        let resolved = tokio::select! {
            biased;
            () = shutdown.recv() => return self.abandon(PunchError::Cancelled),
            resolved = target_endpoint.resolve() => resolved,
        };
        let target = match resolved {
            Ok(target) => target,
            Err(source) => {
                return self.abandon(PunchError::Unresolvable {
                    target: target_endpoint,
                    source,
                });
            }
        };

        tracing::info!("Will send NAT punchthrough message to {target_endpoint}...");
        self.publish(NegotiationState::Probing, 0);

        let attempts = match self.probe(&message, target, &mut shutdown).await {
            Ok(attempts) => attempts,
            Err(e) => return self.abandon(e),
        };

        tracing::info!("NAT punchthrough completed successfully after {attempts} attempts!");

        let fetched = tokio::select! {
            biased;
            () = shutdown.recv() => None,
            fetched = self.signaling.list_endpoints(&self.session_id) => Some(fetched),
        };
        let endpoints = match fetched {
            Some(Ok(endpoints)) => endpoints,
            Some(Err(e)) => {
                tracing::warn!("Punchthrough confirmed but endpoints are unavailable: {e}");
                Vec::new()
            }
            None => {
                tracing::warn!("Punchthrough confirmed; endpoint lookup cut short by shutdown");
                Vec::new()
            }
        };
        self.publish(NegotiationState::Confirmed, attempts);
        tracing::info!("Available at the following endpoints:");
        for endpoint in &endpoints {
            tracing::info!(" - {endpoint}");
        }

        Ok(ConfirmedPath {
            session_id: self.session_id.clone(),
            endpoints,
            attempts,
            target,
        })
    }

    /// Send/wait/poll until the service confirms. Returns the attempt count.
    async fn probe(
        &self,
        message: &PunchMessage,
        target: SocketAddr,
        shutdown: &mut ShutdownSignal,
    ) -> Result<u32, PunchError> {
        let mut attempts = 0u32;
        let mut poll_failures = 0u32;

        loop {
            if shutdown.is_triggered() {
                return Err(PunchError::Cancelled);
            }
            if self.channel.is_closed() {
                return Err(PunchError::ChannelClosed);
            }

            attempts += 1;
            tracing::debug!("Sending punch datagram (attempt {attempts})");
            self.channel.send_best_effort(&message.payload, target).await;
            self.publish(NegotiationState::Probing, attempts);

            if !shutdown.sleep(self.config.retransmit_interval).await {
                return Err(PunchError::Cancelled);
            }

            tracing::debug!("Checking if NAT punchthrough is complete...");
            let polled = tokio::select! {
                biased;
                () = shutdown.recv() => return Err(PunchError::Cancelled),
                polled = self.signaling.poll_completion(&self.session_id) => polled,
            };

            match polled {
                Ok(true) => return Ok(attempts),
                Ok(false) => poll_failures = 0,
                Err(e) => {
                    poll_failures += 1;
                    tracing::warn!("Completion poll failed ({poll_failures} in a row): {e}");
                    let cap = self.config.max_consecutive_poll_errors;
                    if cap != 0 && poll_failures > cap {
                        return Err(PunchError::PollFailed {
                            failures: poll_failures,
                            last: e,
                        });
                    }
                }
            }
        }
    }

    fn publish(&self, state: NegotiationState, attempts: u32) {
        self.progress
            .send_replace(NegotiationProgress { state, attempts });
    }

    fn abandon(&self, err: PunchError) -> Result<ConfirmedPath, PunchError> {
        let attempts = self.progress().attempts;
        self.publish(NegotiationState::Abandoned, attempts);
        tracing::warn!("NAT punchthrough abandoned: {err}");
        Err(err)
    }
}
