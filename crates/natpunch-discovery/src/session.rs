//! Punchthrough Session
//!
//! Runs the three units of a session (inbound listener, prober, negotiator)
//! concurrently over one shared [`UdpChannel`] and tears them down together.

use crate::directory::PeerDirectory;
use crate::listener::{InboundEvent, InboundListener};
use crate::nat::{
    ConfirmedPath, NegotiationProgress, NegotiatorConfig, PunchError, PunchthroughNegotiator,
};
use crate::prober::{DEFAULT_PROBE_INTERVAL, Prober};
use crate::services::{LobbyService, SignalingService};
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::types::SessionId;
use natpunch_transport::{Transport as _, TransportError, TransportStats, UdpChannel};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Negotiation was abandoned
    #[error(transparent)]
    Punch(#[from] PunchError),

    /// Channel setup failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A unit task panicked
    #[error("Session unit failed: {0}")]
    Join(String),

    /// Unknown completion policy name
    #[error("Unknown completion policy: {0}")]
    InvalidPolicy(String),
}

/// What happens to the prober and listener once the negotiator confirms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Stop every unit and close the channel
    #[default]
    StopAll,
    /// Keep discovering and listening until external shutdown
    KeepDiscovering,
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopAll => write!(f, "stop-all"),
            Self::KeepDiscovering => write!(f, "keep-discovering"),
        }
    }
}

impl FromStr for CompletionPolicy {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop-all" => Ok(Self::StopAll),
            "keep-discovering" => Ok(Self::KeepDiscovering),
            other => Err(SessionError::InvalidPolicy(other.to_string())),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local session identity
    pub session_id: SessionId,
    /// Lobby whose members are probed
    pub lobby_id: String,
    /// Pause between probe cycles
    pub probe_interval: Duration,
    /// Negotiator timing and retry policy
    pub negotiator: NegotiatorConfig,
    /// Behavior after confirmation
    pub policy: CompletionPolicy,
}

impl SessionConfig {
    /// Configuration with default timing
    #[must_use]
    pub fn new(session_id: SessionId, lobby_id: impl Into<String>) -> Self {
        Self {
            session_id,
            lobby_id: lobby_id.into(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            negotiator: NegotiatorConfig::default(),
            policy: CompletionPolicy::default(),
        }
    }
}

/// Remote services used by a session
#[derive(Clone)]
pub struct SessionServices {
    /// Lobby membership
    pub lobby: Arc<dyn LobbyService>,
    /// Punchthrough authority
    pub signaling: Arc<dyn SignalingService>,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// The confirmed path
    pub path: ConfirmedPath,
    /// Completed probe cycles
    pub probe_cycles: u64,
    /// Non-empty datagrams received
    pub datagrams_received: u64,
    /// Channel statistics at shutdown
    pub stats: TransportStats,
}

/// One punchthrough session over a shared channel
pub struct PunchSession {
    policy: CompletionPolicy,
    channel: UdpChannel,
    negotiator: PunchthroughNegotiator,
    prober: Prober,
    listener: InboundListener,
    events: Option<mpsc::UnboundedReceiver<InboundEvent>>,
}

impl PunchSession {
    /// Assemble a session. Takes the channel's receive sequence.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transport` if the channel's receive sequence
    /// is already in use.
    pub fn new(
        config: SessionConfig,
        services: SessionServices,
        channel: UdpChannel,
    ) -> Result<Self, SessionError> {
        let (listener, events) = InboundListener::new(&channel)?;

        let directory = PeerDirectory::new(services.lobby, services.signaling.clone());
        let prober = Prober::new(
            directory,
            channel.clone(),
            config.session_id.clone(),
            config.lobby_id,
        )
        .with_interval(config.probe_interval);

        let negotiator = PunchthroughNegotiator::new(
            services.signaling,
            channel.clone(),
            config.session_id,
            config.negotiator,
        );

        Ok(Self {
            policy: config.policy,
            channel,
            negotiator,
            prober,
            listener,
            events: Some(events),
        })
    }

    /// Take the inbound event stream (available once)
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<InboundEvent>> {
        self.events.take()
    }

    /// Subscribe to negotiation progress
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<NegotiationProgress> {
        self.negotiator.subscribe()
    }

    /// The shared channel
    #[must_use]
    pub fn channel(&self) -> &UdpChannel {
        &self.channel
    }

    /// Run all units until the session ends.
    ///
    /// The channel is closed before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Punch` if the negotiation is abandoned
    /// (including cancellation through `shutdown`), or `SessionError::Join`
    /// if a unit task panicked.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<SessionReport, SessionError> {
        let Self {
            policy,
            channel,
            negotiator,
            prober,
            listener,
            events: _,
        } = self;

        let units = Shutdown::new();
        let forward = {
            let units = units.clone();
            let mut external = shutdown.clone();
            tokio::spawn(async move {
                external.recv().await;
                units.trigger();
            })
        };

        let listener_task = tokio::spawn(listener.run());
        let prober_task = tokio::spawn(prober.run(units.signal()));

        let outcome = negotiator.negotiate(shutdown.clone()).await;

        if outcome.is_ok() && policy == CompletionPolicy::KeepDiscovering {
            tracing::info!("Direct path confirmed; discovery continues until shutdown");
            units.signal().recv().await;
        }

        units.trigger();
        forward.abort();
        if let Err(e) = channel.close().await {
            tracing::warn!("Error closing channel: {e}");
        }

        let probe_cycles = prober_task
            .await
            .map_err(|e| SessionError::Join(e.to_string()))?;
        let datagrams_received = listener_task
            .await
            .map_err(|e| SessionError::Join(e.to_string()))?;

        let path = outcome?;
        Ok(SessionReport {
            path,
            probe_cycles,
            datagrams_received,
            stats: channel.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!(
            "stop-all".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::StopAll
        );
        assert_eq!(
            "keep-discovering".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::KeepDiscovering
        );
        assert!(matches!(
            "forever".parse::<CompletionPolicy>(),
            Err(SessionError::InvalidPolicy(_))
        ));

        for policy in [CompletionPolicy::StopAll, CompletionPolicy::KeepDiscovering] {
            assert_eq!(policy.to_string().parse::<CompletionPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new(SessionId::from("me"), "lobby-1");
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert_eq!(config.negotiator, NegotiatorConfig::default());
        assert_eq!(config.policy, CompletionPolicy::StopAll);
        assert_eq!(config.lobby_id, "lobby-1");
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::from(PunchError::Cancelled);
        assert_eq!(err.to_string(), "Negotiation cancelled");

        let err = SessionError::InvalidPolicy("x".to_string());
        assert_eq!(err.to_string(), "Unknown completion policy: x");
    }
}
