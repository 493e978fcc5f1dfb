//! # natpunch Discovery
//!
//! Peer discovery and NAT punchthrough for a single UDP socket.
//!
//! This crate provides:
//! - Bootstrap against the session and lobby services
//! - A peer directory that maps lobby members to candidate endpoints
//! - A periodic prober that pings every candidate (and keeps mappings warm)
//! - A passive inbound listener
//! - The punchthrough negotiator, driven by an external signaling service
//! - [`PunchSession`], which runs all of the above concurrently
//!
//! ## Example
//!
//! ```rust,no_run
//! use natpunch_discovery::{
//!     PunchSession, SessionConfig, SessionId, SessionServices, Shutdown,
//! };
//! use natpunch_transport::UdpChannel;
//!
//! # async fn example(services: SessionServices) -> Result<(), Box<dyn std::error::Error>> {
//! let channel = UdpChannel::bind("0.0.0.0:0".parse()?).await?;
//! let config = SessionConfig::new(SessionId::from("local-session"), "lobby-id");
//! let session = PunchSession::new(config, services, channel)?;
//!
//! let shutdown = Shutdown::new();
//! let report = session.run(shutdown.signal()).await?;
//! println!("Confirmed after {} attempts", report.path.attempts);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod directory;
pub mod listener;
pub mod nat;
pub mod prober;
pub mod services;
pub mod session;
pub mod shutdown;
pub mod types;

pub use bootstrap::{BootstrapError, LobbySpec, authenticate, join_or_create_lobby};
pub use directory::{DiscoveryError, PeerDirectory};
pub use listener::{InboundEvent, InboundListener};
pub use nat::{
    ConfirmedPath, NegotiationProgress, NegotiationState, NegotiatorConfig, PunchError,
    PunchthroughNegotiator,
};
pub use prober::{ProbeReport, Prober};
pub use services::{LobbyService, ServiceError, ServiceResult, SessionService, SignalingService};
pub use session::{
    CompletionPolicy, PunchSession, SessionConfig, SessionError, SessionReport, SessionServices,
};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use types::{
    AuthenticatedSession, Credentials, EndpointSet, Group, PeerSession, PunchMessage, SessionId,
};
