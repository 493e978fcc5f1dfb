//! NAT Punchthrough Module
//!
//! The signaling service, not this client, knows when both sides' NAT
//! mappings have settled. The negotiator therefore keeps its own mapping warm
//! by retransmitting the punch message while polling the service for the
//! verdict.
//!
//! # States
//!
//! - **Requesting**: obtain the punch message (exactly one request)
//! - **Probing**: send, wait, poll; repeated until confirmed
//! - **Confirmed**: fetch the confirmed endpoints and finish
//! - **Abandoned**: cancelled, or an unrecoverable error
//!
//! # Example
//!
//! ```rust,no_run
//! use natpunch_discovery::nat::{NegotiatorConfig, PunchthroughNegotiator};
//! use natpunch_discovery::{SessionId, Shutdown, SignalingService};
//! use natpunch_transport::UdpChannel;
//! use std::sync::Arc;
//!
//! # async fn example(signaling: Arc<dyn SignalingService>) -> Result<(), Box<dyn std::error::Error>> {
//! let channel = UdpChannel::bind("0.0.0.0:0".parse()?).await?;
//! let negotiator = PunchthroughNegotiator::new(
//!     signaling,
//!     channel,
//!     SessionId::from("local-session"),
//!     NegotiatorConfig::default(),
//! );
//!
//! let shutdown = Shutdown::new();
//! let path = negotiator.negotiate(shutdown.signal()).await?;
//! for endpoint in &path.endpoints {
//!     println!(" - {endpoint}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod negotiator;

pub use negotiator::{
    ConfirmedPath, NegotiationProgress, NegotiationState, NegotiatorConfig, PunchError,
    PunchthroughNegotiator,
};
