//! Remote collaborators, consumed as opaque round trips.
//!
//! The session, lobby and signaling services live on the far side of the
//! network. Every call may fail; retry policy is decided by the calling unit,
//! never inside an implementation of these traits.

use crate::types::{AuthenticatedSession, Credentials, Group, PeerSession, PunchMessage, SessionId};
use async_trait::async_trait;
use natpunch_transport::Endpoint;
use thiserror::Error;

/// Failure of a single remote call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Service could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Service answered with an error status
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        /// Status code returned by the service
        status: u16,
        /// Error text returned by the service
        message: String,
    },

    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Round trip exceeded its deadline
    #[error("Request timed out")]
    Timeout,
}

/// Result type for remote calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Issues authenticated sessions
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Authenticate; `Ok(None)` means the service refused to issue a session.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> ServiceResult<Option<AuthenticatedSession>>;
}

/// Lobby membership
#[async_trait]
pub trait LobbyService: Send + Sync {
    /// List existing lobbies
    async fn list_groups(&self) -> ServiceResult<Vec<Group>>;

    /// Create a lobby
    async fn create_group(&self, name: &str, max_members: u32) -> ServiceResult<Group>;

    /// Add a session to a lobby
    async fn join_group(&self, group_id: &str, session_id: &SessionId) -> ServiceResult<()>;

    /// Sessions currently in a lobby
    async fn list_members(&self, group_id: &str) -> ServiceResult<Vec<PeerSession>>;
}

/// The punchthrough authority
#[async_trait]
pub trait SignalingService: Send + Sync {
    /// Obtain the hole-punch message for a session
    async fn request_punch_message(&self, session_id: &SessionId) -> ServiceResult<PunchMessage>;

    /// Whether punchthrough has completed for a session
    async fn poll_completion(&self, session_id: &SessionId) -> ServiceResult<bool>;

    /// Endpoints a session is reachable at
    async fn list_endpoints(&self, session_id: &SessionId) -> ServiceResult<Vec<Endpoint>>;
}
