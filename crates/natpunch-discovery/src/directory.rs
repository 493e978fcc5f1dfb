//! Peer directory
//!
//! Turns "who is in the lobby" into "where can they be reached". Each call is
//! a fresh snapshot; nothing is cached between cycles.

use crate::services::{LobbyService, ServiceError, SignalingService};
use crate::types::EndpointSet;
use std::sync::Arc;
use thiserror::Error;

/// Discovery cycle errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Member listing failed, so there is no snapshot at all
    #[error("Failed to list members of lobby {lobby}: {source}")]
    MembersUnavailable {
        /// Lobby that was queried
        lobby: String,
        /// Underlying service failure
        #[source]
        source: ServiceError,
    },
}

/// Resolves lobby members to candidate endpoints
#[derive(Clone)]
pub struct PeerDirectory {
    lobby: Arc<dyn LobbyService>,
    signaling: Arc<dyn SignalingService>,
}

impl PeerDirectory {
    /// Create a directory over the lobby and signaling services
    #[must_use]
    pub fn new(lobby: Arc<dyn LobbyService>, signaling: Arc<dyn SignalingService>) -> Self {
        Self { lobby, signaling }
    }

    /// Take one snapshot of the lobby.
    ///
    /// A peer whose endpoints cannot be resolved is kept in the snapshot with
    /// an empty endpoint list; only a failed member listing fails the cycle.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError::MembersUnavailable` if the member list cannot
    /// be fetched.
    pub async fn discover(&self, lobby_id: &str) -> Result<EndpointSet, DiscoveryError> {
        tracing::info!("Discovering other clients in lobby {lobby_id}...");
        let members = self.lobby.list_members(lobby_id).await.map_err(|source| {
            DiscoveryError::MembersUnavailable {
                lobby: lobby_id.to_string(),
                source,
            }
        })?;

        tracing::debug!("Discovering endpoints for {} sessions...", members.len());
        let mut snapshot = EndpointSet::new();
        for member in members {
            let endpoints = match self.signaling.list_endpoints(&member.session_id).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::warn!(
                        "Could not resolve endpoints of session {}: {e}",
                        member.session_id
                    );
                    Vec::new()
                }
            };

            tracing::info!(
                "Connected session {} has {} endpoints.",
                member.session_id,
                endpoints.len()
            );
            snapshot.insert(member.session_id, endpoints);
        }

        Ok(snapshot)
    }
}
