//! Session and lobby bootstrap.
//!
//! Runs once before any unit starts: authenticate, then join the first
//! existing lobby or create one if the service has none.

use crate::services::{LobbyService, ServiceError, SessionService};
use crate::types::{AuthenticatedSession, Credentials, Group, SessionId};
use thiserror::Error;

/// Name given to a lobby created during bootstrap
pub const DEFAULT_LOBBY_NAME: &str = "NAT Punchthrough Demo Lobby";

/// Bootstrap errors
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The session service declined to issue a session
    #[error("Unable to authenticate")]
    AuthenticationFailed,

    /// The session service could not be reached
    #[error("Session service error: {0}")]
    Session(#[source] ServiceError),

    /// A lobby call failed
    #[error("Lobby service error: {0}")]
    Lobby(#[source] ServiceError),
}

/// Lobby created when none exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbySpec {
    /// Lobby name
    pub name: String,
    /// Member limit; 0 means unlimited
    pub max_members: u32,
}

impl Default for LobbySpec {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOBBY_NAME.to_string(),
            max_members: 0,
        }
    }
}

/// Obtain an authenticated session.
///
/// # Errors
///
/// Returns `BootstrapError::AuthenticationFailed` if the service refuses,
/// or `BootstrapError::Session` if the call itself fails.
pub async fn authenticate(
    sessions: &dyn SessionService,
    credentials: &Credentials,
) -> Result<AuthenticatedSession, BootstrapError> {
    tracing::info!("Authenticating as {}...", credentials.email_address);
    let session = sessions
        .authenticate(credentials)
        .await
        .map_err(BootstrapError::Session)?
        .ok_or(BootstrapError::AuthenticationFailed)?;

    tracing::info!("Authenticated with session ID {}", session.id);
    Ok(session)
}

/// Join the first listed lobby, creating one from `wanted` if none exist.
///
/// # Errors
///
/// Returns `BootstrapError::Lobby` if listing, creating or joining fails.
pub async fn join_or_create_lobby(
    lobbies: &dyn LobbyService,
    session_id: &SessionId,
    wanted: &LobbySpec,
) -> Result<Group, BootstrapError> {
    tracing::info!("Searching for lobbies...");
    let existing = lobbies.list_groups().await.map_err(BootstrapError::Lobby)?;

    let group = match existing.into_iter().next() {
        Some(group) => {
            tracing::info!("Using existing lobby {} ({})", group.id, group.name);
            group
        }
        None => {
            tracing::info!("No lobbies found, creating \"{}\"...", wanted.name);
            lobbies
                .create_group(&wanted.name, wanted.max_members)
                .await
                .map_err(BootstrapError::Lobby)?
        }
    };

    tracing::info!("Joining lobby {}...", group.id);
    lobbies
        .join_group(&group.id, session_id)
        .await
        .map_err(BootstrapError::Lobby)?;

    Ok(group)
}
