//! Data model shared by the discovery and negotiation units.

use natpunch_transport::Endpoint;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque session identifier issued by the session service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an identifier string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Another participant known to the rendezvous service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    /// The peer's session identifier
    pub session_id: SessionId,
}

impl PeerSession {
    /// Create a peer session record
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }
}

/// Identity presented to the session service
#[derive(Clone)]
pub struct Credentials {
    /// Account email address
    pub email_address: String,
    /// Hex password hash, never the password itself
    pub password_hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email_address", &self.email_address)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// A session issued by the session service
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// Local session identifier, fixed for the process lifetime
    pub id: SessionId,
    /// API key for the lobby and signaling services
    pub api_key: String,
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("id", &self.id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// A lobby (group) on the lobby service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Lobby identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Member cap, 0 for unlimited
    pub max_members: u32,
}

/// Hole-punch message issued by the signaling service.
///
/// The payload is retransmitted verbatim on every attempt; the service
/// correlates retries by content and source, not by sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchMessage {
    /// Host to send the payload to
    pub target_host: String,
    /// Port to send the payload to
    pub target_port: u16,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl PunchMessage {
    /// Target as an endpoint
    #[must_use]
    pub fn target(&self) -> Endpoint {
        Endpoint::new(self.target_host.clone(), self.target_port)
    }
}

/// Snapshot of every peer's candidate endpoints.
///
/// Built from scratch on every discovery cycle. A peer whose endpoints could
/// not be resolved is present with an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    peers: BTreeMap<SessionId, Vec<Endpoint>>,
}

impl EndpointSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the endpoints of one peer, replacing any earlier entry
    pub fn insert(&mut self, session_id: SessionId, endpoints: Vec<Endpoint>) {
        self.peers.insert(session_id, endpoints);
    }

    /// Endpoints recorded for a peer
    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<&[Endpoint]> {
        self.peers.get(session_id).map(Vec::as_slice)
    }

    /// Number of peers in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the snapshot has no peers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Total number of endpoints over all peers
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.peers.values().map(Vec::len).sum()
    }

    /// Iterate peers with their endpoint lists
    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &[Endpoint])> {
        self.peers.iter().map(|(id, eps)| (id, eps.as_slice()))
    }

    /// Iterate every (peer, endpoint) pair
    pub fn pairs(&self) -> impl Iterator<Item = (&SessionId, &Endpoint)> {
        self.peers
            .iter()
            .flat_map(|(id, eps)| eps.iter().map(move |ep| (id, ep)))
    }
}

impl FromIterator<(SessionId, Vec<Endpoint>)> for EndpointSet {
    fn from_iter<I: IntoIterator<Item = (SessionId, Vec<Endpoint>)>>(iter: I) -> Self {
        Self {
            peers: iter.into_iter().collect(),
        }
    }
}
