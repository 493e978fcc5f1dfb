//! Rendezvous fixture for integration testing
//!
//! Stands in for the three remote services with in-memory implementations
//! and binds loopback sockets for the local session, its peers and the
//! punchthrough relay.
//!
//! # Example
//!
//! ```ignore
//! use natpunch_integration_tests::fixtures::{PollScript, RendezvousFixture};
//!
//! #[tokio::test]
//! async fn test_confirms() {
//!     let fixture = RendezvousFixture::new(2, PollScript::confirm_on(3)).await;
//!     let session = fixture.session(CompletionPolicy::StopAll);
//!     // ... run the session ...
//! }
//! ```

use async_trait::async_trait;
use natpunch_discovery::{
    AuthenticatedSession, CompletionPolicy, Credentials, Group, LobbyService, NegotiatorConfig,
    PeerSession, PunchMessage, PunchSession, ServiceError, ServiceResult, SessionConfig,
    SessionId, SessionService, SessionServices, SignalingService,
};
use natpunch_transport::{Endpoint, UdpChannel};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Short timing used by every fixture session
pub const FAST: Duration = Duration::from_millis(5);

/// Session service that accepts one account
pub struct MockSessions {
    email: String,
    password_hash: String,
    issued: AuthenticatedSession,
}

impl MockSessions {
    /// Accept `email` / `password_hash`, issuing `session_id`
    pub fn new(email: &str, password_hash: &str, session_id: &str) -> Self {
        Self {
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            issued: AuthenticatedSession {
                id: SessionId::from(session_id),
                api_key: format!("key-{session_id}"),
            },
        }
    }
}

#[async_trait]
impl SessionService for MockSessions {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> ServiceResult<Option<AuthenticatedSession>> {
        if credentials.email_address == self.email
            && credentials.password_hash == self.password_hash
        {
            Ok(Some(self.issued.clone()))
        } else {
            Ok(None)
        }
    }
}

/// Lobby service backed by a map of lobby id to members
#[derive(Default)]
pub struct MockLobby {
    groups: Mutex<Vec<Group>>,
    members: Mutex<HashMap<String, Vec<PeerSession>>>,
    fail_listing: bool,
    listings: AtomicU32,
}

impl MockLobby {
    /// A lobby service with no lobbies
    pub fn new() -> Self {
        Self::default()
    }

    /// A lobby service whose member listing always fails
    pub fn unavailable() -> Self {
        Self {
            fail_listing: true,
            ..Self::default()
        }
    }

    /// Add a lobby with the given members
    pub fn with_group(self, id: &str, members: &[&str]) -> Self {
        self.lock_groups().push(Group {
            id: id.to_string(),
            name: format!("Lobby {id}"),
            max_members: 0,
        });
        self.lock_members().insert(
            id.to_string(),
            members.iter().map(|m| PeerSession::new(*m)).collect(),
        );
        self
    }

    /// Current members of a lobby
    pub fn members_of(&self, id: &str) -> Vec<PeerSession> {
        self.lock_members().get(id).cloned().unwrap_or_default()
    }

    /// All lobbies, in creation order
    pub fn groups(&self) -> Vec<Group> {
        self.lock_groups().clone()
    }

    /// Number of member listings served
    pub fn listings(&self) -> u32 {
        self.listings.load(Ordering::SeqCst)
    }

    fn lock_groups(&self) -> std::sync::MutexGuard<'_, Vec<Group>> {
        self.groups.lock().unwrap()
    }

    fn lock_members(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<PeerSession>>> {
        self.members.lock().unwrap()
    }
}

#[async_trait]
impl LobbyService for MockLobby {
    async fn list_groups(&self) -> ServiceResult<Vec<Group>> {
        Ok(self.groups())
    }

    async fn create_group(&self, name: &str, max_members: u32) -> ServiceResult<Group> {
        let mut groups = self.lock_groups();
        let group = Group {
            id: format!("lobby-{}", groups.len() + 1),
            name: name.to_string(),
            max_members,
        };
        groups.push(group.clone());
        self.lock_members().insert(group.id.clone(), Vec::new());
        Ok(group)
    }

    async fn join_group(&self, group_id: &str, session_id: &SessionId) -> ServiceResult<()> {
        let mut members = self.lock_members();
        let list = members
            .get_mut(group_id)
            .ok_or_else(|| ServiceError::Rejected {
                status: 404,
                message: format!("no lobby {group_id}"),
            })?;
        if !list.iter().any(|m| &m.session_id == session_id) {
            list.push(PeerSession::new(session_id.clone()));
        }
        Ok(())
    }

    async fn list_members(&self, group_id: &str) -> ServiceResult<Vec<PeerSession>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(ServiceError::Unavailable("lobby service down".to_string()));
        }
        Ok(self.members_of(group_id))
    }
}

/// Scripted answers for completion polls
#[derive(Debug, Clone, Default)]
pub struct PollScript {
    answers: VecDeque<ServiceResult<bool>>,
    then: bool,
}

impl PollScript {
    /// Answer `false` K-1 times, then `true`
    pub fn confirm_on(k: u32) -> Self {
        let mut answers: VecDeque<_> = (1..k).map(|_| Ok(false)).collect();
        answers.push_back(Ok(true));
        Self {
            answers,
            then: true,
        }
    }

    /// Always answer `false`
    pub fn never() -> Self {
        Self::default()
    }

    /// Use explicit answers, then `then` forever
    pub fn scripted(answers: Vec<ServiceResult<bool>>, then: bool) -> Self {
        Self {
            answers: answers.into(),
            then,
        }
    }

    fn next(&mut self) -> ServiceResult<bool> {
        self.answers.pop_front().unwrap_or(Ok(self.then))
    }
}

/// Signaling service with a fixed punch message and endpoint table
pub struct MockSignaling {
    target: Endpoint,
    payload: Vec<u8>,
    polls: Mutex<PollScript>,
    endpoints: Mutex<HashMap<SessionId, ServiceResult<Vec<Endpoint>>>>,
    poll_count: AtomicU32,
    request_count: AtomicU32,
}

impl MockSignaling {
    /// Punch messages point at `target` and carry `payload`
    pub fn new(target: Endpoint, payload: Vec<u8>, polls: PollScript) -> Self {
        Self {
            target,
            payload,
            polls: Mutex::new(polls),
            endpoints: Mutex::new(HashMap::new()),
            poll_count: AtomicU32::new(0),
            request_count: AtomicU32::new(0),
        }
    }

    /// Set the endpoint lookup result for a session
    pub fn set_endpoints(&self, session: &str, result: ServiceResult<Vec<Endpoint>>) {
        self.endpoints
            .lock()
            .unwrap()
            .insert(SessionId::from(session), result);
    }

    /// Completion polls served
    pub fn polls(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }

    /// Punch message requests served
    pub fn requests(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingService for MockSignaling {
    async fn request_punch_message(&self, _session_id: &SessionId) -> ServiceResult<PunchMessage> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        Ok(PunchMessage {
            target_host: self.target.host().to_string(),
            target_port: self.target.port(),
            payload: self.payload.clone(),
        })
    }

    async fn poll_completion(&self, _session_id: &SessionId) -> ServiceResult<bool> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.polls.lock().unwrap().next()
    }

    async fn list_endpoints(&self, session_id: &SessionId) -> ServiceResult<Vec<Endpoint>> {
        self.endpoints
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A local session, its lobby peers and the punchthrough relay, all on loopback
pub struct RendezvousFixture {
    /// The local session's channel
    pub channel: UdpChannel,
    /// One channel per remote peer (`peer-1`, `peer-2`, ...)
    pub peers: Vec<UdpChannel>,
    /// Where punch messages are sent
    pub relay: UdpChannel,
    /// Lobby `lobby-1` holding `local` and every peer
    pub lobby: Arc<MockLobby>,
    /// Signaling service
    pub signaling: Arc<MockSignaling>,
}

impl RendezvousFixture {
    /// Local session id used by the fixture
    pub const LOCAL: &'static str = "local";
    /// Lobby id used by the fixture
    pub const LOBBY: &'static str = "lobby-1";
    /// Punch payload used by the fixture
    pub const PUNCH_PAYLOAD: &'static [u8] = b"\x01punch\xff";

    /// Bind `peer_count` peers and wire up the mock services
    pub async fn new(peer_count: usize, polls: PollScript) -> Self {
        Self::with_payload(peer_count, polls, Self::PUNCH_PAYLOAD.to_vec()).await
    }

    /// Like [`RendezvousFixture::new`] with a custom punch payload
    pub async fn with_payload(peer_count: usize, polls: PollScript, payload: Vec<u8>) -> Self {
        let channel = loopback().await;
        let relay = loopback().await;
        let mut peers = Vec::with_capacity(peer_count);
        for _ in 0..peer_count {
            peers.push(loopback().await);
        }

        let signaling = MockSignaling::new(relay.local_endpoint().unwrap(), payload, polls);
        signaling.set_endpoints(Self::LOCAL, Ok(vec![channel.local_endpoint().unwrap()]));

        let mut names = vec![Self::LOCAL.to_string()];
        for (i, peer) in peers.iter().enumerate() {
            let name = Self::peer_name(i);
            signaling.set_endpoints(&name, Ok(vec![peer.local_endpoint().unwrap()]));
            names.push(name);
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let lobby = MockLobby::new().with_group(Self::LOBBY, &refs);

        Self {
            channel,
            peers,
            relay,
            lobby: Arc::new(lobby),
            signaling: Arc::new(signaling),
        }
    }

    /// Session id of the `index`-th peer
    pub fn peer_name(index: usize) -> String {
        format!("peer-{}", index + 1)
    }

    /// Services handle for a session
    pub fn services(&self) -> SessionServices {
        SessionServices {
            lobby: self.lobby.clone(),
            signaling: self.signaling.clone(),
        }
    }

    /// Session configuration with fast timing
    pub fn config(&self, policy: CompletionPolicy) -> SessionConfig {
        SessionConfig {
            session_id: SessionId::from(Self::LOCAL),
            lobby_id: Self::LOBBY.to_string(),
            probe_interval: FAST,
            negotiator: NegotiatorConfig {
                retransmit_interval: FAST,
                max_consecutive_poll_errors: 3,
            },
            policy,
        }
    }

    /// A session over the fixture's local channel
    pub fn session(&self, policy: CompletionPolicy) -> PunchSession {
        PunchSession::new(self.config(policy), self.services(), self.channel.clone()).unwrap()
    }
}

/// Bind a loopback channel on an OS-assigned port
pub async fn loopback() -> UdpChannel {
    UdpChannel::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap()
}
