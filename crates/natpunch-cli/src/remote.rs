//! HTTP clients for the session, lobby and punchthrough services.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use natpunch_discovery::{
    AuthenticatedSession, Credentials, Group, LobbyService, PeerSession, PunchMessage,
    ServiceError, ServiceResult, SessionId, SessionService, SignalingService,
};
use natpunch_transport::Endpoint;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Prefix mixed into every password before hashing
const PASSWORD_SALT: &str = "HiveMPv1";

/// Header carrying the API key on every request
const API_KEY_HEADER: &str = "X-API-Key";

/// Hash a password the way the session service expects (lowercase hex SHA-256)
#[must_use]
pub fn password_hash(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PASSWORD_SALT.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

// Wire types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthenticateResponse {
    #[serde(default)]
    authenticated_session: Option<WireSession>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSession {
    id: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLobby {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    max_sessions: u32,
}

impl From<WireLobby> for Group {
    fn from(lobby: WireLobby) -> Self {
        Self {
            id: lobby.id,
            name: lobby.name,
            max_members: lobby.max_sessions,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMember {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WireEndpoint {
    host: String,
    port: u16,
}

impl From<WireEndpoint> for Endpoint {
    fn from(endpoint: WireEndpoint) -> Self {
        Endpoint::new(endpoint.host, endpoint.port)
    }
}

#[derive(Debug, Deserialize)]
struct WirePunchMessage {
    host: String,
    port: u16,
    message: String,
}

impl TryFrom<WirePunchMessage> for PunchMessage {
    type Error = ServiceError;

    fn try_from(wire: WirePunchMessage) -> Result<Self, Self::Error> {
        let payload = BASE64
            .decode(wire.message.as_bytes())
            .map_err(|e| ServiceError::Malformed(format!("punch message is not base64: {e}")))?;
        Ok(Self {
            target_host: wire.host,
            target_port: wire.port,
            payload,
        })
    }
}

/// One service base URL plus the key used to call it
#[derive(Debug, Clone)]
struct ApiClient {
    http: Client,
    base: Url,
    api_key: String,
}

impl ApiClient {
    fn new(base: Url, api_key: String, timeout: Duration) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base,
            api_key,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base.clone();
        let joined = format!("{}/{path}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ServiceResult<T> {
        let bytes = self.send(method, path, query, body).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::Malformed(format!("{path}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ServiceResult<Vec<u8>> {
        let url = self.url(path, query);
        tracing::debug!("{method} {url}");

        let mut request = self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }

        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout
    } else if e.is_decode() {
        ServiceError::Malformed(e.to_string())
    } else {
        ServiceError::Unavailable(e.to_string())
    }
}

/// Session service over HTTP; authenticates with the project API key
#[derive(Debug, Clone)]
pub struct HttpSessionService {
    api: ApiClient,
}

impl HttpSessionService {
    /// Create a client for the service at `base`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url, api_key: String, timeout: Duration) -> ServiceResult<Self> {
        Ok(Self {
            api: ApiClient::new(base, api_key, timeout)?,
        })
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> ServiceResult<Option<AuthenticatedSession>> {
        let body = json!({
            "emailAddress": credentials.email_address,
            "passwordHash": credentials.password_hash,
            "metered": true,
            "marketingPreferenceOptIn": false,
        });
        let response: AuthenticateResponse = self
            .api
            .call(Method::PUT, "authenticate", &[], Some(body))
            .await?;

        Ok(response
            .authenticated_session
            .map(|session| AuthenticatedSession {
                id: SessionId::new(session.id),
                api_key: session.api_key,
            }))
    }
}

/// Lobby service over HTTP; uses the authenticated session's key
#[derive(Debug, Clone)]
pub struct HttpLobbyService {
    api: ApiClient,
}

impl HttpLobbyService {
    /// Create a client for the service at `base`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url, session: &AuthenticatedSession, timeout: Duration) -> ServiceResult<Self> {
        Ok(Self {
            api: ApiClient::new(base, session.api_key.clone(), timeout)?,
        })
    }
}

#[async_trait]
impl LobbyService for HttpLobbyService {
    async fn list_groups(&self) -> ServiceResult<Vec<Group>> {
        let page: Paginated<WireLobby> = self
            .api
            .call(Method::GET, "lobbies/paginated", &[], None)
            .await?;
        Ok(page.results.into_iter().map(Group::from).collect())
    }

    async fn create_group(&self, name: &str, max_members: u32) -> ServiceResult<Group> {
        let max = max_members.to_string();
        let lobby: WireLobby = self
            .api
            .call(
                Method::PUT,
                "lobby",
                &[("name", name), ("maxSessions", &max)],
                None,
            )
            .await?;
        Ok(lobby.into())
    }

    async fn join_group(&self, group_id: &str, session_id: &SessionId) -> ServiceResult<()> {
        self.api
            .send(
                Method::PUT,
                "session",
                &[("id", group_id), ("sessionId", session_id.as_str())],
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_members(&self, group_id: &str) -> ServiceResult<Vec<PeerSession>> {
        let members: Vec<WireMember> = self
            .api
            .call(Method::GET, "sessions", &[("id", group_id)], None)
            .await?;
        Ok(members
            .into_iter()
            .map(|m| PeerSession::new(m.session_id))
            .collect())
    }
}

/// Punchthrough signaling service over HTTP; uses the authenticated session's key
#[derive(Debug, Clone)]
pub struct HttpSignalingService {
    api: ApiClient,
}

impl HttpSignalingService {
    /// Create a client for the service at `base`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url, session: &AuthenticatedSession, timeout: Duration) -> ServiceResult<Self> {
        Ok(Self {
            api: ApiClient::new(base, session.api_key.clone(), timeout)?,
        })
    }
}

#[async_trait]
impl SignalingService for HttpSignalingService {
    async fn request_punch_message(&self, session_id: &SessionId) -> ServiceResult<PunchMessage> {
        let wire: WirePunchMessage = self
            .api
            .call(
                Method::PUT,
                "punchthrough",
                &[("session", session_id.as_str())],
                None,
            )
            .await?;
        wire.try_into()
    }

    async fn poll_completion(&self, session_id: &SessionId) -> ServiceResult<bool> {
        self.api
            .call(
                Method::GET,
                "punchthrough",
                &[("session", session_id.as_str())],
                None,
            )
            .await
    }

    async fn list_endpoints(&self, session_id: &SessionId) -> ServiceResult<Vec<Endpoint>> {
        let endpoints: Vec<WireEndpoint> = self
            .api
            .call(
                Method::GET,
                "endpoints",
                &[("session", session_id.as_str())],
                None,
            )
            .await?;
        Ok(endpoints.into_iter().map(Endpoint::from).collect())
    }
}
