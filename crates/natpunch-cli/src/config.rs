//! Configuration system for the natpunch CLI.

use natpunch_discovery::{CompletionPolicy, LobbySpec, NegotiatorConfig};
use natpunch_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// natpunch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote service endpoints
    #[serde(default)]
    pub services: ServicesConfig,
    /// Socket configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Probe and negotiation timing
    #[serde(default)]
    pub timing: TimingConfig,
    /// Lobby and completion behavior
    #[serde(default)]
    pub session: SessionSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Session (authentication) service base URL
    #[serde(default = "default_session_url")]
    pub session_url: String,
    /// Lobby service base URL
    #[serde(default = "default_lobby_url")]
    pub lobby_url: String,
    /// Punchthrough signaling service base URL
    #[serde(default = "default_punchthrough_url")]
    pub punchthrough_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local bind address; port 0 lets the OS choose
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Socket receive buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub recv_buffer_size: usize,
    /// Socket send buffer in bytes
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,
}

/// Probe and negotiation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause between probe cycles in milliseconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    /// Pause between punch send and completion poll in milliseconds
    #[serde(default = "default_retransmit_interval")]
    pub retransmit_interval_ms: u64,
    /// Consecutive poll failures tolerated; one more gives up. 0 retries forever
    #[serde(default = "default_max_poll_errors")]
    pub max_consecutive_poll_errors: u32,
}

/// Lobby and completion behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Name of the lobby created when none exist
    #[serde(default = "default_lobby_name")]
    pub lobby_name: String,
    /// Member limit of a created lobby; 0 means unlimited
    #[serde(default)]
    pub max_members: u32,
    /// `stop-all` or `keep-discovering`
    #[serde(default = "default_completion_policy")]
    pub completion_policy: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_session_url() -> String {
    "https://user-session-api.hivemp.com/v1".to_string()
}

fn default_lobby_url() -> String {
    "https://lobby-api.hivemp.com/v1".to_string()
}

fn default_punchthrough_url() -> String {
    "https://nat-punchthrough-api.hivemp.com/v1".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_buffer_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_probe_interval() -> u64 {
    5000
}

fn default_retransmit_interval() -> u64 {
    1000
}

fn default_max_poll_errors() -> u32 {
    5
}

fn default_lobby_name() -> String {
    LobbySpec::default().name
}

fn default_completion_policy() -> String {
    CompletionPolicy::default().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            session_url: default_session_url(),
            lobby_url: default_lobby_url(),
            punchthrough_url: default_punchthrough_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            recv_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval(),
            retransmit_interval_ms: default_retransmit_interval(),
            max_consecutive_poll_errors: default_max_poll_errors(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            lobby_name: default_lobby_name(),
            max_members: 0,
            completion_policy: default_completion_policy(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("natpunch/config.toml")
    }

    /// Load config from `path`, writing defaults there first if it is missing
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Parse the bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.network
            .bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {e}", self.network.bind_addr))
    }

    /// Parse the completion policy
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown policy name.
    pub fn completion_policy(&self) -> anyhow::Result<CompletionPolicy> {
        Ok(self.session.completion_policy.parse()?)
    }

    /// Parsed service base URLs: (session, lobby, punchthrough)
    ///
    /// # Errors
    ///
    /// Returns an error if any URL is invalid or not http(s).
    pub fn service_urls(&self) -> anyhow::Result<(Url, Url, Url)> {
        Ok((
            parse_service_url(&self.services.session_url, "Session service")?,
            parse_service_url(&self.services.lobby_url, "Lobby service")?,
            parse_service_url(&self.services.punchthrough_url, "Punchthrough service")?,
        ))
    }

    /// Per-request timeout for the remote services
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.services.request_timeout_secs)
    }

    /// Socket buffer sizes
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            recv_buffer_size: self.network.recv_buffer_size,
            send_buffer_size: self.network.send_buffer_size,
        }
    }

    /// Pause between probe cycles
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.timing.probe_interval_ms)
    }

    /// Negotiator timing and retry policy
    #[must_use]
    pub fn negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            retransmit_interval: Duration::from_millis(self.timing.retransmit_interval_ms),
            max_consecutive_poll_errors: self.timing.max_consecutive_poll_errors,
        }
    }

    /// Lobby created when the service has none
    #[must_use]
    pub fn lobby_spec(&self) -> LobbySpec {
        LobbySpec {
            name: self.session.lobby_name.clone(),
            max_members: self.session.max_members,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        self.service_urls()?;
        self.completion_policy()?;

        if self.services.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be at least 1 second");
        }

        if self.timing.probe_interval_ms == 0 {
            anyhow::bail!("Probe interval must be non-zero");
        }
        if self.timing.retransmit_interval_ms == 0 {
            anyhow::bail!("Retransmit interval must be non-zero");
        }

        if self.network.recv_buffer_size == 0 || self.network.send_buffer_size == 0 {
            anyhow::bail!("Socket buffer sizes must be non-zero");
        }

        if self.session.lobby_name.trim().is_empty() {
            anyhow::bail!("Lobby name must not be empty");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

fn parse_service_url(raw: &str, name: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow::anyhow!("{name} URL '{raw}' is invalid: {e}"))?;

    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{name} URL '{raw}' must use http or https");
    }
    if url.host_str().is_none() {
        anyhow::bail!("{name} URL '{raw}' has no host");
    }

    Ok(url)
}
