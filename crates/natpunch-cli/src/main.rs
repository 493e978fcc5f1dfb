//! natpunch CLI
//!
//! Authenticates, joins a lobby and punches through NAT from one UDP socket.

mod config;
mod progress;
mod remote;

use anyhow::Context;
use clap::{Parser, Subcommand};
use natpunch_discovery::{
    CompletionPolicy, Credentials, PunchSession, SessionConfig, SessionId, SessionServices,
    Shutdown, authenticate, join_or_create_lobby,
};
use natpunch_discovery::{AuthenticatedSession, LobbyService};
use natpunch_transport::UdpChannel;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{NegotiationSpinner, format_bytes, format_duration};
use remote::{HttpLobbyService, HttpSessionService, HttpSignalingService, password_hash};

/// Environment variable holding the project API key
const API_KEY_ENV: &str = "API_KEY";

/// natpunch - NAT punchthrough over a single UDP socket
#[derive(Parser)]
#[command(name = "natpunch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path [default: <config dir>/natpunch/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate, join a lobby and punch through NAT
    Run {
        /// Account email address (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,

        /// Keep probing peers after punchthrough succeeds, until Ctrl+C
        #[arg(long)]
        keep_discovering: bool,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List available lobbies
    Lobbies {
        /// Account email address (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_create(Config::default_path())?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .init();

    match cli.command {
        Commands::Run {
            email,
            keep_discovering,
            timeout,
        } => {
            run_session(email, keep_discovering, timeout.map(Duration::from_secs), &config)
                .await?;
        }
        Commands::Lobbies { email } => {
            list_lobbies(email, &config).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Prompt for credentials not supplied on the command line
fn read_credentials(email: Option<String>) -> anyhow::Result<Credentials> {
    println!("Enter the details for the account you want to sign in with.");

    let email_address = match email {
        Some(email) => email,
        None => {
            print!("Email address: ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    if email_address.is_empty() {
        anyhow::bail!("Email address is required");
    }

    let password = rpassword::prompt_password("Password: ")?;

    Ok(Credentials {
        email_address,
        password_hash: password_hash(&password),
    })
}

/// Authenticate with the session service
async fn sign_in(email: Option<String>, config: &Config) -> anyhow::Result<AuthenticatedSession> {
    let api_key = std::env::var(API_KEY_ENV)
        .with_context(|| format!("{API_KEY_ENV} environment variable is not set"))?;
    let credentials = read_credentials(email)?;

    let (session_url, _, _) = config.service_urls()?;
    let sessions = HttpSessionService::new(session_url, api_key, config.request_timeout())?;

    println!("Logging in...");
    Ok(authenticate(&sessions, &credentials).await?)
}

/// Run a full punchthrough session
async fn run_session(
    email: Option<String>,
    keep_discovering: bool,
    deadline: Option<Duration>,
    config: &Config,
) -> anyhow::Result<()> {
    let session = sign_in(email, config).await?;

    let (_, lobby_url, punch_url) = config.service_urls()?;
    let lobby = Arc::new(HttpLobbyService::new(lobby_url, &session, config.request_timeout())?);
    let signaling = Arc::new(HttpSignalingService::new(
        punch_url,
        &session,
        config.request_timeout(),
    )?);

    println!("Finding a suitable lobby...");
    let group = join_or_create_lobby(&*lobby, &session.id, &config.lobby_spec()).await?;
    println!("Joined lobby {} \"{}\"", group.id, group.name);

    println!("Starting UDP client...");
    let channel = UdpChannel::bind_with_config(config.bind_addr()?, &config.transport_config())
        .await?;
    println!("Now listening on {}.", channel.local_endpoint()?);

    let policy = if keep_discovering {
        CompletionPolicy::KeepDiscovering
    } else {
        config.completion_policy()?
    };
    let session_config = SessionConfig {
        session_id: session.id.clone(),
        lobby_id: group.id.clone(),
        probe_interval: config.probe_interval(),
        negotiator: config.negotiator_config(),
        policy,
    };
    let mut punch = PunchSession::new(
        session_config,
        SessionServices { lobby, signaling },
        channel,
    )?;

    let shutdown = Shutdown::new();
    spawn_shutdown_triggers(&shutdown, deadline);

    let spinner = NegotiationSpinner::start(punch.progress());
    let heard = tokio::spawn(collect_peers(punch.take_events(), session.id.clone()));

    let started = Instant::now();
    let outcome = punch.run(shutdown.signal()).await;
    let peers = heard.await.unwrap_or_default();

    let report = match outcome {
        Ok(report) => {
            spinner.finish_with_message(format!(
                "NAT punchthrough completed successfully after {} attempts!",
                report.path.attempts
            ));
            report
        }
        Err(e) => {
            spinner.abandon();
            return Err(e).context("NAT punchthrough failed");
        }
    };

    println!();
    println!("Available at the following endpoints:");
    for endpoint in &report.path.endpoints {
        println!(" - {endpoint}");
    }
    if report.path.endpoints.is_empty() {
        println!(" (none reported)");
    }

    println!();
    println!("Session summary:");
    println!("  Elapsed: {}", format_duration(started.elapsed()));
    println!("  Probe cycles: {}", report.probe_cycles);
    println!("  Datagrams received: {}", report.datagrams_received);
    println!(
        "  Sent: {} in {} datagrams",
        format_bytes(report.stats.bytes_sent),
        report.stats.packets_sent
    );
    println!(
        "  Received: {} in {} datagrams",
        format_bytes(report.stats.bytes_received),
        report.stats.packets_received
    );
    if report.stats.send_errors > 0 {
        println!(
            "  Send errors: {} ({:.1}%)",
            report.stats.send_errors,
            report.stats.send_error_rate() * 100.0
        );
    }
    if !peers.is_empty() {
        println!("  Pinged by: {}", join_ids(&peers));
    }

    Ok(())
}

/// Fire `shutdown` on Ctrl+C, and after `deadline` if one is set
fn spawn_shutdown_triggers(shutdown: &Shutdown, deadline: Option<Duration>) {
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            on_ctrl_c.trigger();
        }
    });

    if let Some(deadline) = deadline {
        let on_deadline = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::warn!("Giving up after {}", format_duration(deadline));
            on_deadline.trigger();
        });
    }
}

/// Session ids of the peers whose pings reached us
async fn collect_peers(
    events: Option<tokio::sync::mpsc::UnboundedReceiver<natpunch_discovery::InboundEvent>>,
    own_id: SessionId,
) -> BTreeSet<SessionId> {
    let mut peers = BTreeSet::new();
    let Some(mut events) = events else {
        return peers;
    };

    while let Some(event) = events.recv().await {
        if let Some(sender) = event.ping_sender() {
            if sender != own_id && peers.insert(sender.clone()) {
                tracing::info!("First ping from session {sender} ({})", event.source);
            }
        }
    }
    peers
}

fn join_ids(ids: &BTreeSet<SessionId>) -> String {
    ids.iter()
        .map(SessionId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// List the lobbies visible to the account
async fn list_lobbies(email: Option<String>, config: &Config) -> anyhow::Result<()> {
    let session = sign_in(email, config).await?;

    let (_, lobby_url, _) = config.service_urls()?;
    let lobby = HttpLobbyService::new(lobby_url, &session, config.request_timeout())?;
    let groups = lobby.list_groups().await?;

    println!("Lobbies:");
    println!();
    if groups.is_empty() {
        println!("No lobbies found");
        return Ok(());
    }

    for group in groups {
        let limit = if group.max_members == 0 {
            "unlimited".to_string()
        } else {
            group.max_members.to_string()
        };
        println!("  {}  \"{}\"  (max members: {limit})", group.id, group.name);
    }

    Ok(())
}
