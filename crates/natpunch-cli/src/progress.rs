//! Negotiation progress display.

use indicatif::{ProgressBar, ProgressStyle};
use natpunch_discovery::{NegotiationProgress, NegotiationState};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spinner that follows the negotiator's progress channel
pub struct NegotiationSpinner {
    bar: ProgressBar,
    follower: JoinHandle<()>,
}

impl NegotiationSpinner {
    /// Start the spinner and follow `progress` until it reaches a terminal state
    #[must_use]
    pub fn start(mut progress: watch::Receiver<NegotiationProgress>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(describe(*progress.borrow()));

        let follower = {
            let bar = bar.clone();
            tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let current = *progress.borrow_and_update();
                    bar.set_message(describe(current));
                    if current.state.is_terminal() {
                        break;
                    }
                }
            })
        };

        Self { bar, follower }
    }

    /// Stop the spinner, leaving `msg` in place
    pub fn finish_with_message(self, msg: String) {
        self.follower.abort();
        self.bar.finish_with_message(msg);
    }

    /// Stop the spinner and leave the last message (for errors)
    pub fn abandon(self) {
        self.follower.abort();
        self.bar.abandon();
    }
}

/// Human-readable line for a progress snapshot
#[must_use]
pub fn describe(progress: NegotiationProgress) -> String {
    match progress.state {
        NegotiationState::Requesting => "Requesting punchthrough message...".to_string(),
        NegotiationState::Probing if progress.attempts == 0 => {
            "Resolving punchthrough target...".to_string()
        }
        NegotiationState::Probing => format!(
            "Punching through NAT (attempt {})...",
            progress.attempts
        ),
        NegotiationState::Confirmed => format!(
            "Punchthrough confirmed after {} attempts",
            progress.attempts
        ),
        NegotiationState::Abandoned => format!(
            "Punchthrough abandoned after {} attempts",
            progress.attempts
        ),
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
