//! The terminal as the companion's UI surface.
//!
//! Alerts and prompts go to stderr; opened URLs are printed on stdout so
//! scripts can pick them up.

use std::io::IsTerminal;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use url::Url;

use hacompanion_core::UiSurface;

#[derive(Debug)]
pub struct TerminalSurface {
    assume_yes: bool,
    prompt: bool,
    url_handled: Notify,
}

impl TerminalSurface {
    /// `assume_yes` answers every confirmation; otherwise the user is asked
    /// when stdin is a terminal and `allow_prompt` is set, and the answer
    /// is no when they cannot be asked.
    pub fn new(assume_yes: bool, allow_prompt: bool) -> Self {
        Self {
            assume_yes,
            prompt: allow_prompt && std::io::stdin().is_terminal(),
            url_handled: Notify::new(),
        }
    }

    /// Resolves once a URL was opened or declined.
    pub async fn url_handled(&self) {
        self.url_handled.notified().await;
    }
}

#[async_trait]
impl UiSurface for TerminalSurface {
    fn present_alert(&self, title: &str, message: &str) {
        eprintln!("{title}: {message}");
    }

    fn open_inline(&self, url: &Url) {
        println!("open inline: {url}");
        self.url_handled.notify_one();
    }

    fn open_external(&self, url: &Url) {
        println!("open: {url}");
        self.url_handled.notify_one();
    }

    async fn confirm(&self, title: &str, message: &str) -> bool {
        let answer = if self.assume_yes {
            true
        } else if self.prompt {
            eprint!("{title} {message} [y/N] ");
            let mut line = String::new();
            match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
                Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read confirmation");
                    false
                }
            }
        } else {
            tracing::info!(title, message, "declining confirmation without a terminal (use --yes)");
            false
        };
        if !answer {
            self.url_handled.notify_one();
        }
        answer
    }
}
