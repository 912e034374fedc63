use thiserror::Error;

/// Top-level error type for the `hacompanion-api` crate.
///
/// Covers every failure mode of the webhook and REST surfaces.
/// `hacompanion-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server rejected the bearer token (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The webhook is no longer registered on the server (HTTP 404/410).
    ///
    /// Happens when the integration was deleted server-side; the device
    /// must re-register before any further webhook call can succeed.
    #[error("Webhook {webhook_id} is no longer registered")]
    WebhookGone { webhook_id: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success HTTP status from the server.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The server rendered a template but reported an error for it.
    #[error("Template rendering failed: {message}")]
    Template { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the credentials backing the client are no longer
    /// usable and re-authentication is required.
    pub fn is_auth_invalid(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::WebhookGone { .. })
    }

    /// Returns `true` if this is a transient error worth retrying on the
    /// next natural trigger.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
