//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use hacompanion_config::ConfigError;
use hacompanion_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Request to the server failed: {message}")]
    #[diagnostic(
        code(hacompanion::remote_failed),
        help("Check that the server is reachable. Use --insecure (-k) for self-signed certificates.")
    )]
    RemoteFailed {
        message: String,
        status: Option<u16>,
    },

    #[error("Could not build the HTTP client: {message}")]
    #[diagnostic(
        code(hacompanion::transport),
        help("Check the ca_cert path and TLS settings of the profile.")
    )]
    Transport { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("The server no longer accepts this device's credentials")]
    #[diagnostic(
        code(hacompanion::auth_revoked),
        help(
            "The token was revoked or the webhook deleted.\n\
             Register the device again, then run: hacompanion config init --force ..."
        )
    )]
    AuthRevoked { message: String },

    #[error("Not signed in")]
    #[diagnostic(code(hacompanion::unauthenticated))]
    Unauthenticated,

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(hacompanion::no_credentials),
        help(
            "Store one with: hacompanion config set-token --profile {profile}\n\
             Or set HACOMPANION_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── Triggers ─────────────────────────────────────────────────────
    #[error("Cannot route {trigger}: {reason}")]
    #[diagnostic(code(hacompanion::unroutable))]
    Unroutable { trigger: String, reason: String },

    #[error("{message}")]
    #[diagnostic(code(hacompanion::action_failed))]
    ActionFailed { message: String },

    #[error("Background window '{name}' expired before the work finished")]
    #[diagnostic(
        code(hacompanion::budget_exhausted),
        help("Raise updates.background_budget in the profile.")
    )]
    BudgetExhausted { name: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hacompanion::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hacompanion::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: hacompanion config init --profile {name} ..."
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(hacompanion::no_config),
        help(
            "Create one with: hacompanion config init --server URL --webhook-id ID\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(hacompanion::config))]
    Config(Box<ConfigError>),

    #[error("Keyring access failed: {message}")]
    #[diagnostic(code(hacompanion::keyring))]
    Keyring { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(hacompanion::json), help("Check the JSON payload and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::RemoteFailed { .. } | Self::Transport { .. } => exit_code::CONNECTION,
            Self::AuthRevoked { .. } | Self::Unauthenticated | Self::NoCredentials { .. } => {
                exit_code::AUTH
            }
            Self::BudgetExhausted { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Unroutable { .. } | Self::Json(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unauthenticated => Self::Unauthenticated,
            CoreError::Unroutable { trigger, reason } => Self::Unroutable { trigger, reason },
            CoreError::RemoteOperationFailed {
                message,
                auth_invalid: true,
                ..
            } => Self::AuthRevoked { message },
            CoreError::RemoteOperationFailed {
                message, status, ..
            } => Self::RemoteFailed { message, status },
            CoreError::BudgetExhausted { name } => Self::BudgetExhausted { name },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            other @ (CoreError::ExternalActionFailed { .. }
            | CoreError::OperationFailed { .. }
            | CoreError::Internal(_)) => Self::ActionFailed {
                message: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(Box::new(other)),
        }
    }
}

impl From<hacompanion_api::Error> for CliError {
    fn from(err: hacompanion_api::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_credentials_exit_with_auth_code() {
        let err = CliError::from(CoreError::RemoteOperationFailed {
            message: "gone".into(),
            status: Some(410),
            auth_invalid: true,
        });
        assert!(matches!(err, CliError::AuthRevoked { .. }));
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn transient_failures_exit_with_connection_code() {
        let err = CliError::from(CoreError::RemoteOperationFailed {
            message: "bad gateway".into(),
            status: Some(502),
            auth_invalid: false,
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn unroutable_is_a_usage_error() {
        let err = CliError::from(CoreError::Unroutable {
            trigger: "url".into(),
            reason: "unknown host".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
