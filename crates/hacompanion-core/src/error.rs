// ── Core error types ──
//
// Every failure inside the orchestration layer is converted into one of
// these variants and handed back to the caller as a value. Transport
// details from `hacompanion-api` are folded into `RemoteOperationFailed`.

use serde_json::{Value, json};
use thiserror::Error;

use crate::router::RouterError;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    /// No API handle is available and none is expected soon.
    #[error("Not authenticated: no API handle available")]
    Unauthenticated,

    // ── Routing ──────────────────────────────────────────────────────
    /// The trigger shape is not recognized or is missing required fields.
    #[error("Cannot route {trigger}: {reason}")]
    Unroutable { trigger: String, reason: String },

    // ── Remote operations ────────────────────────────────────────────
    /// The server or the network rejected the call.
    #[error("Remote operation failed: {message}")]
    RemoteOperationFailed {
        message: String,
        status: Option<u16>,
        /// The credentials are no longer valid (token revoked, webhook deleted).
        auth_invalid: bool,
    },

    /// An external action (e.g. a shortcut run) reported a failure.
    #[error("External action failed ({code}): {message}")]
    ExternalActionFailed { code: i32, message: String },

    // ── Background execution ─────────────────────────────────────────
    /// The background window expired before the operation completed.
    #[error("Background window '{name}' expired before the operation completed")]
    BudgetExhausted { name: String },

    // ── Local failures ───────────────────────────────────────────────
    /// A local collaborator (location, sensors, process spawn) failed.
    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unroutable { .. } => "unroutable",
            Self::RemoteOperationFailed { .. } => "remote_operation_failed",
            Self::ExternalActionFailed { .. } => "external_action_failed",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::OperationFailed { .. } => "operation_failed",
            Self::Config { .. } => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if recovering requires the user to sign in again.
    pub fn requires_reauth(&self) -> bool {
        match self {
            Self::Unauthenticated => true,
            Self::RemoteOperationFailed { auth_invalid, .. } => *auth_invalid,
            _ => false,
        }
    }

    /// Error descriptor attached to failure telemetry.
    ///
    /// External action failures keep the x-callback `errorCode` /
    /// `errorMessage` naming so shortcut failures round-trip unchanged.
    pub fn descriptor(&self) -> Value {
        match self {
            Self::ExternalActionFailed { code, message } => json!({
                "errorCode": code,
                "errorMessage": message,
            }),
            other => json!({
                "kind": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<hacompanion_api::Error> for CoreError {
    fn from(err: hacompanion_api::Error) -> Self {
        CoreError::RemoteOperationFailed {
            status: err.status(),
            auth_invalid: err.is_auth_invalid(),
            message: err.to_string(),
        }
    }
}

impl From<RouterError> for CoreError {
    fn from(err: RouterError) -> Self {
        CoreError::Unroutable {
            trigger: err.trigger().to_owned(),
            reason: err.to_string(),
        }
    }
}
