// Voice-assistant intents and their responses.

use serde::{Deserialize, Serialize};
use strum::Display;

/// A voice shortcut run. Parameters the user left empty arrive as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum IntentRequest {
    FireEvent {
        #[serde(default)]
        event_name: Option<String>,
        /// JSON object string.
        #[serde(default)]
        payload: Option<String>,
    },
    CallService {
        /// `domain.service`
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        payload: Option<String>,
    },
    SendLocation,
    RenderTemplate {
        #[serde(default)]
        template: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IntentResponseCode {
    Success,
    Failure,
    /// No usable connection to the server.
    FailureConnectivity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentResponse {
    pub code: IntentResponseCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntentResponse {
    pub fn success(result: Option<String>) -> Self {
        Self {
            code: IntentResponseCode::Success,
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            code: IntentResponseCode::Failure,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn failure_connectivity() -> Self {
        Self {
            code: IntentResponseCode::FailureConnectivity,
            result: None,
            error: None,
        }
    }
}
