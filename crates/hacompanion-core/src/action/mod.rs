// ── Action requests ──
//
// A trigger is classified into exactly one `ActionRequest`, which the
// dispatcher executes against the remote API. Every execution settles into
// an `Outcome`.

mod xcallback;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};

use crate::envelope::{FetchResult, FetchState};
use crate::error::CoreError;

pub use xcallback::{XCallbackError, XCallbackUrls};

// ── Supporting enums ─────────────────────────────────────────────────

/// Why a location or sensor update was sent. Reported to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum LocationTrigger {
    #[strum(serialize = "Push Notification")]
    #[serde(rename = "Push Notification")]
    PushNotification,
    #[strum(serialize = "Background Fetch")]
    #[serde(rename = "Background Fetch")]
    BackgroundFetch,
    #[strum(serialize = "App Shortcut")]
    #[serde(rename = "App Shortcut")]
    AppShortcut,
    #[strum(serialize = "X-Callback-URL")]
    #[serde(rename = "X-Callback-URL")]
    XCallbackUrl,
    #[strum(serialize = "URL Scheme")]
    #[serde(rename = "URL Scheme")]
    UrlScheme,
    #[strum(serialize = "Siri")]
    #[serde(rename = "Siri")]
    Siri,
    #[strum(serialize = "Periodic")]
    #[serde(rename = "Periodic")]
    Periodic,
    #[strum(serialize = "Manual")]
    #[serde(rename = "Manual")]
    Manual,
}

/// Where a named action was invoked from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ActionSource {
    Watch,
    Widget,
    AppShortcut,
    Preview,
    UrlHandler,
}

/// Why the app is (re)connecting to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectReason {
    Cold,
    Warm,
    Periodic,
}

/// A user's response to an actionable notification, forwarded to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushAction {
    pub identifier: String,
    pub category: String,
    /// The notification payload the action belongs to.
    pub payload: Value,
    /// Text typed into a text-input action, if any.
    pub user_input: Option<String>,
}

// ── ActionRequest ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    FireEvent {
        name: String,
        data: Map<String, Value>,
    },
    CallService {
        domain: String,
        service: String,
        data: Map<String, Value>,
    },
    SendLocation {
        trigger: LocationTrigger,
    },
    RenderTemplate {
        template: String,
        variables: Map<String, Value>,
    },
    HandleAction {
        action_id: String,
        action_name: String,
        source: ActionSource,
    },
    RunShortcut {
        name: String,
        parameters: BTreeMap<String, String>,
    },
    UpdateSensors {
        trigger: LocationTrigger,
    },
    HandlePushAction(PushAction),
}

impl ActionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FireEvent { .. } => "fire_event",
            Self::CallService { .. } => "call_service",
            Self::SendLocation { .. } => "send_location",
            Self::RenderTemplate { .. } => "render_template",
            Self::HandleAction { .. } => "handle_action",
            Self::RunShortcut { .. } => "run_shortcut",
            Self::UpdateSensors { .. } => "update_sensors",
            Self::HandlePushAction(_) => "handle_push_action",
        }
    }

    /// The original parameters, as attached to telemetry.
    pub fn input(&self) -> Value {
        match self {
            Self::FireEvent { name, data } => json!({ "event_name": name, "event_data": data }),
            Self::CallService {
                domain,
                service,
                data,
            } => json!({ "service": format!("{domain}.{service}"), "service_data": data }),
            Self::SendLocation { trigger } | Self::UpdateSensors { trigger } => {
                json!({ "trigger": trigger.to_string() })
            }
            Self::RenderTemplate {
                template,
                variables,
            } => json!({ "template": template, "variables": variables }),
            Self::HandleAction {
                action_id,
                action_name,
                source,
            } => json!({
                "action_id": action_id,
                "action_name": action_name,
                "source": source.to_string(),
            }),
            Self::RunShortcut { name, parameters } => json!({ "name": name, "input": parameters }),
            Self::HandlePushAction(action) => json!({
                "identifier": action.identifier,
                "category": action.category,
            }),
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────

/// Result of executing one `ActionRequest`.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Completed; carries a result value for actions that produce one
    /// (rendered templates, shortcut output).
    Success(Option<Value>),
    Failure(CoreError),
    Cancelled,
}

/// Telemetry status of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Cancelled,
}

impl Outcome {
    pub fn status(&self) -> OutcomeStatus {
        match self {
            Self::Success(_) => OutcomeStatus::Success,
            Self::Failure(_) => OutcomeStatus::Failure,
            Self::Cancelled => OutcomeStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<Option<Value>, CoreError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
            Self::Cancelled => Ok(None),
        }
    }
}

/// Cancellation produced no new state.
impl FetchState for Outcome {
    fn fetch_result(&self) -> FetchResult {
        match self {
            Self::Success(_) => FetchResult::NewData,
            Self::Failure(_) => FetchResult::Failed,
            Self::Cancelled => FetchResult::NoData,
        }
    }
}

impl From<Result<(), CoreError>> for Outcome {
    fn from(result: Result<(), CoreError>) -> Self {
        match result {
            Ok(()) => Self::Success(None),
            Err(err) => Self::Failure(err),
        }
    }
}

impl From<Result<String, CoreError>> for Outcome {
    fn from(result: Result<String, CoreError>) -> Self {
        match result {
            Ok(value) => Self::Success(Some(Value::String(value))),
            Err(err) => Self::Failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn location_trigger_wire_names() {
        assert_eq!(LocationTrigger::PushNotification.to_string(), "Push Notification");
        assert_eq!(
            LocationTrigger::from_str("X-Callback-URL").ok(),
            Some(LocationTrigger::XCallbackUrl)
        );
        assert_eq!(
            serde_json::to_value(LocationTrigger::BackgroundFetch).ok(),
            Some(json!("Background Fetch"))
        );
    }

    #[test]
    fn call_service_input_joins_service_name() {
        let mut data = Map::new();
        data.insert("entity_id".into(), json!("light.kitchen"));
        let request = ActionRequest::CallService {
            domain: "light".into(),
            service: "turn_on".into(),
            data,
        };
        assert_eq!(
            request.input(),
            json!({ "service": "light.turn_on", "service_data": { "entity_id": "light.kitchen" } })
        );
    }

    #[test]
    fn outcome_maps_to_fetch_result() {
        assert_eq!(Outcome::Success(None).fetch_result(), FetchResult::NewData);
        assert_eq!(Outcome::Cancelled.fetch_result(), FetchResult::NoData);
        assert_eq!(
            Outcome::Failure(CoreError::Unauthenticated).fetch_result(),
            FetchResult::Failed
        );
    }
}
