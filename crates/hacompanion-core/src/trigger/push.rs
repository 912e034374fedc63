// Push notification payloads and notification responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Action identifier reported when the notification body itself was tapped.
pub const DEFAULT_ACTION_IDENTIFIER: &str = "com.apple.UNNotificationDefaultActionIdentifier";
/// Action identifier reported when the notification was dismissed.
pub const DISMISS_ACTION_IDENTIFIER: &str = "com.apple.UNNotificationDismissActionIdentifier";

/// Key of the catch-all entry in a per-action URL map.
const URL_FALLBACK_KEY: &str = "_";

/// Standard notification block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Aps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<Value>,
    #[serde(
        default,
        deserialize_with = "lenient_badge",
        skip_serializing_if = "Option::is_none"
    )]
    pub badge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Value>,
}

/// URL attached to a notification: one for every action, or one per
/// action identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationUrl {
    Single(String),
    PerAction(BTreeMap<String, String>),
}

impl NotificationUrl {
    /// The URL for `action_identifier`.
    ///
    /// Per-action keys match case-insensitively. The `_` entry applies only
    /// to the default action (tapping the notification body).
    pub fn for_action(&self, action_identifier: &str) -> Option<&str> {
        match self {
            Self::Single(url) => Some(url),
            Self::PerAction(urls) => urls
                .iter()
                .find(|(key, _)| {
                    key.eq_ignore_ascii_case(action_identifier)
                        || (action_identifier == DEFAULT_ACTION_IDENTIFIER
                            && key.as_str() == URL_FALLBACK_KEY)
                })
                .map(|(_, url)| url.as_str()),
        }
    }
}

/// Payload of a remote push.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushPayload {
    /// Command block of silent pushes (`{"command": "..."}`).
    #[serde(
        default,
        deserialize_with = "lenient_object",
        skip_serializing_if = "Option::is_none"
    )]
    pub homeassistant: Option<Map<String, Value>>,
    #[serde(
        default,
        deserialize_with = "lenient_aps",
        skip_serializing_if = "Option::is_none"
    )]
    pub aps: Option<Aps>,
    /// Restricts how the notification is shown while in the foreground.
    #[serde(
        default,
        deserialize_with = "lenient_presentation",
        skip_serializing_if = "Option::is_none"
    )]
    pub presentation_options: Option<Vec<String>>,
    /// Shortcut to run when the notification is opened.
    #[serde(
        default,
        deserialize_with = "lenient_string_map",
        skip_serializing_if = "Option::is_none"
    )]
    pub shortcut: Option<BTreeMap<String, String>>,
    #[serde(
        default,
        deserialize_with = "lenient_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub url: Option<NotificationUrl>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PushPayload {
    /// Parse a raw payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The silent-push command, if this payload carries one.
    pub fn command(&self) -> Option<&str> {
        self.homeassistant
            .as_ref()?
            .get("command")
            .and_then(Value::as_str)
    }

    pub fn has_sound(&self) -> bool {
        self.aps
            .as_ref()
            .and_then(|aps| aps.sound.as_ref())
            .is_some_and(|sound| !sound.is_null())
    }

    /// How to present this notification while in the foreground.
    ///
    /// All options by default. An explicit `presentation_options` list keeps
    /// only the listed ones, except that sound stays on whenever the
    /// notification carries a sound.
    pub fn presentation_options(&self) -> PresentationOptions {
        let Some(requested) = &self.presentation_options else {
            return PresentationOptions::all();
        };
        let has = |name: &str| requested.iter().any(|o| o.eq_ignore_ascii_case(name));
        PresentationOptions {
            alert: has("alert"),
            badge: has("badge"),
            sound: has("sound") || self.has_sound(),
        }
    }
}

/// Foreground presentation of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct PresentationOptions {
    pub alert: bool,
    pub badge: bool,
    pub sound: bool,
}

impl PresentationOptions {
    pub fn all() -> Self {
        Self {
            alert: true,
            badge: true,
            sound: true,
        }
    }

    pub fn none() -> Self {
        Self {
            alert: false,
            badge: false,
            sound: false,
        }
    }
}

/// The user acted on a delivered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub action_identifier: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub payload: PushPayload,
    /// Text typed into a text-input action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
}

impl NotificationResponse {
    pub fn is_dismissal(&self) -> bool {
        self.action_identifier == DISMISS_ACTION_IDENTIFIER
    }
}

// ── Lenient field parsing ────────────────────────────────────────────
//
// Payloads come from arbitrary automations. A field with an unexpected
// shape is dropped (with a warning) instead of rejecting the whole push,
// so a silent command still runs next to a malformed decoration.

fn lenient_badge<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(de)?;
    let badge = value.as_u64().and_then(|n| u32::try_from(n).ok());
    if badge.is_none() && !value.is_null() {
        warn!(%value, "ignoring invalid badge");
    }
    Ok(badge)
}

fn lenient_object<'de, D: Deserializer<'de>>(
    de: D,
) -> Result<Option<Map<String, Value>>, D::Error> {
    match Value::deserialize(de)? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => {
            warn!(value = %other, "ignoring non-object block");
            Ok(None)
        }
    }
}

fn lenient_aps<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Aps>, D::Error> {
    let Some(map) = lenient_object(de)? else {
        return Ok(None);
    };
    // Only fails on a non-object, which `lenient_object` already ruled out.
    Ok(serde_json::from_value(Value::Object(map)).ok())
}

fn lenient_presentation<'de, D: Deserializer<'de>>(
    de: D,
) -> Result<Option<Vec<String>>, D::Error> {
    match Value::deserialize(de)? {
        Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(option) => Some(option),
                    other => {
                        warn!(value = %other, "ignoring presentation option");
                        None
                    }
                })
                .collect(),
        )),
        Value::Null => Ok(None),
        other => {
            warn!(value = %other, "ignoring presentation_options");
            Ok(None)
        }
    }
}

/// Scalars are kept in their JSON spelling; nested values are dropped.
fn stringify_entries(map: Map<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Number(n) => Some((key, n.to_string())),
            Value::Bool(b) => Some((key, b.to_string())),
            other => {
                warn!(key = %key, value = %other, "dropping non-scalar entry");
                None
            }
        })
        .collect()
}

fn lenient_string_map<'de, D: Deserializer<'de>>(
    de: D,
) -> Result<Option<BTreeMap<String, String>>, D::Error> {
    Ok(lenient_object(de)?.map(stringify_entries))
}

fn lenient_url<'de, D: Deserializer<'de>>(de: D) -> Result<Option<NotificationUrl>, D::Error> {
    match Value::deserialize(de)? {
        Value::String(url) => Ok(Some(NotificationUrl::Single(url))),
        Value::Object(map) => Ok(Some(NotificationUrl::PerAction(stringify_entries(map)))),
        Value::Null => Ok(None),
        other => {
            warn!(value = %other, "ignoring url");
            Ok(None)
        }
    }
}
