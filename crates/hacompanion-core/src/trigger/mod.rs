// ── External triggers ──
//
// Everything that can wake the companion from outside: pushes, URL
// invocations, shortcuts, OS background ticks, watch messages, voice
// intents and notification responses. Payloads are parsed into typed
// structures here; classification lives in `router`.

mod intent;
mod link;
mod push;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use crate::action::LocationTrigger;

pub use intent::{IntentRequest, IntentResponse, IntentResponseCode};
pub use link::{UniversalLink, UrlInvocation, BROWSING_WEB_ACTIVITY};
pub use push::{
    Aps, DEFAULT_ACTION_IDENTIFIER, DISMISS_ACTION_IDENTIFIER, NotificationResponse,
    NotificationUrl, PresentationOptions, PushPayload,
};

/// Home-screen quick action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppShortcut {
    /// `sendLocation`, or the identifier of a configured action.
    pub shortcut_type: String,
    #[serde(default)]
    pub user_info: Map<String, Value>,
}

/// Message received from a paired watch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WatchMessage {
    pub identifier: String,
    #[serde(default)]
    pub content: Map<String, Value>,
}

/// One inbound stimulus.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalTrigger {
    PushNotification(PushPayload),
    UrlScheme(UrlInvocation),
    AppShortcut(AppShortcut),
    BackgroundFetchTick,
    BackgroundSessionCompletion { identifier: String },
    VoiceShortcutRun(IntentRequest),
    WatchMessage(WatchMessage),
    UniversalLink(UniversalLink),
    NotificationResponse(NotificationResponse),
}

impl ExternalTrigger {
    /// Short name used in logs and routing errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PushNotification(_) => "push",
            Self::UrlScheme(_) => "url",
            Self::AppShortcut(_) => "app_shortcut",
            Self::BackgroundFetchTick => "background_fetch",
            Self::BackgroundSessionCompletion { .. } => "background_session",
            Self::VoiceShortcutRun(_) => "intent",
            Self::WatchMessage(_) => "watch",
            Self::UniversalLink(_) => "universal_link",
            Self::NotificationResponse(_) => "notification_response",
        }
    }
}

/// Where an action request came from. Names the telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TriggerSource {
    PushNotification,
    UrlScheme,
    XCallbackUrl,
    AppShortcut,
    BackgroundFetch,
    VoiceShortcut,
    Watch,
    NotificationResponse,
    Lifecycle,
}

impl TriggerSource {
    /// Event name used when reporting an action run from this source.
    pub fn event_name(self) -> String {
        format!("ios.{self}_handled")
    }

    /// The location trigger reported for location/sensor updates.
    pub fn location_trigger(self) -> LocationTrigger {
        match self {
            Self::PushNotification | Self::NotificationResponse => LocationTrigger::PushNotification,
            Self::UrlScheme => LocationTrigger::UrlScheme,
            Self::XCallbackUrl => LocationTrigger::XCallbackUrl,
            Self::AppShortcut => LocationTrigger::AppShortcut,
            Self::BackgroundFetch => LocationTrigger::BackgroundFetch,
            Self::VoiceShortcut => LocationTrigger::Siri,
            Self::Watch | Self::Lifecycle => LocationTrigger::Manual,
        }
    }
}
