// ── Application context ──
//
// Explicit, shared state handed to every handler: user settings, device
// identity, the resource broker, lifecycle state, badge count, live
// background sessions and the auth-callback channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::Display;
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::broker::{DEFAULT_API_WAIT, ResourceBroker};
use crate::session::SessionRegistry;

const AUTH_CALLBACK_CAPACITY: usize = 8;

// ── Device identity ──────────────────────────────────────────────────

/// Identity attached to telemetry and device-originated events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "sourceDevicePermanentID")]
    pub permanent_id: String,
    #[serde(rename = "sourceDeviceName")]
    pub name: String,
    #[serde(rename = "sourceDeviceID")]
    pub device_id: String,
}

impl DeviceIdentity {
    /// The identity as flat event fields.
    pub fn event_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("sourceDevicePermanentID".into(), json!(self.permanent_id));
        fields.insert("sourceDeviceName".into(), json!(self.name));
        fields.insert("sourceDeviceID".into(), json!(self.device_id));
        fields
    }
}

// ── Settings ─────────────────────────────────────────────────────────

/// Runtime settings; swapped atomically when the user changes them.
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Settings {
    /// Scheme the app answers to (`homeassistant://...`).
    pub url_scheme: String,
    /// Interval of the foreground keep-alive connect. `None` disables it.
    pub periodic_update_interval: Option<Duration>,
    pub location_enabled: bool,
    pub location_update_on_notification: bool,
    pub location_update_on_background_fetch: bool,
    /// Ask before opening a notification URL outside the instance.
    pub confirm_before_opening_url: bool,
    /// Execution budget granted to each background window.
    pub background_budget: Duration,
    /// How long `api()` waits for a sign-in in progress.
    pub api_wait_timeout: Duration,
    /// Send action telemetry to the server as events (otherwise log only).
    pub remote_telemetry: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_scheme: "homeassistant".into(),
            periodic_update_interval: Some(Duration::from_secs(300)),
            location_enabled: true,
            location_update_on_notification: true,
            location_update_on_background_fetch: true,
            confirm_before_opening_url: true,
            background_budget: Duration::from_secs(30),
            api_wait_timeout: DEFAULT_API_WAIT,
            remote_telemetry: true,
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AppState {
    /// Launched but not yet in the foreground.
    Inactive,
    Active,
    Background,
}

/// Application badge counter.
#[derive(Debug, Default)]
pub struct Badge {
    count: AtomicU32,
}

impl Badge {
    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn set(&self, count: u32) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.set(0);
    }
}

// ── AppContext ───────────────────────────────────────────────────────

/// Shared context. Cheap to clone; all fields are reference counted.
#[derive(Clone)]
pub struct AppContext {
    settings: Arc<ArcSwap<Settings>>,
    identity: Arc<DeviceIdentity>,
    broker: Arc<ResourceBroker>,
    sessions: Arc<SessionRegistry>,
    badge: Arc<Badge>,
    lifecycle: Arc<watch::Sender<AppState>>,
    auth_callbacks: broadcast::Sender<Url>,
}

impl AppContext {
    pub fn new(settings: Settings, identity: DeviceIdentity) -> Self {
        let broker = ResourceBroker::new(settings.api_wait_timeout);
        let (lifecycle, _) = watch::channel(AppState::Inactive);
        let (auth_callbacks, _) = broadcast::channel(AUTH_CALLBACK_CAPACITY);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            identity: Arc::new(identity),
            broker: Arc::new(broker),
            sessions: Arc::new(SessionRegistry::default()),
            badge: Arc::new(Badge::default()),
            lifecycle: Arc::new(lifecycle),
            auth_callbacks,
        }
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub(crate) fn settings_handle(&self) -> Arc<ArcSwap<Settings>> {
        Arc::clone(&self.settings)
    }

    pub(crate) fn store_settings(&self, settings: Settings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn broker(&self) -> &Arc<ResourceBroker> {
        &self.broker
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn badge(&self) -> &Badge {
        &self.badge
    }

    pub fn app_state(&self) -> AppState {
        *self.lifecycle.borrow()
    }

    pub fn subscribe_app_state(&self) -> watch::Receiver<AppState> {
        self.lifecycle.subscribe()
    }

    pub(crate) fn set_app_state(&self, state: AppState) {
        self.lifecycle.send_replace(state);
    }

    /// Receive sign-in callback URLs delivered through the URL scheme.
    pub fn subscribe_auth_callbacks(&self) -> broadcast::Receiver<Url> {
        self.auth_callbacks.subscribe()
    }

    /// Returns the number of listeners that received the URL.
    pub(crate) fn publish_auth_callback(&self, url: Url) -> usize {
        self.auth_callbacks.send(url).unwrap_or(0)
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("identity", &self.identity)
            .field("app_state", &self.app_state())
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}
