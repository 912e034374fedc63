// ── Recording doubles ──
//
// In-memory implementations of the collaborator traits. They record what
// was asked of them instead of talking to a server, which makes them the
// backing for dry runs as well as for tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;
use url::Url;

use crate::action::{ActionSource, ConnectReason, LocationTrigger, PushAction};
use crate::dispatch::{Telemetry, TelemetryEvent};
use crate::error::CoreError;
use crate::remote::RemoteApi;
use crate::session::TrackedSession;
use crate::shortcut::{ShortcutOutcome, ShortcutRunner};
use crate::surface::UiSurface;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── RecordingRemote ──────────────────────────────────────────────────

/// `RemoteApi` that logs and records every call.
#[derive(Debug)]
pub struct RecordingRemote {
    calls: Mutex<Vec<String>>,
    template_result: String,
    failure: Option<CoreError>,
    delay: Option<Duration>,
    instance: Option<Url>,
    session: Option<TrackedSession>,
}

impl Default for RecordingRemote {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            template_result: String::new(),
            failure: None,
            delay: None,
            instance: None,
            session: None,
        }
    }
}

impl RecordingRemote {
    pub fn with_template_result(mut self, rendered: impl Into<String>) -> Self {
        self.template_result = rendered.into();
        self
    }

    /// Fail every call with `error`.
    pub fn failing(mut self, error: CoreError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Take `delay` to answer every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Count every call as in flight on `session` while it runs.
    pub fn with_session(mut self, session: TrackedSession) -> Self {
        self.session = Some(session);
        self
    }

    /// Treat URLs on `instance` (and relative paths) as instance pages.
    pub fn with_instance(mut self, instance: Url) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Calls received so far, one line each.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    async fn record(&self, call: String) -> Result<(), CoreError> {
        info!(call, "remote call");
        let _ticket = self.session.as_ref().and_then(TrackedSession::begin);
        lock(&self.calls).push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn render_data(data: &Map<String, Value>) -> String {
    Value::Object(data.clone()).to_string()
}

#[async_trait]
impl RemoteApi for RecordingRemote {
    async fn connect(&self, reason: ConnectReason) -> Result<(), CoreError> {
        self.record(format!("connect {reason}")).await
    }

    async fn fire_event(&self, event_type: &str, data: Map<String, Value>) -> Result<(), CoreError> {
        self.record(format!("fire_event {event_type} {}", render_data(&data)))
            .await
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Map<String, Value>,
    ) -> Result<(), CoreError> {
        self.record(format!("call_service {domain}.{service} {}", render_data(&data)))
            .await
    }

    async fn render_template(
        &self,
        template: &str,
        _variables: Map<String, Value>,
    ) -> Result<String, CoreError> {
        self.record(format!("render_template {template}")).await?;
        Ok(self.template_result.clone())
    }

    async fn send_location(
        &self,
        trigger: LocationTrigger,
        _max_wait: Option<Duration>,
    ) -> Result<(), CoreError> {
        self.record(format!("send_location {trigger}")).await
    }

    async fn update_sensors(&self, trigger: LocationTrigger) -> Result<(), CoreError> {
        self.record(format!("update_sensors {trigger}")).await
    }

    async fn handle_action(
        &self,
        action_id: &str,
        action_name: &str,
        source: ActionSource,
    ) -> Result<(), CoreError> {
        self.record(format!("handle_action {action_id} {action_name} {source}"))
            .await
    }

    async fn handle_push_action(&self, action: &PushAction) -> Result<(), CoreError> {
        self.record(format!(
            "handle_push_action {} {}",
            action.identifier, action.category
        ))
        .await
    }

    fn webview_url(&self, raw: &str) -> Option<Url> {
        let instance = self.instance.as_ref()?;
        if raw.starts_with('/') {
            return instance.join(raw).ok();
        }
        let url = Url::parse(raw).ok()?;
        (url.host_str() == instance.host_str()).then_some(url)
    }
}

// ── RecordingTelemetry ───────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        lock(&self.events).clone()
    }
}

#[async_trait]
impl Telemetry for RecordingTelemetry {
    async fn emit(&self, event: &TelemetryEvent) -> Result<(), CoreError> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// ── RecordingSurface ─────────────────────────────────────────────────

/// What a `RecordingSurface` was asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Alert { title: String, message: String },
    OpenInline(Url),
    OpenExternal(Url),
    Confirm { title: String, message: String },
}

#[derive(Debug)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
    confirm_answer: bool,
}

impl RecordingSurface {
    /// A surface that answers every confirmation with `confirm_answer`.
    pub fn new(confirm_answer: bool) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            confirm_answer,
        }
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        lock(&self.events).clone()
    }
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl UiSurface for RecordingSurface {
    fn present_alert(&self, title: &str, message: &str) {
        lock(&self.events).push(SurfaceEvent::Alert {
            title: title.to_owned(),
            message: message.to_owned(),
        });
    }

    fn open_inline(&self, url: &Url) {
        lock(&self.events).push(SurfaceEvent::OpenInline(url.clone()));
    }

    fn open_external(&self, url: &Url) {
        lock(&self.events).push(SurfaceEvent::OpenExternal(url.clone()));
    }

    async fn confirm(&self, title: &str, message: &str) -> bool {
        lock(&self.events).push(SurfaceEvent::Confirm {
            title: title.to_owned(),
            message: message.to_owned(),
        });
        self.confirm_answer
    }
}

// ── ScriptedShortcuts ────────────────────────────────────────────────

/// Shortcut runner with canned outcomes per shortcut name.
#[derive(Debug, Default)]
pub struct ScriptedShortcuts {
    outcomes: BTreeMap<String, ShortcutOutcome>,
    runs: Mutex<Vec<String>>,
}

impl ScriptedShortcuts {
    pub fn with(mut self, name: impl Into<String>, outcome: ShortcutOutcome) -> Self {
        self.outcomes.insert(name.into(), outcome);
        self
    }

    pub fn runs(&self) -> Vec<String> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl ShortcutRunner for ScriptedShortcuts {
    async fn run(
        &self,
        name: &str,
        _parameters: &BTreeMap<String, String>,
    ) -> Result<ShortcutOutcome, CoreError> {
        lock(&self.runs).push(name.to_owned());
        self.outcomes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::OperationFailed {
                message: format!("no shortcut named '{name}'"),
            })
    }
}

#[cfg(test)]
pub(crate) fn test_identity() -> crate::context::DeviceIdentity {
    crate::context::DeviceIdentity {
        permanent_id: "perm-1".into(),
        name: "Test Phone".into(),
        device_id: "device-1".into(),
    }
}
