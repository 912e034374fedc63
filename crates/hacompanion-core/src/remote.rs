// ── Remote API seam ──
//
// `RemoteApi` is the set of remote operations actions are built from. The
// production implementation, `HassRemote`, maps them onto webhook calls;
// device-local inputs (location fix, sensor readings) come from a
// `DeviceProbe`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hacompanion_api::{HassClient, LocationUpdate, SensorState};
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use url::Url;

use crate::action::{ActionSource, ConnectReason, LocationTrigger, PushAction};
use crate::context::DeviceIdentity;
use crate::error::CoreError;
use crate::session::{SessionTicket, TrackedSession};

/// Remote operations available once authenticated.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Probe the server and refresh registration state.
    async fn connect(&self, reason: ConnectReason) -> Result<(), CoreError>;

    async fn fire_event(&self, event_type: &str, data: Map<String, Value>) -> Result<(), CoreError>;

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Map<String, Value>,
    ) -> Result<(), CoreError>;

    async fn render_template(
        &self,
        template: &str,
        variables: Map<String, Value>,
    ) -> Result<String, CoreError>;

    /// Acquire a location fix (waiting at most `max_wait`) and report it.
    async fn send_location(
        &self,
        trigger: LocationTrigger,
        max_wait: Option<Duration>,
    ) -> Result<(), CoreError>;

    async fn update_sensors(&self, trigger: LocationTrigger) -> Result<(), CoreError>;

    async fn handle_action(
        &self,
        action_id: &str,
        action_name: &str,
        source: ActionSource,
    ) -> Result<(), CoreError>;

    async fn handle_push_action(&self, action: &PushAction) -> Result<(), CoreError>;

    /// Resolve `raw` to a page of the connected instance, if it is one.
    fn webview_url(&self, _raw: &str) -> Option<Url> {
        None
    }
}

// ── Device probe ─────────────────────────────────────────────────────

/// Device-local readings the remote operations report.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn location(&self, max_wait: Option<Duration>) -> Result<LocationUpdate, CoreError>;

    async fn sensor_states(&self) -> Result<Vec<SensorState>, CoreError>;
}

/// A probe with a fixed (optional) position and no sensors of its own.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    location: Option<LocationUpdate>,
}

impl StaticProbe {
    pub fn new(location: Option<LocationUpdate>) -> Self {
        Self { location }
    }
}

#[async_trait]
impl DeviceProbe for StaticProbe {
    async fn location(&self, _max_wait: Option<Duration>) -> Result<LocationUpdate, CoreError> {
        self.location.clone().ok_or_else(|| CoreError::OperationFailed {
            message: "no location fix available".into(),
        })
    }

    async fn sensor_states(&self) -> Result<Vec<SensorState>, CoreError> {
        Ok(Vec::new())
    }
}

// ── HassRemote ───────────────────────────────────────────────────────

const ACTION_FIRED_EVENT: &str = "ios.action_fired";
const NOTIFICATION_ACTION_EVENT: &str = "ios.notification_action_fired";
const LAST_TRIGGER_SENSOR: &str = "last_update_trigger";

/// `RemoteApi` backed by the mobile-app webhook.
///
/// With a session attached, every call counts as in flight on it until the
/// server has answered, so a session completion waits for those calls.
pub struct HassRemote {
    client: HassClient,
    probe: Arc<dyn DeviceProbe>,
    identity: DeviceIdentity,
    session: Option<TrackedSession>,
}

impl HassRemote {
    pub fn new(client: HassClient, probe: Arc<dyn DeviceProbe>, identity: DeviceIdentity) -> Self {
        Self {
            client,
            probe,
            identity,
            session: None,
        }
    }

    pub fn with_session(mut self, session: TrackedSession) -> Self {
        self.session = Some(session);
        self
    }

    fn ticket(&self) -> Option<SessionTicket> {
        self.session.as_ref().and_then(TrackedSession::begin)
    }

    pub fn client(&self) -> &HassClient {
        &self.client
    }

    fn with_identity(&self, mut data: Map<String, Value>) -> Map<String, Value> {
        data.extend(self.identity.event_fields());
        data
    }
}

#[async_trait]
impl RemoteApi for HassRemote {
    async fn connect(&self, reason: ConnectReason) -> Result<(), CoreError> {
        let _ticket = self.ticket();
        let config = self.client.get_config().await?;
        info!(
            %reason,
            location = config.location_name.as_deref().unwrap_or("unknown"),
            version = config.version.as_deref().unwrap_or("unknown"),
            "connected"
        );
        let trigger = match reason {
            ConnectReason::Periodic => LocationTrigger::Periodic,
            ConnectReason::Cold | ConnectReason::Warm => LocationTrigger::Manual,
        };
        self.update_sensors(trigger).await
    }

    async fn fire_event(&self, event_type: &str, data: Map<String, Value>) -> Result<(), CoreError> {
        let _ticket = self.ticket();
        Ok(self.client.fire_event(event_type, data).await?)
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Map<String, Value>,
    ) -> Result<(), CoreError> {
        let _ticket = self.ticket();
        Ok(self.client.call_service(domain, service, data).await?)
    }

    async fn render_template(
        &self,
        template: &str,
        variables: Map<String, Value>,
    ) -> Result<String, CoreError> {
        let _ticket = self.ticket();
        Ok(self.client.render_template(template, variables).await?)
    }

    async fn send_location(
        &self,
        trigger: LocationTrigger,
        max_wait: Option<Duration>,
    ) -> Result<(), CoreError> {
        let _ticket = self.ticket();
        let fix = self.probe.location(max_wait).await?;
        debug!(%trigger, accuracy = fix.gps_accuracy, "sending location");
        self.client.update_location(fix).await?;
        self.update_sensors(trigger).await
    }

    async fn update_sensors(&self, trigger: LocationTrigger) -> Result<(), CoreError> {
        let _ticket = self.ticket();
        let mut states = self.probe.sensor_states().await?;
        states.push(SensorState {
            unique_id: LAST_TRIGGER_SENSOR.into(),
            state: Value::String(trigger.to_string()),
            sensor_type: "sensor".into(),
            icon: Some("mdi:cellphone-wireless".into()),
            attributes: Map::new(),
        });
        Ok(self.client.update_sensor_states(states).await?)
    }

    async fn handle_action(
        &self,
        action_id: &str,
        action_name: &str,
        source: ActionSource,
    ) -> Result<(), CoreError> {
        let mut data = Map::new();
        data.insert("actionName".into(), json!(action_name));
        data.insert("actionID".into(), json!(action_id));
        data.insert("triggerSource".into(), json!(source.to_string()));
        self.fire_event(ACTION_FIRED_EVENT, self.with_identity(data))
            .await
    }

    async fn handle_push_action(&self, action: &PushAction) -> Result<(), CoreError> {
        let mut data = Map::new();
        data.insert("actionName".into(), json!(action.identifier));
        data.insert("categoryName".into(), json!(action.category));
        if let Some(action_data) = action
            .payload
            .get("homeassistant")
            .and_then(|ha| ha.get("action_data"))
            .or_else(|| action.payload.get("action_data"))
        {
            data.insert("action_data".into(), action_data.clone());
        }
        if let Some(input) = &action.user_input {
            data.insert("response_info".into(), json!(input));
        }
        self.fire_event(NOTIFICATION_ACTION_EVENT, self.with_identity(data))
            .await
    }

    fn webview_url(&self, raw: &str) -> Option<Url> {
        self.client.connection().webview_url(raw)
    }
}

impl std::fmt::Debug for HassRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassRemote")
            .field("client", &self.client)
            .field("identity", &self.identity)
            .field("session", &self.session.as_ref().map(TrackedSession::identifier))
            .finish_non_exhaustive()
    }
}
