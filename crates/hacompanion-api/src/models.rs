// ── Webhook wire types ──
//
// The mobile-app webhook takes `{"type": ..., "data": ...}` envelopes.
// Each request kind gets a strongly-typed payload; responses are mostly
// empty objects except for templates and config.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single webhook call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WebhookRequest {
    FireEvent {
        event_type: String,
        event_data: Map<String, Value>,
    },
    CallService {
        domain: String,
        service: String,
        service_data: Map<String, Value>,
    },
    /// Keyed templates; the response echoes each key with its rendering.
    RenderTemplate(BTreeMap<String, TemplateRequest>),
    UpdateLocation(LocationUpdate),
    UpdateSensorStates(Vec<SensorState>),
    GetConfig,
}

impl WebhookRequest {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FireEvent { .. } => "fire_event",
            Self::CallService { .. } => "call_service",
            Self::RenderTemplate(_) => "render_template",
            Self::UpdateLocation(_) => "update_location",
            Self::UpdateSensorStates(_) => "update_sensor_states",
            Self::GetConfig => "get_config",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRequest {
    pub template: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

/// Device location as reported to the `update_location` webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// `[latitude, longitude]`
    pub gps: [f64; 2],
    pub gps_accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy: Option<f64>,
}

/// One sensor reading for `update_sensor_states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    pub unique_id: String,
    pub state: Value,
    #[serde(rename = "type", default = "default_sensor_type")]
    pub sensor_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

fn default_sensor_type() -> String {
    "sensor".into()
}

/// Subset of the `get_config` response the app cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Response of `GET /api/`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiStatus {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn fire_event_envelope_shape() {
        let mut data = Map::new();
        data.insert("entity_id".into(), json!("light.kitchen"));
        let req = WebhookRequest::FireEvent {
            event_type: "ios.test".into(),
            event_data: data,
        };
        assert_eq!(
            serde_json::to_value(&req).expect("serializable"),
            json!({
                "type": "fire_event",
                "data": { "event_type": "ios.test", "event_data": { "entity_id": "light.kitchen" } }
            })
        );
    }

    #[test]
    fn get_config_has_no_data() {
        let value = serde_json::to_value(WebhookRequest::GetConfig).expect("serializable");
        assert_eq!(value, json!({ "type": "get_config" }));
    }

    #[test]
    fn sensor_type_defaults_to_sensor() {
        let state: SensorState =
            serde_json::from_value(json!({ "unique_id": "battery_level", "state": 80 }))
                .expect("valid sensor");
        assert_eq!(state.sensor_type, "sensor");
    }
}
