#![allow(clippy::unwrap_used)]
// Integration tests for `HassClient` using wiremock.

use secrecy::SecretString;
use serde_json::{Map, Value, json};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hacompanion_api::{ConnectionInfo, Error, HassClient, LocationUpdate, SensorState, TokenInfo};

// ── Helpers ─────────────────────────────────────────────────────────

const WEBHOOK_PATH: &str = "/api/webhook/hook-1";

async fn setup() -> (MockServer, HassClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = HassClient::with_client(
        reqwest::Client::new(),
        ConnectionInfo::new(base_url, "hook-1"),
        TokenInfo::new(SecretString::from("token-abc".to_string())),
    );
    (server, client)
}

fn data(pairs: &[(&str, &str)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), Value::String((*v).to_owned())))
        .collect()
}

// ── Webhook calls ───────────────────────────────────────────────────

#[tokio::test]
async fn test_fire_event_posts_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "fire_event",
            "data": { "event_type": "ios.custom", "event_data": { "room": "kitchen" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .fire_event("ios.custom", data(&[("room", "kitchen")]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_call_service_accepts_empty_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "call_service",
            "data": {
                "domain": "light",
                "service": "turn_on",
                "service_data": { "entity_id": "light.kitchen" }
            }
        })))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    client
        .call_service("light", "turn_on", data(&[("entity_id", "light.kitchen")]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_render_template_returns_rendered_string() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "render_template",
            "data": { "template": { "template": "{{ states('sun.sun') }}" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "template": "above_horizon"
        })))
        .mount(&server)
        .await;

    let rendered = client
        .render_template("{{ states('sun.sun') }}", Map::new())
        .await
        .unwrap();
    assert_eq!(rendered, "above_horizon");
}

#[tokio::test]
async fn test_render_template_surfaces_server_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "template": { "error": "UndefinedError: 'foo' is undefined" }
        })))
        .mount(&server)
        .await;

    let result = client.render_template("{{ foo.bar }}", Map::new()).await;
    assert!(
        matches!(result, Err(Error::Template { ref message }) if message.contains("undefined")),
        "expected Template error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_update_location_serializes_gps_pair() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "update_location",
            "data": { "gps": [52.37, 4.89], "gps_accuracy": 12.0, "battery": 81 }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client
        .update_location(LocationUpdate {
            gps: [52.37, 4.89],
            gps_accuracy: 12.0,
            battery: Some(81),
            speed: None,
            altitude: None,
            course: None,
            vertical_accuracy: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_sensor_states_skips_empty_batch() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    client.update_sensor_states(Vec::new()).await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());

    let state = SensorState {
        unique_id: "battery_level".into(),
        state: json!(80),
        sensor_type: "sensor".into(),
        icon: None,
        attributes: Map::new(),
    };
    assert!(client.update_sensor_states(vec![state]).await.is_err());
}

// ── Error classification ────────────────────────────────────────────

#[tokio::test]
async fn test_missing_webhook_maps_to_webhook_gone() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let result = client.fire_event("ios.test", Map::new()).await;
    match result {
        Err(ref e @ Error::WebhookGone { ref webhook_id }) => {
            assert_eq!(webhook_id, "hook-1");
            assert!(e.is_auth_invalid());
        }
        other => panic!("expected WebhookGone, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
        .mount(&server)
        .await;

    let err = client.get_config().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
}

// ── REST ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_status_sends_bearer_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .and(header("authorization", "Bearer token-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": "API running."
        })))
        .mount(&server)
        .await;

    let status = client.api_status().await.unwrap();
    assert_eq!(status.message, "API running.");
}

#[tokio::test]
async fn test_api_status_unauthorized() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.api_status().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}
