#![allow(clippy::unwrap_used)]
// `HassRemote` against a mock Home Assistant webhook.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hacompanion_api::{ConnectionInfo, HassClient, LocationUpdate, TokenInfo, TransportConfig};
use hacompanion_core::{
    ActionSource, AppContext, Companion, Completion, ConnectReason, DeviceIdentity, HassRemote,
    LocationTrigger, ProcessShortcutRunner, RemoteApi, Settings, StaticProbe, TimedHost,
    TrackedSession, webhook_session,
};

// ── Helpers ─────────────────────────────────────────────────────────

const WEBHOOK_PATH: &str = "/api/webhook/hook-1";

fn identity() -> DeviceIdentity {
    DeviceIdentity {
        permanent_id: "perm-1".into(),
        name: "Hallway Phone".into(),
        device_id: "device-1".into(),
    }
}

async fn setup(location: Option<LocationUpdate>) -> (MockServer, HassRemote) {
    let server = MockServer::start().await;
    let client = HassClient::new(
        ConnectionInfo::new(Url::parse(&server.uri()).unwrap(), "hook-1"),
        TokenInfo::new(SecretString::from("token-abc".to_string())),
        &TransportConfig::default(),
    )
    .unwrap();
    let remote = HassRemote::new(client, Arc::new(StaticProbe::new(location)), identity());
    (server, remote)
}

fn trigger_sensor(trigger: &str) -> serde_json::Value {
    json!({
        "type": "update_sensor_states",
        "data": [{
            "unique_id": "last_update_trigger",
            "state": trigger,
            "type": "sensor",
            "icon": "mdi:cellphone-wireless"
        }]
    })
}

// ── Remote operations ───────────────────────────────────────────────

#[tokio::test]
async fn test_connect_probes_config_then_updates_sensors() {
    let (server, remote) = setup(None).await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({ "type": "get_config" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "location_name": "Home", "version": "2024.10.1" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(trigger_sensor("Periodic")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    remote.connect(ConnectReason::Periodic).await.unwrap();
}

#[tokio::test]
async fn test_handle_action_fires_event_with_identity() {
    let (server, remote) = setup(None).await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "fire_event",
            "data": {
                "event_type": "ios.action_fired",
                "event_data": {
                    "actionName": "Lights",
                    "actionID": "a1",
                    "triggerSource": "Watch",
                    "sourceDevicePermanentID": "perm-1",
                    "sourceDeviceName": "Hallway Phone",
                    "sourceDeviceID": "device-1"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    remote
        .handle_action("a1", "Lights", ActionSource::Watch)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_location_posts_fix_and_trigger() {
    let fix = LocationUpdate {
        gps: [52.37, 4.89],
        gps_accuracy: 12.0,
        battery: Some(80),
        speed: None,
        altitude: None,
        course: None,
        vertical_accuracy: None,
    };
    let (server, remote) = setup(Some(fix)).await;

    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(json!({
            "type": "update_location",
            "data": { "gps": [52.37, 4.89], "gps_accuracy": 12.0, "battery": 80 }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .and(body_json(trigger_sensor("Push Notification")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    remote
        .send_location(LocationTrigger::PushNotification, Some(Duration::from_secs(5)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_location_without_fix_fails_before_network() {
    let (server, remote) = setup(None).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert!(
        remote
            .send_location(LocationTrigger::Manual, None)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_webview_url_stays_on_instance() {
    let (server, remote) = setup(None).await;
    let inline = remote.webview_url("/lovelace/0").unwrap();
    assert_eq!(inline.as_str(), format!("{}/lovelace/0", server.uri()));
    assert!(remote.webview_url("https://example.com/").is_none());
}

// ── Through the companion ───────────────────────────────────────────

#[tokio::test]
async fn test_removed_webhook_signs_out() {
    let (server, remote) = setup(None).await;
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let companion = Companion::new(
        AppContext::new(Settings::default(), identity()),
        Arc::new(TimedHost::new(Duration::from_secs(30))),
        Arc::new(ProcessShortcutRunner::new("shortcuts")),
    );
    companion.sign_in(Arc::new(remote));

    let err = companion.did_finish_launching().await.unwrap_err();
    assert!(err.requires_reauth());
    assert!(!companion.context().broker().is_authenticated());
}

#[tokio::test]
async fn test_session_completion_waits_for_webhook_call() {
    let (server, remote) = setup(None).await;
    Mock::given(method("POST"))
        .and(path(WEBHOOK_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let companion = Companion::new(
        AppContext::new(
            Settings {
                remote_telemetry: false,
                ..Settings::default()
            },
            identity(),
        ),
        Arc::new(TimedHost::new(Duration::from_secs(30))),
        Arc::new(ProcessShortcutRunner::new("shortcuts")),
    );
    let sessions = Arc::clone(companion.context().sessions());
    let session = TrackedSession::register(Arc::clone(&sessions), webhook_session("hook-1"));
    companion.sign_in(Arc::new(remote.with_session(session)));

    let call = tokio::spawn({
        let companion = companion.clone();
        async move {
            companion
                .open_url(Url::parse("homeassistant://fire_event/door_opened").unwrap())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sessions.in_flight("hacompanion.webhook.hook-1"), Some(1));

    let (completion, rx) = Completion::channel(());
    companion
        .handle_background_session("hacompanion.webhook.hook-1".into(), completion)
        .await
        .unwrap();
    rx.await.unwrap();

    assert_eq!(sessions.in_flight("hacompanion.webhook.hook-1"), Some(0));
    assert!(call.await.unwrap().is_ok());
}
