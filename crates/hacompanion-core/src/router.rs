// ── Trigger router ──
//
// Pure classification: turns an `ExternalTrigger` into a `Route` without
// touching the network. Settings are read once per classification, so a
// concurrent settings change never splits a decision.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::action::{
    ActionRequest, ActionSource, LocationTrigger, PushAction, XCallbackError, XCallbackUrls,
};
use crate::context::Settings;
use crate::envelope::FetchResult;
use crate::session::SessionRegistry;
use crate::trigger::{
    AppShortcut, ExternalTrigger, IntentRequest, NotificationResponse, PushPayload,
    TriggerSource, UniversalLink, UrlInvocation, WatchMessage,
};

// ── Constants ────────────────────────────────────────────────────────

const COMMAND_REQUEST_LOCATION: &str = "request_location_update";
const COMMAND_CLEAR_BADGE: &str = "clear_badge";

const HOST_X_CALLBACK: &str = "x-callback-url";
const HOST_CALL_SERVICE: &str = "call_service";
const HOST_FIRE_EVENT: &str = "fire_event";
const HOST_SEND_LOCATION: &str = "send_location";
const HOST_AUTH_CALLBACK: &str = "auth-callback";

const SHORTCUT_SEND_LOCATION: &str = "sendLocation";
const WATCH_ACTION_ROW_PRESSED: &str = "ActionRowPressed";

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("no handler for URL host '{0}'")]
    Unroutable(String),

    #[error("malformed {trigger} payload: {reason}")]
    MalformedPayload { trigger: &'static str, reason: String },

    #[error("no live background session '{0}'")]
    UnknownSession(String),

    #[error("no action configured for shortcut item '{0}'")]
    NoSuchAction(String),
}

impl RouterError {
    /// The trigger kind the error refers to.
    pub fn trigger(&self) -> &'static str {
        match self {
            Self::Unroutable(_) => "url",
            Self::MalformedPayload { trigger, .. } => *trigger,
            Self::UnknownSession(_) => "background_session",
            Self::NoSuchAction(_) => "app_shortcut",
        }
    }

    fn malformed(trigger: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            trigger,
            reason: reason.into(),
        }
    }
}

// ── Routes ───────────────────────────────────────────────────────────

/// Follow-up work for a notification the user acted on.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPlan {
    /// Shortcut requested by the payload, run alongside everything else.
    pub shortcut: Option<ActionRequest>,
    /// URL to open for the chosen action.
    pub open_url: Option<String>,
    /// The response itself, reported to the server.
    pub push_action: ActionRequest,
}

/// What to do about one trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Dispatch {
        request: ActionRequest,
        source: TriggerSource,
    },
    /// Run the request and answer the x-callback caller.
    XCallback {
        request: ActionRequest,
        callbacks: XCallbackUrls,
    },
    /// Answer the x-callback caller with an error without running anything.
    XCallbackRejected {
        error: XCallbackError,
        callbacks: XCallbackUrls,
    },
    ClearBadge,
    /// Nothing to run; complete immediately with this result.
    Complete(FetchResult),
    AuthCallback(Url),
    DrainSession { identifier: String },
    /// An app URL carried by a universal link.
    OpenUrl(Url),
    Notification(NotificationPlan),
    /// Not handled, and not an error.
    Declined,
}

// ── Router ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TriggerRouter {
    settings: Arc<ArcSwap<Settings>>,
    sessions: Arc<SessionRegistry>,
}

impl TriggerRouter {
    pub fn new(settings: Arc<ArcSwap<Settings>>, sessions: Arc<SessionRegistry>) -> Self {
        Self { settings, sessions }
    }

    pub fn classify(&self, trigger: ExternalTrigger) -> Result<Route, RouterError> {
        let kind = trigger.kind();
        let route = match trigger {
            ExternalTrigger::PushNotification(payload) => self.push(&payload),
            ExternalTrigger::UrlScheme(invocation) => Self::url(invocation),
            ExternalTrigger::AppShortcut(item) => Self::app_shortcut(item),
            ExternalTrigger::BackgroundFetchTick => Ok(self.background_fetch()),
            ExternalTrigger::BackgroundSessionCompletion { identifier } => {
                self.background_session(identifier)
            }
            ExternalTrigger::VoiceShortcutRun(intent) => Self::intent(intent),
            ExternalTrigger::WatchMessage(message) => Self::watch(message),
            ExternalTrigger::UniversalLink(link) => Ok(Self::universal_link(&link)),
            ExternalTrigger::NotificationResponse(response) => {
                Ok(Self::notification_response(response))
            }
        };
        match &route {
            Ok(route) => debug!(kind, ?route, "classified trigger"),
            Err(e) => warn!(kind, error = %e, "unroutable trigger"),
        }
        route
    }

    // ── Push ─────────────────────────────────────────────────────────

    fn push(&self, payload: &PushPayload) -> Result<Route, RouterError> {
        let command = payload
            .command()
            .ok_or_else(|| RouterError::malformed("push", "missing homeassistant.command"))?;

        match command {
            COMMAND_REQUEST_LOCATION => {
                if self.settings.load().location_update_on_notification {
                    Ok(Route::Dispatch {
                        request: ActionRequest::SendLocation {
                            trigger: LocationTrigger::PushNotification,
                        },
                        source: TriggerSource::PushNotification,
                    })
                } else {
                    debug!("location updates on notification are disabled");
                    Ok(Route::Complete(FetchResult::NoData))
                }
            }
            COMMAND_CLEAR_BADGE => Ok(Route::ClearBadge),
            other => {
                warn!(command = other, "unknown push command");
                Ok(Route::Complete(FetchResult::NoData))
            }
        }
    }

    // ── URL scheme ───────────────────────────────────────────────────

    fn url(invocation: UrlInvocation) -> Result<Route, RouterError> {
        let source = TriggerSource::UrlScheme;
        let host = invocation.host.clone();
        match host.as_str() {
            HOST_X_CALLBACK => Ok(Self::x_callback(invocation)),
            HOST_CALL_SERVICE => {
                let service = invocation
                    .first_path_component()
                    .ok_or_else(|| RouterError::malformed("url", "call_service needs a service"))?;
                let (domain, service) = split_service(service)
                    .ok_or_else(|| RouterError::malformed("url", format!("invalid service '{service}'")))?;
                Ok(Route::Dispatch {
                    request: ActionRequest::CallService {
                        domain,
                        service,
                        data: string_map(invocation.query),
                    },
                    source,
                })
            }
            HOST_FIRE_EVENT => {
                let name = invocation
                    .first_path_component()
                    .ok_or_else(|| RouterError::malformed("url", "fire_event needs an event name"))?
                    .to_owned();
                Ok(Route::Dispatch {
                    request: ActionRequest::FireEvent {
                        name,
                        data: string_map(invocation.query),
                    },
                    source,
                })
            }
            HOST_SEND_LOCATION => Ok(Route::Dispatch {
                request: ActionRequest::SendLocation {
                    trigger: LocationTrigger::UrlScheme,
                },
                source,
            }),
            HOST_AUTH_CALLBACK => Ok(Route::AuthCallback(invocation.url)),
            other => Err(RouterError::Unroutable(other.to_owned())),
        }
    }

    fn x_callback(invocation: UrlInvocation) -> Route {
        let mut query = invocation.query;
        let callbacks = XCallbackUrls::extract(&mut query);
        let action = invocation.path_components.first().map(String::as_str);

        let request = match action {
            Some("fire_event") => match query.remove("eventName") {
                Some(name) if !name.is_empty() => Ok(ActionRequest::FireEvent {
                    name,
                    data: string_map(query),
                }),
                _ => Err(XCallbackError::EventNameMissing),
            },
            Some("call_service") => match query.remove("service").as_deref().and_then(split_service) {
                Some((domain, service)) => Ok(ActionRequest::CallService {
                    domain,
                    service,
                    data: string_map(query),
                }),
                None => Err(XCallbackError::ServiceMissing),
            },
            Some("send_location") => Ok(ActionRequest::SendLocation {
                trigger: LocationTrigger::XCallbackUrl,
            }),
            Some("render_template") => match query.remove("template") {
                Some(template) if !template.is_empty() => Ok(ActionRequest::RenderTemplate {
                    template,
                    variables: string_map(query),
                }),
                _ => Err(XCallbackError::TemplateMissing),
            },
            other => {
                warn!(action = ?other, "unknown x-callback-url action");
                Err(XCallbackError::General)
            }
        };

        match request {
            Ok(request) => Route::XCallback { request, callbacks },
            Err(error) => Route::XCallbackRejected { error, callbacks },
        }
    }

    // ── App shortcuts ────────────────────────────────────────────────

    fn app_shortcut(item: AppShortcut) -> Result<Route, RouterError> {
        let source = TriggerSource::AppShortcut;
        if item.shortcut_type == SHORTCUT_SEND_LOCATION {
            return Ok(Route::Dispatch {
                request: ActionRequest::SendLocation {
                    trigger: LocationTrigger::AppShortcut,
                },
                source,
            });
        }
        let Some(name) = item.user_info.get("name").and_then(Value::as_str) else {
            return Err(RouterError::NoSuchAction(item.shortcut_type));
        };
        Ok(Route::Dispatch {
            request: ActionRequest::HandleAction {
                action_name: name.to_owned(),
                action_id: item.shortcut_type,
                source: ActionSource::AppShortcut,
            },
            source,
        })
    }

    // ── Background ───────────────────────────────────────────────────

    fn background_fetch(&self) -> Route {
        let settings = self.settings.load();
        let trigger = LocationTrigger::BackgroundFetch;
        let request = if settings.location_enabled && settings.location_update_on_background_fetch
        {
            ActionRequest::SendLocation { trigger }
        } else {
            ActionRequest::UpdateSensors { trigger }
        };
        Route::Dispatch {
            request,
            source: TriggerSource::BackgroundFetch,
        }
    }

    fn background_session(&self, identifier: String) -> Result<Route, RouterError> {
        if self.sessions.is_live(&identifier) {
            Ok(Route::DrainSession { identifier })
        } else {
            Err(RouterError::UnknownSession(identifier))
        }
    }

    // ── Voice intents ────────────────────────────────────────────────

    fn intent(intent: IntentRequest) -> Result<Route, RouterError> {
        let request = match intent {
            IntentRequest::FireEvent {
                event_name,
                payload,
            } => ActionRequest::FireEvent {
                name: non_empty(event_name)
                    .ok_or_else(|| RouterError::malformed("intent", "event name is required"))?,
                data: json_object(payload.as_deref())?,
            },
            IntentRequest::CallService { service, payload } => {
                let service = non_empty(service)
                    .ok_or_else(|| RouterError::malformed("intent", "service is required"))?;
                let (domain, service) = split_service(&service).ok_or_else(|| {
                    RouterError::malformed("intent", format!("invalid service '{service}'"))
                })?;
                ActionRequest::CallService {
                    domain,
                    service,
                    data: json_object(payload.as_deref())?,
                }
            }
            IntentRequest::SendLocation => ActionRequest::SendLocation {
                trigger: LocationTrigger::Siri,
            },
            IntentRequest::RenderTemplate { template } => ActionRequest::RenderTemplate {
                template: non_empty(template)
                    .ok_or_else(|| RouterError::malformed("intent", "template is required"))?,
                variables: Map::new(),
            },
        };
        Ok(Route::Dispatch {
            request,
            source: TriggerSource::VoiceShortcut,
        })
    }

    // ── Watch ────────────────────────────────────────────────────────

    fn watch(message: WatchMessage) -> Result<Route, RouterError> {
        if message.identifier != WATCH_ACTION_ROW_PRESSED {
            debug!(identifier = message.identifier, "ignoring watch message");
            return Ok(Route::Declined);
        }
        let field = |key: &str| {
            message
                .content
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| RouterError::malformed("watch", format!("missing {key}")))
        };
        Ok(Route::Dispatch {
            request: ActionRequest::HandleAction {
                action_name: field("ActionName")?,
                action_id: field("ActionID")?,
                source: ActionSource::Watch,
            },
            source: TriggerSource::Watch,
        })
    }

    // ── Links and notifications ──────────────────────────────────────

    fn universal_link(link: &UniversalLink) -> Route {
        link.embedded_url().map_or(Route::Declined, Route::OpenUrl)
    }

    fn notification_response(response: NotificationResponse) -> Route {
        if response.is_dismissal() {
            debug!("ignoring dismiss action for notification");
            return Route::Declined;
        }

        let shortcut = response.payload.shortcut.as_ref().and_then(|dict| {
            let name = dict.get("name")?.clone();
            Some(ActionRequest::RunShortcut {
                name,
                parameters: dict
                    .iter()
                    .filter(|(key, _)| key.as_str() != "name")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
        });

        let open_url = response.payload.url.as_ref().and_then(|url| {
            let resolved = url.for_action(&response.action_identifier);
            if resolved.is_none() {
                warn!(
                    action = response.action_identifier,
                    "no URL for notification action"
                );
            }
            resolved.map(str::to_owned)
        });

        let payload = serde_json::to_value(&response.payload).unwrap_or(Value::Null);
        Route::Notification(NotificationPlan {
            shortcut,
            open_url,
            push_action: ActionRequest::HandlePushAction(PushAction {
                identifier: response.action_identifier,
                category: response.category,
                payload,
                user_input: response.user_text,
            }),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// `light.turn_on` → `("light", "turn_on")`.
fn split_service(full: &str) -> Option<(String, String)> {
    let (domain, service) = full.split_once('.')?;
    if domain.is_empty() || service.is_empty() {
        return None;
    }
    Some((domain.to_owned(), service.to_owned()))
}

fn string_map(query: BTreeMap<String, String>) -> Map<String, Value> {
    query.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse an optional JSON object string. Absent or blank means empty.
fn json_object(raw: Option<&str>) -> Result<Map<String, Value>, RouterError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RouterError::malformed("intent", "payload must be a JSON object")),
            Err(e) => Err(RouterError::malformed("intent", format!("invalid payload: {e}"))),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::trigger::DEFAULT_ACTION_IDENTIFIER;

    fn router_with(settings: Settings) -> TriggerRouter {
        TriggerRouter::new(
            Arc::new(ArcSwap::from_pointee(settings)),
            Arc::new(SessionRegistry::default()),
        )
    }

    fn router() -> TriggerRouter {
        router_with(Settings::default())
    }

    fn url(raw: &str) -> ExternalTrigger {
        ExternalTrigger::UrlScheme(UrlInvocation::parse(raw).unwrap())
    }

    fn push(value: Value) -> ExternalTrigger {
        ExternalTrigger::PushNotification(PushPayload::from_value(value).unwrap())
    }

    #[test]
    fn call_service_url_dispatches_with_query_data() {
        let route = router()
            .classify(url(
                "homeassistant://call_service/light.turn_on?entity_id=light.kitchen",
            ))
            .unwrap();
        assert_eq!(
            route,
            Route::Dispatch {
                request: ActionRequest::CallService {
                    domain: "light".into(),
                    service: "turn_on".into(),
                    data: string_map(BTreeMap::from([(
                        "entity_id".to_owned(),
                        "light.kitchen".to_owned()
                    )])),
                },
                source: TriggerSource::UrlScheme,
            }
        );
    }

    #[test]
    fn unknown_host_is_unroutable() {
        let err = router().classify(url("homeassistant://teleport/now")).unwrap_err();
        assert_eq!(err, RouterError::Unroutable("teleport".into()));
    }

    #[test]
    fn x_callback_fire_event_without_name_is_rejected() {
        let route = router()
            .classify(url(
                "homeassistant://x-callback-url/fire_event?x-error=shortcuts://err",
            ))
            .unwrap();
        match route {
            Route::XCallbackRejected { error, callbacks } => {
                assert_eq!(error, XCallbackError::EventNameMissing);
                assert_eq!(callbacks.error.unwrap().as_str(), "shortcuts://err");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn x_callback_render_template_keeps_variables() {
        let route = router()
            .classify(url(
                "homeassistant://x-callback-url/render_template?template=%7B%7B%20x%20%7D%7D&x=1&x-success=a://b",
            ))
            .unwrap();
        match route {
            Route::XCallback { request, callbacks } => {
                assert_eq!(
                    request,
                    ActionRequest::RenderTemplate {
                        template: "{{ x }}".into(),
                        variables: string_map(BTreeMap::from([("x".to_owned(), "1".to_owned())])),
                    }
                );
                assert!(callbacks.success.is_some());
            }
            other => panic!("expected x-callback route, got {other:?}"),
        }
    }

    #[test]
    fn push_location_request_respects_setting() {
        let route = router()
            .classify(push(json!({ "homeassistant": { "command": "request_location_update" } })))
            .unwrap();
        assert!(matches!(
            route,
            Route::Dispatch {
                request: ActionRequest::SendLocation {
                    trigger: LocationTrigger::PushNotification
                },
                ..
            }
        ));

        let disabled = router_with(Settings {
            location_update_on_notification: false,
            ..Settings::default()
        });
        let route = disabled
            .classify(push(json!({ "homeassistant": { "command": "request_location_update" } })))
            .unwrap();
        assert_eq!(route, Route::Complete(FetchResult::NoData));
    }

    #[test]
    fn push_commands() {
        let route = router()
            .classify(push(json!({ "homeassistant": { "command": "clear_badge" } })))
            .unwrap();
        assert_eq!(route, Route::ClearBadge);

        let route = router()
            .classify(push(json!({ "homeassistant": { "command": "self_destruct" } })))
            .unwrap();
        assert_eq!(route, Route::Complete(FetchResult::NoData));

        let err = router().classify(push(json!({ "aps": {} }))).unwrap_err();
        assert_eq!(err.trigger(), "push");
    }

    #[test]
    fn push_command_survives_mistyped_fields() {
        let route = router()
            .classify(push(json!({
                "homeassistant": { "command": "clear_badge" },
                "shortcut": { "name": "x", "count": 3 },
                "aps": { "badge": -1 }
            })))
            .unwrap();
        assert_eq!(route, Route::ClearBadge);
    }

    #[test]
    fn background_fetch_falls_back_to_sensors() {
        let route = router_with(Settings {
            location_enabled: false,
            ..Settings::default()
        })
        .classify(ExternalTrigger::BackgroundFetchTick)
        .unwrap();
        assert_eq!(
            route,
            Route::Dispatch {
                request: ActionRequest::UpdateSensors {
                    trigger: LocationTrigger::BackgroundFetch
                },
                source: TriggerSource::BackgroundFetch,
            }
        );
    }

    #[test]
    fn app_shortcut_routes() {
        let route = router()
            .classify(ExternalTrigger::AppShortcut(AppShortcut {
                shortcut_type: "action-42".into(),
                user_info: json!({ "name": "Good night" }).as_object().unwrap().clone(),
            }))
            .unwrap();
        assert_eq!(
            route,
            Route::Dispatch {
                request: ActionRequest::HandleAction {
                    action_id: "action-42".into(),
                    action_name: "Good night".into(),
                    source: ActionSource::AppShortcut,
                },
                source: TriggerSource::AppShortcut,
            }
        );

        let err = router()
            .classify(ExternalTrigger::AppShortcut(AppShortcut {
                shortcut_type: "action-43".into(),
                user_info: Map::new(),
            }))
            .unwrap_err();
        assert_eq!(err, RouterError::NoSuchAction("action-43".into()));
    }

    #[test]
    fn unknown_background_session_is_an_error() {
        let err = router()
            .classify(ExternalTrigger::BackgroundSessionCompletion {
                identifier: "gone".into(),
            })
            .unwrap_err();
        assert_eq!(err, RouterError::UnknownSession("gone".into()));
    }

    #[test]
    fn intent_requires_template() {
        let err = router()
            .classify(ExternalTrigger::VoiceShortcutRun(
                IntentRequest::RenderTemplate { template: None },
            ))
            .unwrap_err();
        assert_eq!(err.trigger(), "intent");

        let err = router()
            .classify(ExternalTrigger::VoiceShortcutRun(IntentRequest::FireEvent {
                event_name: Some("custom".into()),
                payload: Some("[1, 2]".into()),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn watch_action_row_needs_both_fields() {
        let message = WatchMessage {
            identifier: "ActionRowPressed".into(),
            content: json!({ "ActionName": "Lights" }).as_object().unwrap().clone(),
        };
        assert!(router().classify(ExternalTrigger::WatchMessage(message)).is_err());

        let message = WatchMessage {
            identifier: "SomethingElse".into(),
            content: Map::new(),
        };
        assert_eq!(
            router().classify(ExternalTrigger::WatchMessage(message)).unwrap(),
            Route::Declined
        );
    }

    #[test]
    fn notification_response_plan() {
        let response = NotificationResponse {
            action_identifier: DEFAULT_ACTION_IDENTIFIER.into(),
            category: "camera".into(),
            payload: PushPayload::from_value(json!({
                "shortcut": { "name": "Open Garage", "door": "main" },
                "url": { "_": "/lovelace/garage" }
            }))
            .unwrap(),
            user_text: None,
        };
        let Route::Notification(plan) = router()
            .classify(ExternalTrigger::NotificationResponse(response))
            .unwrap()
        else {
            panic!("expected notification plan");
        };
        assert_eq!(
            plan.shortcut,
            Some(ActionRequest::RunShortcut {
                name: "Open Garage".into(),
                parameters: BTreeMap::from([("door".to_owned(), "main".to_owned())]),
            })
        );
        assert_eq!(plan.open_url.as_deref(), Some("/lovelace/garage"));
        assert!(matches!(plan.push_action, ActionRequest::HandlePushAction(ref a) if a.category == "camera"));
    }
}
