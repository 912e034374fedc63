// ── Companion facade ──
//
// One entry point per host callback. Each entry point classifies its
// trigger, dispatches the resulting request (inside a background window
// when the host is waiting on a completion), and signals that completion
// exactly once. Connect attempts re-arm the periodic scheduler.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::action::{ActionRequest, ConnectReason, Outcome};
use crate::broker::{ApiHandle, ResourceBroker, SurfaceHandle};
use crate::context::{AppContext, AppState, Settings};
use crate::dispatch::{Dispatcher, EventTelemetry, LogTelemetry, Telemetry};
use crate::envelope::{BackgroundEnvelope, BackgroundHost, Completion, FetchResult};
use crate::error::CoreError;
use crate::router::{Route, RouterError, TriggerRouter};
use crate::scheduler::{ArmDecision, PeriodicScheduler, TimerState};
use crate::shortcut::ShortcutRunner;
use crate::trigger::{
    AppShortcut, ExternalTrigger, IntentRequest, IntentResponse, NotificationResponse,
    PresentationOptions, PushPayload, TriggerSource, UniversalLink, UrlInvocation, WatchMessage,
};

// ── Background window names ──────────────────────────────────────────

const WINDOW_CONNECT: &str = "connect-api";
const WINDOW_PUSH: &str = "push-location-request";
const WINDOW_BACKGROUND_FETCH: &str = "background-fetch";
const WINDOW_URL: &str = "url-action";
const WINDOW_X_CALLBACK: &str = "x-callback-action";
const WINDOW_SHORTCUT_ITEM: &str = "shortcut-item";
const WINDOW_BACKGROUND_SESSION: &str = "background-session";
const WINDOW_WATCH: &str = "watch-action";
const WINDOW_INTENT: &str = "intent";
const WINDOW_PUSH_ACTION: &str = "handle-push-action";

// ── Lifecycle events ─────────────────────────────────────────────────

pub const EVENT_FINISHED_LAUNCHING: &str = "ios.finished_launching";
pub const EVENT_ENTERED_BACKGROUND: &str = "ios.entered_background";
pub const EVENT_BECAME_ACTIVE: &str = "ios.became_active";

/// Query key carrying a rendered template back to an x-callback caller.
const RENDERED_KEY: &str = "rendered";

// ── UrlHandled ───────────────────────────────────────────────────────

/// How a URL-scheme invocation was handled.
#[derive(Debug, Clone)]
pub enum UrlHandled {
    /// A plain action ran; the user was shown its result.
    Completed(Outcome),
    /// An x-callback-url invocation. `outcome` is `None` when the request
    /// was rejected before anything ran; `reply` is the callback URL that
    /// was opened, if the caller supplied one.
    Callback {
        outcome: Option<Outcome>,
        reply: Option<Url>,
    },
    /// A sign-in callback, handed to `listeners` subscribers.
    AuthCallback { listeners: usize },
}

// ── Companion ────────────────────────────────────────────────────────

/// The companion runtime.
///
/// Cheaply cloneable via `Arc<CompanionInner>`. All entry points must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct Companion {
    inner: Arc<CompanionInner>,
}

struct CompanionInner {
    ctx: AppContext,
    router: TriggerRouter,
    dispatcher: Dispatcher,
    envelope: BackgroundEnvelope,
    scheduler: PeriodicScheduler,
    cancel: CancellationToken,
}

impl Drop for CompanionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.scheduler.invalidate();
    }
}

impl Companion {
    /// Build a companion over `ctx`.
    ///
    /// Action telemetry goes to the server when `remote_telemetry` is set
    /// at construction time, and to the log otherwise.
    pub fn new(
        ctx: AppContext,
        host: Arc<dyn BackgroundHost>,
        shortcuts: Arc<dyn ShortcutRunner>,
    ) -> Self {
        let telemetry: Arc<dyn Telemetry> = if ctx.settings().remote_telemetry {
            Arc::new(EventTelemetry::new(Arc::clone(ctx.broker())))
        } else {
            Arc::new(LogTelemetry)
        };
        Self::with_telemetry(ctx, host, shortcuts, telemetry)
    }

    pub fn with_telemetry(
        ctx: AppContext,
        host: Arc<dyn BackgroundHost>,
        shortcuts: Arc<dyn ShortcutRunner>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let router = TriggerRouter::new(ctx.settings_handle(), Arc::clone(ctx.sessions()));
        let dispatcher = Dispatcher::new(
            Arc::clone(ctx.broker()),
            telemetry,
            shortcuts,
            ctx.identity().clone(),
        );
        Self {
            inner: Arc::new(CompanionInner {
                ctx,
                router,
                dispatcher,
                envelope: BackgroundEnvelope::new(host),
                scheduler: PeriodicScheduler::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.ctx
    }

    fn broker(&self) -> &Arc<ResourceBroker> {
        self.inner.ctx.broker()
    }

    pub fn timer_state(&self) -> TimerState {
        self.inner.scheduler.state()
    }

    pub fn subscribe_timer(&self) -> watch::Receiver<TimerState> {
        self.inner.scheduler.subscribe()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop the periodic timer and abandon pending surface waits.
    pub fn shutdown(&self) {
        info!("companion shutting down");
        self.inner.cancel.cancel();
        self.inner.scheduler.invalidate();
    }

    // ── Credentials and settings ─────────────────────────────────────

    pub fn sign_in(&self, api: ApiHandle) {
        self.broker().set_api(api);
    }

    /// Forget the API handle and the surface, and stop periodic updates.
    pub fn sign_out(&self) {
        self.broker().invalidate_api();
        self.broker().set_ui_surface(None);
        self.inner.scheduler.invalidate();
    }

    pub fn set_ui_surface(&self, surface: Option<SurfaceHandle>) {
        self.broker().set_ui_surface(surface);
    }

    /// Swap in new settings. A changed update interval replaces any
    /// pending timer.
    pub fn apply_settings(&self, settings: Settings) {
        let previous = self.inner.ctx.settings().periodic_update_interval;
        let interval = settings.periodic_update_interval;
        self.inner.ctx.store_settings(settings);
        if previous != interval {
            self.inner.scheduler.invalidate();
            self.schedule_periodic_update();
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn did_finish_launching(&self) -> Result<(), CoreError> {
        self.fire_lifecycle_event(EVENT_FINISHED_LAUNCHING);
        self.connect(ConnectReason::Cold).await
    }

    pub async fn will_enter_foreground(&self) -> Result<(), CoreError> {
        self.inner.ctx.set_app_state(AppState::Inactive);
        self.connect(ConnectReason::Warm).await
    }

    pub fn did_become_active(&self) {
        self.inner.ctx.set_app_state(AppState::Active);
        self.fire_lifecycle_event(EVENT_BECAME_ACTIVE);
    }

    pub fn did_enter_background(&self) {
        self.inner.ctx.set_app_state(AppState::Background);
        self.fire_lifecycle_event(EVENT_ENTERED_BACKGROUND);
        self.inner.scheduler.invalidate();
    }

    fn fire_lifecycle_event(&self, event_type: &'static str) {
        let Some(api) = self.broker().api_now() else {
            debug!(event_type, "not signed in; skipping lifecycle event");
            return;
        };
        let data = self.inner.ctx.identity().event_fields();
        tokio::spawn(async move {
            if let Err(e) = api.fire_event(event_type, data).await {
                warn!(event_type, error = %e, "lifecycle event failed");
            }
        });
    }

    /// Connect to the server, then try to arm the periodic update
    /// whatever the outcome.
    pub async fn connect(&self, reason: ConnectReason) -> Result<(), CoreError> {
        let result = self.connect_once(reason).await;
        match &result {
            Ok(()) => info!(%reason, "connected"),
            Err(e @ CoreError::RemoteOperationFailed { auth_invalid: true, .. }) => {
                warn!(%reason, error = %e, "credentials rejected; signing out");
                self.broker().invalidate_api();
            }
            Err(e) => warn!(%reason, error = %e, "connect failed"),
        }
        self.schedule_periodic_update();
        result
    }

    async fn connect_once(&self, reason: ConnectReason) -> Result<(), CoreError> {
        let api = self.broker().api().await?;
        self.inner
            .envelope
            .run(WINDOW_CONNECT, move |_| async move { api.connect(reason).await })
            .await
    }

    fn schedule_periodic_update(&self) -> ArmDecision {
        if self.inner.cancel.is_cancelled() {
            return ArmDecision::Disabled;
        }
        let interval = self.inner.ctx.settings().periodic_update_interval;
        let backgrounded = self.inner.ctx.app_state() == AppState::Background;
        let inner = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .arm(interval, backgrounded, move || periodic_tick(inner))
    }

    // ── Headless triggers ────────────────────────────────────────────

    /// A remote notification delivered in the background.
    pub async fn handle_push(
        &self,
        payload: PushPayload,
        completion: Completion<FetchResult>,
    ) -> FetchResult {
        if !self.broker().is_authenticated() {
            warn!("push received while signed out");
            return finish(completion, FetchResult::Failed);
        }
        let route = self
            .inner
            .router
            .classify(ExternalTrigger::PushNotification(payload));
        self.complete_route(WINDOW_PUSH, route, completion).await
    }

    /// An OS background fetch tick.
    pub async fn handle_background_fetch(&self, completion: Completion<FetchResult>) -> FetchResult {
        if !self.broker().is_authenticated() {
            warn!("background fetch while signed out");
            return finish(completion, FetchResult::Failed);
        }
        let route = self.inner.router.classify(ExternalTrigger::BackgroundFetchTick);
        self.complete_route(WINDOW_BACKGROUND_FETCH, route, completion)
            .await
    }

    async fn complete_route(
        &self,
        window: &str,
        route: Result<Route, RouterError>,
        completion: Completion<FetchResult>,
    ) -> FetchResult {
        match route {
            Ok(Route::Dispatch { request, source }) => {
                let dispatcher = &self.inner.dispatcher;
                let report = dispatcher.prepare(&request, source);
                let companion = self.clone();
                let task_report = report.clone();
                self.inner
                    .envelope
                    .run_reporting(
                        window,
                        completion,
                        move |budget| async move {
                            Ok::<_, CoreError>(
                                companion
                                    .inner
                                    .dispatcher
                                    .dispatch_prepared(request, source, Some(budget), &task_report)
                                    .await,
                            )
                        },
                        move |e| async move {
                            dispatcher.settle(&report, &Outcome::Failure(e)).await;
                        },
                    )
                    .await
            }
            Ok(Route::ClearBadge) => {
                info!("clearing badge as requested");
                self.inner.ctx.badge().clear();
                finish(completion, FetchResult::NoData)
            }
            Ok(Route::Complete(result)) => finish(completion, result),
            Ok(other) => {
                warn!(?other, "unexpected route for background trigger");
                finish(completion, FetchResult::Failed)
            }
            Err(_) => finish(completion, FetchResult::Failed),
        }
    }

    /// Completion of a background upload session.
    pub async fn handle_background_session(
        &self,
        identifier: String,
        completion: Completion<()>,
    ) -> Result<(), CoreError> {
        let result = match self
            .inner
            .router
            .classify(ExternalTrigger::BackgroundSessionCompletion { identifier })
        {
            Ok(Route::DrainSession { identifier }) => {
                let sessions = Arc::clone(self.inner.ctx.sessions());
                self.inner
                    .envelope
                    .run(WINDOW_BACKGROUND_SESSION, move |_| async move {
                        sessions.drain(&identifier).await.map_err(CoreError::from)
                    })
                    .await
            }
            Ok(other) => Err(unexpected_route(&other)),
            Err(e) => Err(e.into()),
        };
        completion.complete(());
        result
    }

    /// A message from the paired watch. Returns the reply, if the message
    /// expects one.
    pub async fn handle_watch_message(&self, message: WatchMessage) -> Option<Map<String, Value>> {
        let fired = match self
            .inner
            .router
            .classify(ExternalTrigger::WatchMessage(message))
        {
            Ok(Route::Dispatch { request, source }) => {
                self.dispatch_in_window(WINDOW_WATCH, request, source)
                    .await
                    .is_success()
            }
            Ok(Route::Declined) => return None,
            Ok(other) => {
                warn!(?other, "unexpected route for watch message");
                false
            }
            Err(_) => false,
        };
        let mut reply = Map::new();
        reply.insert("fired".into(), json!(fired));
        Some(reply)
    }

    /// A voice shortcut run.
    pub async fn handle_intent(&self, intent: IntentRequest) -> IntentResponse {
        if !self.broker().is_authenticated() {
            return IntentResponse::failure_connectivity();
        }
        match self
            .inner
            .router
            .classify(ExternalTrigger::VoiceShortcutRun(intent))
        {
            Ok(Route::Dispatch { request, source }) => {
                match self.dispatch_in_window(WINDOW_INTENT, request, source).await {
                    Outcome::Success(value) => IntentResponse::success(value.map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })),
                    Outcome::Failure(CoreError::Unauthenticated) => {
                        IntentResponse::failure_connectivity()
                    }
                    Outcome::Failure(e) => IntentResponse::failure(e.to_string()),
                    Outcome::Cancelled => IntentResponse::failure("cancelled"),
                }
            }
            Ok(other) => IntentResponse::failure(unexpected_route(&other).to_string()),
            Err(e) => IntentResponse::failure(e.to_string()),
        }
    }

    // ── Interactive triggers ─────────────────────────────────────────

    /// A URL opened through the app's scheme.
    pub async fn open_url(&self, url: Url) -> Result<UrlHandled, CoreError> {
        let route = self
            .inner
            .router
            .classify(ExternalTrigger::UrlScheme(UrlInvocation::new(url)));

        match route {
            Err(e) => {
                self.alert("Unable to handle URL", &e.to_string());
                Err(e.into())
            }
            Ok(Route::Dispatch { request, source }) => {
                let summary = success_message(&request);
                let outcome = self.dispatch_in_window(WINDOW_URL, request, source).await;
                match &outcome {
                    Outcome::Success(_) => self.alert("Success", &summary),
                    Outcome::Failure(e) => self.alert("Error", &e.to_string()),
                    Outcome::Cancelled => {}
                }
                Ok(UrlHandled::Completed(outcome))
            }
            Ok(Route::XCallback { request, callbacks }) => {
                let outcome = self
                    .dispatch_in_window(WINDOW_X_CALLBACK, request, TriggerSource::XCallbackUrl)
                    .await;
                let reply = callbacks.reply(&outcome, RENDERED_KEY);
                if let Some(reply) = &reply {
                    self.open_external(reply.clone());
                }
                Ok(UrlHandled::Callback {
                    outcome: Some(outcome),
                    reply,
                })
            }
            Ok(Route::XCallbackRejected { error, callbacks }) => {
                warn!(code = error.code(), %error, "rejecting x-callback request");
                let reply = callbacks.rejection(error);
                if let Some(reply) = &reply {
                    self.open_external(reply.clone());
                }
                Ok(UrlHandled::Callback {
                    outcome: None,
                    reply,
                })
            }
            Ok(Route::AuthCallback(url)) => {
                let listeners = self.inner.ctx.publish_auth_callback(url);
                debug!(listeners, "delivered auth callback");
                Ok(UrlHandled::AuthCallback { listeners })
            }
            Ok(other) => Err(unexpected_route(&other)),
        }
    }

    /// A home-screen quick action.
    pub async fn perform_shortcut(&self, item: AppShortcut, completion: Completion<bool>) -> bool {
        if !self.broker().is_authenticated() {
            warn!("shortcut item used while signed out");
            completion.complete(false);
            return false;
        }
        let succeeded = match self.inner.router.classify(ExternalTrigger::AppShortcut(item)) {
            Ok(Route::Dispatch { request, source }) => self
                .dispatch_in_window(WINDOW_SHORTCUT_ITEM, request, source)
                .await
                .is_success(),
            Ok(other) => {
                warn!(?other, "unexpected route for shortcut item");
                false
            }
            Err(_) => false,
        };
        completion.complete(succeeded);
        succeeded
    }

    /// A universal link. Returns whether the link was accepted.
    pub async fn continue_activity(&self, link: UniversalLink) -> bool {
        match self.inner.router.classify(ExternalTrigger::UniversalLink(link)) {
            Ok(Route::OpenUrl(url)) => {
                if let Err(e) = self.open_url(url).await {
                    debug!(error = %e, "embedded URL was not handled");
                }
                true
            }
            Ok(_) | Err(_) => false,
        }
    }

    /// The user acted on a notification.
    ///
    /// A requested shortcut runs on its own task and a URL is opened once
    /// the surface is available; the completion is signalled after the
    /// response itself has been reported. Returns that report's outcome,
    /// or `None` if the response was not handled.
    pub async fn handle_notification_response(
        &self,
        response: NotificationResponse,
        completion: Completion<()>,
    ) -> Option<Outcome> {
        let plan = match self
            .inner
            .router
            .classify(ExternalTrigger::NotificationResponse(response))
        {
            Ok(Route::Notification(plan)) => plan,
            Ok(_) | Err(_) => {
                completion.complete(());
                return None;
            }
        };

        if let Some(shortcut) = plan.shortcut {
            let companion = self.clone();
            tokio::spawn(async move {
                companion
                    .inner
                    .dispatcher
                    .dispatch(shortcut, TriggerSource::NotificationResponse, None)
                    .await;
            });
        }
        if let Some(raw) = plan.open_url {
            self.open_notification_url(raw);
        }

        let outcome = self
            .dispatch_in_window(
                WINDOW_PUSH_ACTION,
                plan.push_action,
                TriggerSource::NotificationResponse,
            )
            .await;
        completion.complete(());
        Some(outcome)
    }

    /// How a notification arriving in the foreground should be shown.
    pub fn presentation_options(&self, payload: &PushPayload) -> PresentationOptions {
        payload.presentation_options()
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Dispatch `request` inside a background window.
    ///
    /// If the window gives out first, the dispatch is reported as failed
    /// here, before the caller signals anything; the abandoned task finishes
    /// on its own and its late outcome is not reported.
    async fn dispatch_in_window(
        &self,
        window: &str,
        request: ActionRequest,
        source: TriggerSource,
    ) -> Outcome {
        let report = self.inner.dispatcher.prepare(&request, source);
        let companion = self.clone();
        let task_report = report.clone();
        let result = self
            .inner
            .envelope
            .run(window, move |budget| async move {
                Ok(companion
                    .inner
                    .dispatcher
                    .dispatch_prepared(request, source, Some(budget), &task_report)
                    .await)
            })
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let outcome = Outcome::Failure(e);
                self.inner.dispatcher.settle(&report, &outcome).await;
                outcome
            }
        }
    }

    fn alert(&self, title: &str, message: &str) {
        match self.broker().ui_surface_now() {
            Some(surface) => surface.present_alert(title, message),
            None => info!(title, message, "no surface to show alert"),
        }
    }

    fn open_external(&self, url: Url) {
        self.with_surface(move |surface| surface.open_external(&url));
    }

    /// Run `f` with the surface now, or once one is set.
    fn with_surface<F>(&self, f: F)
    where
        F: FnOnce(SurfaceHandle) + Send + 'static,
    {
        if let Some(surface) = self.broker().ui_surface_now() {
            f(surface);
            return;
        }
        let broker = Arc::clone(self.broker());
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                surface = broker.ui_surface() => f(surface),
                () = cancel.cancelled() => debug!("shutdown before a surface was available"),
            }
        });
    }

    fn open_notification_url(&self, raw: String) {
        let broker = Arc::clone(self.broker());
        let cancel = self.inner.cancel.clone();
        let confirm = self.inner.ctx.settings().confirm_before_opening_url;
        tokio::spawn(async move {
            let surface = tokio::select! {
                surface = broker.ui_surface() => surface,
                () = cancel.cancelled() => return,
            };
            if let Some(url) = broker.api_now().and_then(|api| api.webview_url(&raw)) {
                surface.open_inline(&url);
                return;
            }
            let url = match Url::parse(&raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = raw, error = %e, "notification URL is not valid");
                    return;
                }
            };
            if confirm && !surface.confirm("Open URL?", &format!("Open {url}?")).await {
                debug!(%url, "user declined to open notification URL");
                return;
            }
            surface.open_external(&url);
        });
    }
}

impl std::fmt::Debug for Companion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Companion")
            .field("ctx", &self.inner.ctx)
            .field("timer", &self.timer_state())
            .finish_non_exhaustive()
    }
}

fn periodic_tick(inner: Weak<CompanionInner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let companion = Companion { inner };
        // Failures are logged by `connect`, which also re-arms.
        let _ = companion.connect(ConnectReason::Periodic).await;
    })
}

fn finish(completion: Completion<FetchResult>, result: FetchResult) -> FetchResult {
    completion.complete(result);
    result
}

fn unexpected_route(route: &Route) -> CoreError {
    CoreError::Internal(format!("unexpected route {route:?}"))
}

fn success_message(request: &ActionRequest) -> String {
    match request {
        ActionRequest::FireEvent { name, .. } => format!("Fired event {name}"),
        ActionRequest::CallService {
            domain, service, ..
        } => format!("Called service {domain}.{service}"),
        ActionRequest::SendLocation { .. } => "Sent location".to_owned(),
        other => format!("Completed {}", other.kind()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::envelope::TimedHost;
    use crate::recording::{
        RecordingRemote, RecordingSurface, RecordingTelemetry, ScriptedShortcuts, SurfaceEvent,
        test_identity,
    };

    struct Harness {
        companion: Companion,
        remote: Arc<RecordingRemote>,
        surface: Arc<RecordingSurface>,
        telemetry: Arc<RecordingTelemetry>,
    }

    fn harness(settings: Settings) -> Harness {
        let ctx = AppContext::new(settings, test_identity());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let companion = Companion::with_telemetry(
            ctx,
            Arc::new(TimedHost::new(Duration::from_secs(30))),
            Arc::new(ScriptedShortcuts::default()),
            telemetry.clone(),
        );
        let remote = Arc::new(RecordingRemote::default().with_template_result("on"));
        let surface = Arc::new(RecordingSurface::default());
        companion.sign_in(remote.clone());
        companion.set_ui_surface(Some(surface.clone() as SurfaceHandle));
        Harness {
            companion,
            remote,
            surface,
            telemetry,
        }
    }

    #[tokio::test]
    async fn plain_url_action_alerts_success() {
        let h = harness(Settings::default());
        let url = Url::parse("homeassistant://fire_event/custom?key=value").unwrap();

        let handled = h.companion.open_url(url).await.unwrap();
        assert!(matches!(handled, UrlHandled::Completed(Outcome::Success(None))));
        assert_eq!(
            h.remote.calls(),
            vec![r#"fire_event custom {"key":"value"}"#.to_owned()]
        );
        assert_eq!(
            h.surface.events(),
            vec![SurfaceEvent::Alert {
                title: "Success".into(),
                message: "Fired event custom".into()
            }]
        );
        assert_eq!(h.telemetry.events().len(), 1);
    }

    #[tokio::test]
    async fn unroutable_url_alerts_and_errors() {
        let h = harness(Settings::default());
        let url = Url::parse("homeassistant://navigate/somewhere").unwrap();

        let err = h.companion.open_url(url).await.unwrap_err();
        assert!(matches!(err, CoreError::Unroutable { .. }));
        assert!(h.remote.calls().is_empty());
        assert!(matches!(
            h.surface.events().as_slice(),
            [SurfaceEvent::Alert { title, .. }] if title == "Unable to handle URL"
        ));
    }

    #[tokio::test]
    async fn auth_callback_reaches_subscribers() {
        let h = harness(Settings::default());
        let mut callbacks = h.companion.context().subscribe_auth_callbacks();
        let url = Url::parse("homeassistant://auth-callback?code=abc").unwrap();

        let handled = h.companion.open_url(url.clone()).await.unwrap();
        assert!(matches!(handled, UrlHandled::AuthCallback { listeners: 1 }));
        assert_eq!(callbacks.recv().await.unwrap(), url);
    }

    #[tokio::test]
    async fn watch_reply_reports_fired() {
        let h = harness(Settings::default());
        let pressed = WatchMessage {
            identifier: "ActionRowPressed".into(),
            content: json!({ "ActionName": "Lights", "ActionID": "a1" })
                .as_object()
                .cloned()
                .unwrap(),
        };
        let reply = h.companion.handle_watch_message(pressed).await.unwrap();
        assert_eq!(reply["fired"], json!(true));
        assert_eq!(h.remote.calls(), vec!["handle_action a1 Lights Watch".to_owned()]);

        let incomplete = WatchMessage {
            identifier: "ActionRowPressed".into(),
            content: Map::new(),
        };
        let reply = h.companion.handle_watch_message(incomplete).await.unwrap();
        assert_eq!(reply["fired"], json!(false));

        let other = WatchMessage {
            identifier: "Ping".into(),
            content: Map::new(),
        };
        assert!(h.companion.handle_watch_message(other).await.is_none());
    }

    #[tokio::test]
    async fn intent_results() {
        let h = harness(Settings::default());
        let response = h
            .companion
            .handle_intent(IntentRequest::RenderTemplate {
                template: Some("{{ 1 }}".into()),
            })
            .await;
        assert_eq!(response, IntentResponse::success(Some("on".into())));

        let missing = h
            .companion
            .handle_intent(IntentRequest::RenderTemplate { template: None })
            .await;
        assert!(missing.error.is_some());

        h.companion.sign_out();
        let offline = h.companion.handle_intent(IntentRequest::SendLocation).await;
        assert_eq!(offline, IntentResponse::failure_connectivity());
    }

    #[tokio::test]
    async fn unknown_session_still_completes() {
        let h = harness(Settings::default());
        let (completion, rx) = Completion::channel(());
        let result = h
            .companion
            .handle_background_session("missing".into(), completion)
            .await;
        assert!(result.is_err());
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn sign_out_resets_resources() {
        let h = harness(Settings::default());
        h.companion.sign_out();
        assert!(!h.companion.context().broker().is_authenticated());
        assert!(h.companion.context().broker().ui_surface_now().is_none());
        assert_eq!(h.companion.timer_state(), TimerState::Idle);
    }
}
