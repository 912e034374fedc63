// ── Action dispatcher ──
//
// Executes one `ActionRequest` against the remote API and reports exactly
// one telemetry event for it, before handing the outcome back. Callers
// signal their own completion only after `dispatch` returns, so telemetry
// always precedes the terminal signal.
//
// A dispatch abandoned by its background window is settled by the caller
// through the same `PendingReport`; whichever side takes the report first
// emits the only event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::action::{ActionRequest, Outcome, OutcomeStatus};
use crate::broker::ResourceBroker;
use crate::context::DeviceIdentity;
use crate::envelope::Budget;
use crate::error::CoreError;
use crate::shortcut::{ShortcutOutcome, ShortcutRunner};
use crate::trigger::TriggerSource;

/// Event type reported for shortcut runs.
pub const SHORTCUT_RUN_EVENT: &str = "ios.shortcut_run";

/// Parameter that suppresses the shortcut's result in telemetry.
const IGNORE_RESULT_PARAM: &str = "ignore_result";

/// Telemetry is best-effort and never holds a completion hostage.
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(10);

// ── Telemetry ────────────────────────────────────────────────────────

/// One action run, as reported to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    #[serde(skip)]
    pub event_type: String,
    pub name: String,
    pub input: Value,
    pub device: DeviceIdentity,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Event payload without the event type.
    pub fn data(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn emit(&self, event: &TelemetryEvent) -> Result<(), CoreError>;
}

/// Fires telemetry as server events through the current API handle.
pub struct EventTelemetry {
    broker: Arc<ResourceBroker>,
}

impl EventTelemetry {
    pub fn new(broker: Arc<ResourceBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Telemetry for EventTelemetry {
    async fn emit(&self, event: &TelemetryEvent) -> Result<(), CoreError> {
        let api = self.broker.api_now().ok_or(CoreError::Unauthenticated)?;
        api.fire_event(&event.event_type, event.data()).await
    }
}

/// Writes telemetry to the log only.
#[derive(Debug, Default)]
pub struct LogTelemetry;

#[async_trait]
impl Telemetry for LogTelemetry {
    async fn emit(&self, event: &TelemetryEvent) -> Result<(), CoreError> {
        info!(
            event_type = event.event_type,
            name = event.name,
            status = %event.status,
            "action telemetry"
        );
        Ok(())
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

pub struct Dispatcher {
    broker: Arc<ResourceBroker>,
    telemetry: Arc<dyn Telemetry>,
    shortcuts: Arc<dyn ShortcutRunner>,
    identity: DeviceIdentity,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<ResourceBroker>,
        telemetry: Arc<dyn Telemetry>,
        shortcuts: Arc<dyn ShortcutRunner>,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            broker,
            telemetry,
            shortcuts,
            identity,
        }
    }

    /// Execute `request` once and report it.
    ///
    /// `budget` bounds how long a location fix may take; it is sampled at
    /// the moment the fix is requested.
    pub async fn dispatch(
        &self,
        request: ActionRequest,
        source: TriggerSource,
        budget: Option<Budget>,
    ) -> Outcome {
        let report = self.prepare(&request, source);
        self.dispatch_prepared(request, source, budget, &report)
            .await
    }

    /// Telemetry owed for `request`, to be settled exactly once.
    pub fn prepare(&self, request: &ActionRequest, source: TriggerSource) -> PendingReport {
        PendingReport(Arc::new(Mutex::new(Some(self.describe(request, source)))))
    }

    /// Execute `request` and settle `report` with its outcome, unless the
    /// report was already settled elsewhere.
    pub async fn dispatch_prepared(
        &self,
        request: ActionRequest,
        source: TriggerSource,
        budget: Option<Budget>,
        report: &PendingReport,
    ) -> Outcome {
        let kind = request.kind();
        let outcome = self.execute(request, budget).await;
        match &outcome {
            Outcome::Success(_) => debug!(kind, %source, "action succeeded"),
            Outcome::Failure(e) => warn!(kind, %source, error = %e, "action failed"),
            Outcome::Cancelled => info!(kind, %source, "action cancelled"),
        }

        if !self.settle(report, &outcome).await {
            debug!(kind, %source, "late outcome discarded; already reported");
        }
        outcome
    }

    /// Report `outcome` for `report` if nobody has yet. Returns whether this
    /// call emitted the event.
    ///
    /// The slot stays locked while the event is sent, so a concurrent
    /// settle returns only after the first report has gone out.
    pub async fn settle(&self, report: &PendingReport, outcome: &Outcome) -> bool {
        let mut slot = report.0.lock().await;
        let Some(event) = slot.take() else {
            return false;
        };
        self.report(event.settle(outcome)).await;
        true
    }

    async fn execute(&self, request: ActionRequest, budget: Option<Budget>) -> Outcome {
        let api = match self.broker.api().await {
            Ok(api) => api,
            Err(e) => return Outcome::Failure(e),
        };

        match request {
            ActionRequest::FireEvent { name, data } => api.fire_event(&name, data).await.into(),
            ActionRequest::CallService {
                domain,
                service,
                data,
            } => api.call_service(&domain, &service, data).await.into(),
            ActionRequest::SendLocation { trigger } => api
                .send_location(trigger, budget.map(|b| b.remaining()))
                .await
                .into(),
            ActionRequest::RenderTemplate {
                template,
                variables,
            } => api.render_template(&template, variables).await.into(),
            ActionRequest::HandleAction {
                action_id,
                action_name,
                source,
            } => api
                .handle_action(&action_id, &action_name, source)
                .await
                .into(),
            ActionRequest::RunShortcut { name, parameters } => {
                match self.shortcuts.run(&name, &parameters).await {
                    Ok(ShortcutOutcome::Success(result)) => Outcome::Success(result.map(Value::String)),
                    Ok(ShortcutOutcome::Failure { code, message }) => {
                        Outcome::Failure(CoreError::ExternalActionFailed { code, message })
                    }
                    Ok(ShortcutOutcome::Cancelled) => Outcome::Cancelled,
                    Err(e) => Outcome::Failure(e),
                }
            }
            ActionRequest::UpdateSensors { trigger } => api.update_sensors(trigger).await.into(),
            ActionRequest::HandlePushAction(action) => api.handle_push_action(&action).await.into(),
        }
    }

    fn describe(&self, request: &ActionRequest, source: TriggerSource) -> PendingEvent {
        let (event_type, name, keep_result) = match request {
            ActionRequest::RunShortcut { name, parameters } => (
                SHORTCUT_RUN_EVENT.to_owned(),
                name.clone(),
                !parameters.contains_key(IGNORE_RESULT_PARAM),
            ),
            other => (source.event_name(), other.kind().to_owned(), true),
        };
        PendingEvent {
            event_type,
            name,
            input: request.input(),
            device: self.identity.clone(),
            keep_result,
        }
    }

    async fn report(&self, event: TelemetryEvent) {
        match tokio::time::timeout(TELEMETRY_TIMEOUT, self.telemetry.emit(&event)).await {
            Ok(Ok(())) => debug!(event_type = event.event_type, "telemetry sent"),
            Ok(Err(e)) => warn!(event_type = event.event_type, error = %e, "telemetry failed"),
            Err(_) => warn!(event_type = event.event_type, "telemetry timed out"),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Telemetry for one dispatch, emitted by whichever side settles it first.
#[derive(Clone)]
pub struct PendingReport(Arc<Mutex<Option<PendingEvent>>>);

impl std::fmt::Debug for PendingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PendingReport").finish_non_exhaustive()
    }
}

/// Telemetry captured before execution, completed once the outcome is known.
struct PendingEvent {
    event_type: String,
    name: String,
    input: Value,
    device: DeviceIdentity,
    keep_result: bool,
}

impl PendingEvent {
    fn settle(self, outcome: &Outcome) -> TelemetryEvent {
        let (result, error) = match outcome {
            Outcome::Success(value) if self.keep_result => (value.clone(), None),
            Outcome::Success(_) | Outcome::Cancelled => (None, None),
            Outcome::Failure(e) => (None, Some(e.descriptor())),
        };
        TelemetryEvent {
            event_type: self.event_type,
            name: self.name,
            input: self.input,
            device: self.device,
            status: outcome.status(),
            result,
            error,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::recording::{RecordingRemote, RecordingTelemetry, ScriptedShortcuts, test_identity};

    fn dispatcher(
        broker: Arc<ResourceBroker>,
        shortcuts: ScriptedShortcuts,
    ) -> (Dispatcher, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let dispatcher = Dispatcher::new(
            broker,
            telemetry.clone(),
            Arc::new(shortcuts),
            test_identity(),
        );
        (dispatcher, telemetry)
    }

    #[tokio::test]
    async fn unauthenticated_dispatch_fails_with_one_event() {
        let broker = Arc::new(ResourceBroker::default());
        let (dispatcher, telemetry) = dispatcher(broker, ScriptedShortcuts::default());

        let outcome = dispatcher
            .dispatch(
                ActionRequest::FireEvent {
                    name: "custom".into(),
                    data: Map::new(),
                },
                TriggerSource::UrlScheme,
                None,
            )
            .await;

        assert!(matches!(outcome, Outcome::Failure(CoreError::Unauthenticated)));
        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ios.url_scheme_handled");
        assert_eq!(events[0].status, OutcomeStatus::Failure);
        assert_eq!(events[0].error.as_ref().unwrap()["kind"], "unauthenticated");
    }

    #[tokio::test]
    async fn render_template_result_is_reported() {
        let broker = Arc::new(ResourceBroker::default());
        let remote = Arc::new(RecordingRemote::default().with_template_result("above_horizon"));
        broker.set_api(remote.clone());
        let (dispatcher, telemetry) = dispatcher(broker, ScriptedShortcuts::default());

        let outcome = dispatcher
            .dispatch(
                ActionRequest::RenderTemplate {
                    template: "{{ states('sun.sun') }}".into(),
                    variables: Map::new(),
                },
                TriggerSource::XCallbackUrl,
                None,
            )
            .await;

        assert_eq!(outcome.into_result().unwrap(), Some(json!("above_horizon")));
        assert_eq!(remote.calls(), vec!["render_template {{ states('sun.sun') }}".to_owned()]);
        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, Some(json!("above_horizon")));
    }

    #[tokio::test]
    async fn shortcut_outcomes_map_to_telemetry_status() {
        let broker = Arc::new(ResourceBroker::default());
        broker.set_api(Arc::new(RecordingRemote::default()));
        let shortcuts = ScriptedShortcuts::default()
            .with("Done", ShortcutOutcome::Success(Some("ok".into())))
            .with("Stopped", ShortcutOutcome::Cancelled)
            .with(
                "Broken",
                ShortcutOutcome::Failure {
                    code: 4,
                    message: "nope".into(),
                },
            );
        let (dispatcher, telemetry) = dispatcher(broker, shortcuts);

        let run = |name: &str, ignore: bool| {
            let mut parameters = BTreeMap::new();
            if ignore {
                parameters.insert("ignore_result".to_owned(), "true".to_owned());
            }
            ActionRequest::RunShortcut {
                name: name.to_owned(),
                parameters,
            }
        };

        dispatcher
            .dispatch(run("Done", false), TriggerSource::NotificationResponse, None)
            .await;
        dispatcher
            .dispatch(run("Done", true), TriggerSource::NotificationResponse, None)
            .await;
        dispatcher
            .dispatch(run("Stopped", false), TriggerSource::NotificationResponse, None)
            .await;
        let outcome = dispatcher
            .dispatch(run("Broken", false), TriggerSource::NotificationResponse, None)
            .await;
        assert!(matches!(
            outcome,
            Outcome::Failure(CoreError::ExternalActionFailed { code: 4, .. })
        ));

        let events = telemetry.events();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.event_type == SHORTCUT_RUN_EVENT));
        assert_eq!(events[0].result, Some(json!("ok")));
        assert_eq!(events[1].status, OutcomeStatus::Success);
        assert_eq!(events[1].result, None);
        assert_eq!(events[2].status, OutcomeStatus::Cancelled);
        assert_eq!(
            events[3].error,
            Some(json!({ "errorCode": 4, "errorMessage": "nope" }))
        );
    }

    #[tokio::test]
    async fn telemetry_failure_does_not_change_outcome() {
        let broker = Arc::new(ResourceBroker::default());
        broker.set_api(Arc::new(RecordingRemote::default()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&broker),
            Arc::new(EventTelemetry::new(Arc::new(ResourceBroker::default()))),
            Arc::new(ScriptedShortcuts::default()),
            test_identity(),
        );

        let outcome = dispatcher
            .dispatch(
                ActionRequest::UpdateSensors {
                    trigger: crate::action::LocationTrigger::Manual,
                },
                TriggerSource::Lifecycle,
                None,
            )
            .await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn prepared_report_is_settled_once() {
        let broker = Arc::new(ResourceBroker::default());
        broker.set_api(Arc::new(RecordingRemote::default()));
        let (dispatcher, telemetry) = dispatcher(broker, ScriptedShortcuts::default());
        let request = ActionRequest::FireEvent {
            name: "door_opened".into(),
            data: Map::new(),
        };
        let report = dispatcher.prepare(&request, TriggerSource::UrlScheme);

        let expired = Outcome::Failure(CoreError::BudgetExhausted {
            name: "url-action".into(),
        });
        assert!(dispatcher.settle(&report, &expired).await);
        assert!(!dispatcher.settle(&report, &Outcome::Success(None)).await);

        let outcome = dispatcher
            .dispatch_prepared(request, TriggerSource::UrlScheme, None, &report)
            .await;
        assert!(outcome.is_success());

        let events = telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, OutcomeStatus::Failure);
        assert_eq!(events[0].error.as_ref().unwrap()["kind"], "budget_exhausted");
    }

    #[test]
    fn event_data_has_no_event_type() {
        let event = PendingEvent {
            event_type: SHORTCUT_RUN_EVENT.into(),
            name: "Open Garage".into(),
            input: json!({ "door": "main" }),
            device: test_identity(),
            keep_result: true,
        }
        .settle(&Outcome::Success(None));
        let data = event.data();
        assert!(!data.contains_key("event_type"));
        assert_eq!(data["name"], "Open Garage");
        assert_eq!(data["status"], "success");
        assert_eq!(data["device"]["sourceDeviceName"], "Test Phone");
    }
}
