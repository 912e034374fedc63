//! One-shot trigger commands: each delivers a single stimulus to the
//! companion and reports how it completed.

use std::io::Read;
use std::time::Duration;

use serde_json::{Map, Value, json};
use url::Url;

use hacompanion_core::trigger::{DEFAULT_ACTION_IDENTIFIER, DISMISS_ACTION_IDENTIFIER};
use hacompanion_core::{
    AppShortcut, Completion, FetchResult, IntentRequest, IntentResponse, IntentResponseCode,
    NotificationResponse, Outcome, PushPayload, UniversalLink, UrlHandled, WatchMessage,
};

use crate::cli::{IntentCommand, NotificationResponseArgs, TriggerCommand};
use crate::error::CliError;
use crate::output::Printer;
use crate::runtime::Runtime;

/// Dispatch a trigger command to its handler.
pub async fn dispatch(cmd: TriggerCommand, rt: &Runtime, printer: Printer) -> Result<(), CliError> {
    match cmd {
        TriggerCommand::OpenUrl { url } => open_url(rt, parse_url("url", &url)?, printer).await,
        TriggerCommand::Activity { url } => activity(rt, parse_url("url", &url)?, printer).await,
        TriggerCommand::Push { payload } => push(rt, &payload, printer).await,
        TriggerCommand::Fetch => fetch(rt, printer).await,
        TriggerCommand::Shortcut {
            shortcut_type,
            info,
        } => shortcut(rt, shortcut_type, info, printer).await,
        TriggerCommand::Session { identifier } => session(rt, identifier, printer).await,
        TriggerCommand::Watch {
            identifier,
            content,
        } => watch(rt, identifier, content.as_deref(), printer).await,
        TriggerCommand::Intent(args) => intent(rt, args.command, printer).await,
        TriggerCommand::NotificationResponse(args) => notification_response(rt, args, printer).await,
    }
}

// ── URL scheme & universal links ────────────────────────────────────

pub async fn open_url(rt: &Runtime, url: Url, printer: Printer) -> Result<(), CliError> {
    match rt.companion.open_url(url).await? {
        UrlHandled::Completed(outcome) => report_outcome(outcome, printer),
        UrlHandled::Callback { outcome, reply } => {
            let reply_text = reply.as_ref().map_or_else(|| "none".to_owned(), Url::to_string);
            let status = outcome
                .as_ref()
                .map_or_else(|| "rejected".to_owned(), |o| o.status().to_string());
            printer.emit(
                format!("{status} (callback: {reply_text})"),
                &json!({ "status": status, "reply": reply.as_ref().map(Url::as_str) }),
            );
            match outcome {
                Some(Outcome::Failure(e)) => Err(e.into()),
                _ => Ok(()),
            }
        }
        UrlHandled::AuthCallback { listeners } => {
            printer.emit(
                format!("auth callback delivered to {listeners} listener(s)"),
                &json!({ "status": "auth_callback", "listeners": listeners }),
            );
            Ok(())
        }
    }
}

async fn activity(rt: &Runtime, url: Url, printer: Printer) -> Result<(), CliError> {
    let accepted = rt.companion.continue_activity(UniversalLink::browsing(url)).await;
    printer.emit(
        if accepted { "accepted" } else { "declined" },
        &json!({ "accepted": accepted }),
    );
    if accepted {
        Ok(())
    } else {
        Err(CliError::ActionFailed {
            message: "the link does not carry an app URL".into(),
        })
    }
}

// ── Background work ──────────────────────────────────────────────────

async fn push(rt: &Runtime, raw: &str, printer: Printer) -> Result<(), CliError> {
    let payload = PushPayload::from_value(read_json(raw)?)?;
    let (completion, signalled) = Completion::channel(FetchResult::Failed);
    rt.companion.handle_push(payload, completion).await;
    report_fetch(signalled.await.unwrap_or(FetchResult::Failed), printer)
}

async fn fetch(rt: &Runtime, printer: Printer) -> Result<(), CliError> {
    let (completion, signalled) = Completion::channel(FetchResult::Failed);
    rt.companion.handle_background_fetch(completion).await;
    report_fetch(signalled.await.unwrap_or(FetchResult::Failed), printer)
}

async fn session(rt: &Runtime, identifier: String, printer: Printer) -> Result<(), CliError> {
    let (completion, signalled) = Completion::channel(());
    let result = rt
        .companion
        .handle_background_session(identifier.clone(), completion)
        .await;
    // The completion fires whether or not the drain succeeded.
    if signalled.await.is_ok() {
        tracing::info!(identifier, "session completion signalled");
    }
    result?;
    printer.emit(
        format!("session {identifier} completed"),
        &json!({ "session": identifier, "status": "completed" }),
    );
    Ok(())
}

pub async fn present(raw: &str, printer: Printer) -> Result<(), CliError> {
    let payload = PushPayload::from_value(read_json(raw)?)?;
    let options = payload.presentation_options();
    let shown: Vec<&str> = [
        ("alert", options.alert),
        ("badge", options.badge),
        ("sound", options.sound),
    ]
    .into_iter()
    .filter_map(|(name, on)| on.then_some(name))
    .collect();
    printer.emit(
        if shown.is_empty() {
            "none".to_owned()
        } else {
            shown.join(",")
        },
        &serde_json::to_value(options)?,
    );
    Ok(())
}

// ── Interactive triggers ─────────────────────────────────────────────

async fn shortcut(
    rt: &Runtime,
    shortcut_type: String,
    info: Vec<(String, String)>,
    printer: Printer,
) -> Result<(), CliError> {
    let item = AppShortcut {
        shortcut_type,
        user_info: info.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
    };
    let (completion, signalled) = Completion::channel(false);
    rt.companion.perform_shortcut(item, completion).await;
    let succeeded = signalled.await.unwrap_or(false);
    printer.emit(
        if succeeded { "success" } else { "failure" },
        &json!({ "succeeded": succeeded }),
    );
    if succeeded {
        Ok(())
    } else {
        Err(CliError::ActionFailed {
            message: "the quick action did not succeed".into(),
        })
    }
}

async fn watch(
    rt: &Runtime,
    identifier: String,
    content: Option<&str>,
    printer: Printer,
) -> Result<(), CliError> {
    let content: Map<String, Value> = match content {
        Some(raw) => serde_json::from_str(raw)?,
        None => Map::new(),
    };
    let reply = rt
        .companion
        .handle_watch_message(WatchMessage {
            identifier,
            content,
        })
        .await;
    match reply {
        Some(reply) => {
            let reply = Value::Object(reply);
            printer.emit(&reply, &reply);
        }
        None => printer.emit("no reply", &Value::Null),
    }
    Ok(())
}

async fn intent(rt: &Runtime, command: IntentCommand, printer: Printer) -> Result<(), CliError> {
    let request = match command {
        IntentCommand::FireEvent {
            event_name,
            payload,
        } => IntentRequest::FireEvent {
            event_name,
            payload,
        },
        IntentCommand::CallService { service, payload } => {
            IntentRequest::CallService { service, payload }
        }
        IntentCommand::SendLocation => IntentRequest::SendLocation,
        IntentCommand::RenderTemplate { template } => IntentRequest::RenderTemplate { template },
    };
    let response = rt.companion.handle_intent(request).await;
    printer.emit(intent_line(&response), &serde_json::to_value(&response)?);

    match response.code {
        IntentResponseCode::Success => Ok(()),
        IntentResponseCode::FailureConnectivity => Err(CliError::Unauthenticated),
        IntentResponseCode::Failure => Err(CliError::ActionFailed {
            message: response.error.unwrap_or_else(|| "intent failed".into()),
        }),
    }
}

fn intent_line(response: &IntentResponse) -> String {
    match (&response.result, &response.error) {
        (Some(result), _) => format!("{}: {result}", response.code),
        (None, Some(error)) => format!("{}: {error}", response.code),
        (None, None) => response.code.to_string(),
    }
}

async fn notification_response(
    rt: &Runtime,
    args: NotificationResponseArgs,
    printer: Printer,
) -> Result<(), CliError> {
    let payload = match args.payload.as_deref() {
        Some(raw) => PushPayload::from_value(read_json(raw)?)?,
        None => PushPayload::default(),
    };
    let action_identifier = match args.action.as_str() {
        "default" => DEFAULT_ACTION_IDENTIFIER.to_owned(),
        "dismiss" => DISMISS_ACTION_IDENTIFIER.to_owned(),
        other => other.to_owned(),
    };
    let response = NotificationResponse {
        action_identifier,
        category: args.category,
        payload,
        user_text: args.text,
    };
    let opens_url = !response.is_dismissal()
        && response
            .payload
            .url
            .as_ref()
            .and_then(|url| url.for_action(&response.action_identifier))
            .is_some();

    let (completion, signalled) = Completion::channel(());
    let outcome = rt
        .companion
        .handle_notification_response(response, completion)
        .await;
    let _ = signalled.await;

    if opens_url
        && tokio::time::timeout(Duration::from_secs(args.wait), rt.surface.url_handled())
            .await
            .is_err()
    {
        tracing::warn!(wait = args.wait, "notification URL was not opened in time");
    }

    match outcome {
        Some(outcome) => report_outcome(outcome, printer),
        None => {
            printer.emit("not handled", &json!({ "status": "not_handled" }));
            Ok(())
        }
    }
}

// ── Reporting ────────────────────────────────────────────────────────

fn report_outcome(outcome: Outcome, printer: Printer) -> Result<(), CliError> {
    match outcome {
        Outcome::Success(result) => {
            let line = match &result {
                Some(Value::String(s)) => format!("success: {s}"),
                Some(other) => format!("success: {other}"),
                None => "success".to_owned(),
            };
            printer.emit(line, &json!({ "status": "success", "result": result }));
            Ok(())
        }
        Outcome::Cancelled => {
            printer.emit("cancelled", &json!({ "status": "cancelled" }));
            Ok(())
        }
        Outcome::Failure(e) => Err(e.into()),
    }
}

fn report_fetch(result: FetchResult, printer: Printer) -> Result<(), CliError> {
    printer.emit(result, &json!({ "result": result.to_string() }));
    if result == FetchResult::Failed {
        return Err(CliError::ActionFailed {
            message: "background work failed".into(),
        });
    }
    Ok(())
}

// ── Input helpers ────────────────────────────────────────────────────

/// Parse a JSON argument: inline, `@path`, or `-` for stdin.
pub fn read_json(raw: &str) -> Result<Value, CliError> {
    let text = if raw == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = raw.strip_prefix('@') {
        std::fs::read_to_string(path)?
    } else {
        raw.to_owned()
    };
    Ok(serde_json::from_str(&text)?)
}

pub fn parse_url(field: &str, raw: &str) -> Result<Url, CliError> {
    Url::parse(raw).map_err(|e| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}
