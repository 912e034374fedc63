//! Trigger routing and deferred-resource orchestration for the Home
//! Assistant companion.
//!
//! This crate turns externally delivered stimuli into remote actions:
//!
//! - **[`Companion`]**: Central facade. One entry point per host callback
//!   (pushes, URL-scheme invocations, shortcut items, background fetch and
//!   session completions, watch messages, voice shortcuts, notification
//!   responses) plus the app lifecycle transitions.
//!
//! - **[`ResourceBroker`]**: Late-bound access to the authenticated
//!   [`RemoteApi`] handle and the [`UiSurface`], built on [`Deferred`]
//!   single-assignment slots that can be re-armed on sign-out.
//!
//! - **[`TriggerRouter`]**: Pure classification of an [`ExternalTrigger`]
//!   into a [`Route`], usually an [`ActionRequest`].
//!
//! - **[`Dispatcher`]**: Executes one request and reports it through
//!   [`Telemetry`], yielding a three-way [`Outcome`].
//!
//! - **[`BackgroundEnvelope`]**: Runs work inside host-granted background
//!   windows and guarantees exactly one [`Completion`] signal.
//!
//! - **[`PeriodicScheduler`]**: The foreground keep-alive connect timer.
//!
//! The [`recording`] module provides in-memory collaborators for dry runs
//! and tests.

pub mod action;
pub mod broker;
pub mod companion;
pub mod context;
pub mod deferred;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod recording;
pub mod remote;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod shortcut;
pub mod surface;
pub mod trigger;

// ── Primary re-exports ──────────────────────────────────────────────
pub use action::{
    ActionRequest, ActionSource, ConnectReason, LocationTrigger, Outcome, OutcomeStatus,
    PushAction, XCallbackError, XCallbackUrls,
};
pub use broker::{ApiHandle, ResourceBroker, SurfaceHandle};
pub use companion::{Companion, UrlHandled};
pub use context::{AppContext, AppState, Badge, DeviceIdentity, Settings};
pub use deferred::{Deferred, Resolution};
pub use dispatch::{
    Dispatcher, EventTelemetry, LogTelemetry, PendingReport, Telemetry, TelemetryEvent,
};
pub use envelope::{
    BackgroundEnvelope, BackgroundHost, BackgroundWindow, Budget, Completion, FetchResult,
    FetchState, TimedHost,
};
pub use error::CoreError;
pub use remote::{DeviceProbe, HassRemote, RemoteApi, StaticProbe};
pub use router::{NotificationPlan, Route, RouterError, TriggerRouter};
pub use scheduler::{ArmDecision, PeriodicScheduler, TimerState};
pub use session::{SessionRegistry, SessionTicket, TrackedSession, webhook_session};
pub use shortcut::{ProcessShortcutRunner, ShortcutOutcome, ShortcutRunner};
pub use surface::UiSurface;
pub use trigger::{
    AppShortcut, ExternalTrigger, IntentRequest, IntentResponse, IntentResponseCode,
    NotificationResponse, PresentationOptions, PushPayload, TriggerSource, UniversalLink,
    UrlInvocation, WatchMessage,
};
