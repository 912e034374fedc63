//! Builds a signed-in `Companion` from the config file, profile, and CLI
//! flags.

use std::sync::Arc;

use hacompanion_api::{HassClient, TlsMode};
use hacompanion_config::{self as config, Config, ConfigError, Profile};
use hacompanion_core::recording::RecordingRemote;
use hacompanion_core::{
    AppContext, Companion, DeviceIdentity, HassRemote, Settings, StaticProbe, SurfaceHandle,
    TimedHost, TrackedSession, webhook_session,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::surface::TerminalSurface;

/// A ready companion and the collaborators commands need to look at.
pub struct Runtime {
    pub companion: Companion,
    pub surface: Arc<TerminalSurface>,
    /// Set in `--dry-run` mode.
    pub recording: Option<Arc<RecordingRemote>>,
}

impl Runtime {
    /// Print what a dry run would have sent.
    pub fn report_dry_run(&self) {
        if let Some(recording) = &self.recording {
            for call in recording.calls() {
                eprintln!("dry-run: {call}");
            }
        }
    }
}

/// Webhook id standing in for a missing profile in a dry run.
const DRY_RUN_WEBHOOK: &str = "dry-run";

/// Build the runtime. `allow_prompt` is false when stdin carries input.
pub fn build(global: &GlobalOpts, allow_prompt: bool) -> Result<Runtime, CliError> {
    let cfg = config::load_config()?;
    let selected = select_profile(&cfg, global)?;

    let (settings, identity) = match selected {
        Some((name, profile)) => (profile.settings(&cfg.defaults), profile.identity(name)),
        None => (Settings::default(), dry_run_identity()),
    };

    let ctx = AppContext::new(settings.clone(), identity.clone());
    let host = Arc::new(TimedHost::new(settings.background_budget));
    let shortcuts = Arc::new(
        selected.map_or_else(default_shortcuts, |(_, profile)| profile.shortcut_runner()),
    );
    let companion = Companion::new(ctx, host, shortcuts);

    // Webhook calls are tracked on this session; `session <id>` completes it.
    let webhook_id = selected.map_or(DRY_RUN_WEBHOOK, |(_, profile)| profile.webhook_id.as_str());
    let session = TrackedSession::register(
        Arc::clone(companion.context().sessions()),
        webhook_session(webhook_id),
    );
    tracing::debug!(session = session.identifier(), "webhook session registered");

    let recording = if global.dry_run {
        let mut remote = RecordingRemote::default().with_session(session);
        if let Some(instance) = selected.and_then(|(_, p)| p.connection().ok()) {
            remote = remote.with_instance(instance.base_url);
        }
        let remote = Arc::new(remote);
        companion.sign_in(remote.clone());
        Some(remote)
    } else {
        let (name, profile) = selected.ok_or_else(|| CliError::NoConfig {
            path: config::config_path().display().to_string(),
        })?;
        let remote = connect_remote(&cfg, name, profile, global, identity)?;
        companion.sign_in(Arc::new(remote.with_session(session)));
        None
    };

    let surface = Arc::new(TerminalSurface::new(global.yes, allow_prompt));
    companion.set_ui_surface(Some(surface.clone() as SurfaceHandle));

    tracing::debug!(dry_run = global.dry_run, "companion ready");
    Ok(Runtime {
        companion,
        surface,
        recording,
    })
}

/// The profile to use. `None` only for a dry run with no profile at all.
fn select_profile<'a>(
    cfg: &'a Config,
    global: &'a GlobalOpts,
) -> Result<Option<(&'a str, &'a Profile)>, CliError> {
    match cfg.profile(global.profile.as_deref()) {
        Ok(found) => Ok(Some(found)),
        Err(ConfigError::UnknownProfile { .. })
            if global.dry_run && global.profile.is_none() && cfg.profiles.is_empty() =>
        {
            Ok(None)
        }
        Err(ConfigError::UnknownProfile { .. }) if cfg.profiles.is_empty() => {
            Err(CliError::NoConfig {
                path: config::config_path().display().to_string(),
            })
        }
        Err(ConfigError::UnknownProfile { name }) => Err(CliError::ProfileNotFound {
            name,
            available: cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
        }),
        Err(e) => Err(e.into()),
    }
}

fn connect_remote(
    cfg: &Config,
    name: &str,
    profile: &Profile,
    global: &GlobalOpts,
    identity: DeviceIdentity,
) -> Result<HassRemote, CliError> {
    let (connection, token) = profile.credentials(name)?;
    let mut transport = profile.transport(&cfg.defaults);
    if global.insecure {
        transport.tls = TlsMode::DangerAcceptInvalid;
    }
    let client = HassClient::new(connection, token, &transport)?;
    let probe = Arc::new(StaticProbe::new(profile.location_fix()));
    Ok(HassRemote::new(client, probe, identity))
}

fn default_shortcuts() -> hacompanion_core::ProcessShortcutRunner {
    Profile::template("", "").shortcut_runner()
}

fn dry_run_identity() -> DeviceIdentity {
    DeviceIdentity {
        permanent_id: "dry-run".into(),
        name: "hacompanion".into(),
        device_id: "dry-run".into(),
    }
}
