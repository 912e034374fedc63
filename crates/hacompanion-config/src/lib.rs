//! Configuration for the hacompanion CLI.
//!
//! TOML profiles (one per Home Assistant server), token resolution
//! (env + keyring + plaintext), and translation to the runtime types of
//! `hacompanion_core` and `hacompanion_api`. The core crates never read
//! files; everything they need is built here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use hacompanion_api::{ConnectionInfo, LocationUpdate, TlsMode, TokenInfo, TransportConfig};
use hacompanion_core::{DeviceIdentity, ProcessShortcutRunner, Settings};

/// Keyring service name for stored access tokens.
pub const KEYRING_SERVICE: &str = "hacompanion";

/// Environment variable consulted for the access token when a profile
/// names none of its own.
pub const TOKEN_ENV: &str = "HACOMPANION_TOKEN";

const ENV_PREFIX: &str = "HACOMPANION_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{name}'")]
    UnknownProfile { name: String },

    #[error("no access token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// URL scheme the companion answers to.
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,

    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            url_scheme: default_url_scheme(),
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_url_scheme() -> String {
    "homeassistant".into()
}
fn default_timeout() -> u64 {
    30
}

/// One Home Assistant server and this device's registration on it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g. "https://ha.example.com:8123").
    pub server: String,

    /// Webhook id issued at device registration.
    pub webhook_id: String,

    /// Cloudhook URL, preferred for webhook calls when set.
    pub cloudhook_url: Option<String>,

    /// Long-lived access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the access token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub updates: UpdateConfig,

    #[serde(default)]
    pub shortcuts: ShortcutConfig,

    /// Fixed position reported for location requests.
    pub location: Option<LocationConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Stable id across registrations; defaults to the webhook id.
    pub permanent_id: Option<String>,
    /// Registered device id; defaults to the profile name.
    pub device_id: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            permanent_id: None,
            device_id: None,
        }
    }
}

fn default_device_name() -> String {
    "hacompanion".into()
}

/// Update cadence and gating. Durations are in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct UpdateConfig {
    /// Foreground keep-alive interval; 0 disables it.
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval: u64,
    #[serde(default = "default_true")]
    pub location_enabled: bool,
    #[serde(default = "default_true")]
    pub location_on_notification: bool,
    #[serde(default = "default_true")]
    pub location_on_background_fetch: bool,
    #[serde(default = "default_true")]
    pub confirm_before_opening_url: bool,
    #[serde(default = "default_background_budget")]
    pub background_budget: u64,
    #[serde(default = "default_api_wait")]
    pub api_wait_timeout: u64,
    /// Report action runs to the server as events.
    #[serde(default = "default_true")]
    pub remote_telemetry: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            periodic_interval: default_periodic_interval(),
            location_enabled: true,
            location_on_notification: true,
            location_on_background_fetch: true,
            confirm_before_opening_url: true,
            background_budget: default_background_budget(),
            api_wait_timeout: default_api_wait(),
            remote_telemetry: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_periodic_interval() -> u64 {
    300
}
fn default_background_budget() -> u64 {
    30
}
fn default_api_wait() -> u64 {
    10
}

/// External command that runs user shortcuts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShortcutConfig {
    #[serde(default = "default_shortcut_program")]
    pub program: String,
    /// Arguments placed before `run <name>`.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            program: default_shortcut_program(),
            args: Vec::new(),
        }
    }
}

fn default_shortcut_program() -> String {
    "shortcuts".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters.
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
}

fn default_accuracy() -> f64 {
    25.0
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "hacompanion", "hacompanion").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("hacompanion");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with `__`:
/// `HACOMPANION_PROFILES__HOME__SERVER=https://...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

impl Config {
    /// The named profile, or the default one.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(name, profile)| (name.as_str(), profile))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }

    /// A copy safe to print: plaintext tokens are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for profile in copy.profiles.values_mut() {
            if profile.token.is_some() {
                profile.token = Some("********".into());
            }
        }
        copy
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the access token: env var, then system keyring, then plaintext.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env (or the global variable) → env var lookup
    let env_name = profile.token_env.as_deref().unwrap_or(TOKEN_ENV);
    if let Ok(val) = std::env::var(env_name) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

impl Profile {
    /// Where to reach the server.
    pub fn connection(&self) -> Result<ConnectionInfo, ConfigError> {
        let base_url = parse_url("server", &self.server)?;
        if self.webhook_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "webhook_id".into(),
                reason: "must not be empty".into(),
            });
        }
        let mut connection = ConnectionInfo::new(base_url, self.webhook_id.clone());
        connection.cloudhook_url = self
            .cloudhook_url
            .as_deref()
            .map(|raw| parse_url("cloudhook_url", raw))
            .transpose()?;
        Ok(connection)
    }

    /// Connection plus the resolved access token.
    pub fn credentials(&self, profile_name: &str) -> Result<(ConnectionInfo, TokenInfo), ConfigError> {
        let connection = self.connection()?;
        let token = resolve_token(self, profile_name)?;
        Ok((connection, TokenInfo::new(token)))
    }

    pub fn transport(&self, defaults: &Defaults) -> TransportConfig {
        let tls = if self.insecure.unwrap_or(defaults.insecure) {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.timeout.unwrap_or(defaults.timeout)),
        }
    }

    /// Runtime settings for the companion.
    pub fn settings(&self, defaults: &Defaults) -> Settings {
        let updates = &self.updates;
        Settings {
            url_scheme: defaults.url_scheme.clone(),
            periodic_update_interval: (updates.periodic_interval > 0)
                .then(|| Duration::from_secs(updates.periodic_interval)),
            location_enabled: updates.location_enabled,
            location_update_on_notification: updates.location_on_notification,
            location_update_on_background_fetch: updates.location_on_background_fetch,
            confirm_before_opening_url: updates.confirm_before_opening_url,
            background_budget: Duration::from_secs(updates.background_budget),
            api_wait_timeout: Duration::from_secs(updates.api_wait_timeout),
            remote_telemetry: updates.remote_telemetry,
        }
    }

    pub fn identity(&self, profile_name: &str) -> DeviceIdentity {
        DeviceIdentity {
            permanent_id: self
                .device
                .permanent_id
                .clone()
                .unwrap_or_else(|| self.webhook_id.clone()),
            name: self.device.name.clone(),
            device_id: self
                .device
                .device_id
                .clone()
                .unwrap_or_else(|| profile_name.to_owned()),
        }
    }

    /// The fixed location fix, if one is configured.
    pub fn location_fix(&self) -> Option<LocationUpdate> {
        self.location.map(|loc| LocationUpdate {
            gps: [loc.latitude, loc.longitude],
            gps_accuracy: loc.accuracy,
            battery: None,
            speed: None,
            altitude: None,
            course: None,
            vertical_accuracy: None,
        })
    }

    pub fn shortcut_runner(&self) -> ProcessShortcutRunner {
        ProcessShortcutRunner::new(&self.shortcuts.program).with_args(self.shortcuts.args.clone())
    }

    /// A starter profile for `config init`.
    pub fn template(server: &str, webhook_id: &str) -> Self {
        Self {
            server: server.into(),
            webhook_id: webhook_id.into(),
            cloudhook_url: None,
            token: None,
            token_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            device: DeviceConfig::default(),
            updates: UpdateConfig::default(),
            shortcuts: ShortcutConfig::default(),
            location: None,
        }
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}
