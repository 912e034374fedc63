//! Clap derive structures for the `hacompanion` CLI.
//!
//! Each trigger subcommand plays the role of one host callback; `run`
//! keeps the companion alive in the foreground.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hacompanion -- headless Home Assistant companion
#[derive(Debug, Parser)]
#[command(
    name = "hacompanion",
    version,
    about = "Route pushes, URLs, and shortcuts to a Home Assistant server",
    long_about = "A headless Home Assistant companion.\n\n\
        Every trigger subcommand delivers one external stimulus (a push,\n\
        a URL-scheme invocation, a quick action, a background tick...) and\n\
        reports how it completed. `run` stays connected in the foreground.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "HACOMPANION_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "plain", global = true)]
    pub output: OutputFormat,

    /// Log format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Answer yes to confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "HACOMPANION_INSECURE", global = true)]
    pub insecure: bool,

    /// Record remote calls instead of sending them
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One human-readable line per result
    Plain,
    /// One JSON document per result
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stay connected: cold connect, periodic updates, Ctrl-C to stop
    Run(RunArgs),

    #[command(flatten)]
    Trigger(TriggerCommand),

    /// Show how a push would be presented in the foreground
    Present {
        /// JSON payload, `@file`, or `-` for stdin
        payload: String,
    },

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Triggers ─────────────────────────────────────────────────────────

/// One stimulus delivered to a signed-in companion.
#[derive(Debug, Subcommand)]
pub enum TriggerCommand {
    /// Open a URL through the app's scheme (homeassistant://...)
    #[command(alias = "url")]
    OpenUrl {
        /// URL to open
        url: String,
    },

    /// Continue a universal link (https://.../?url=homeassistant://...)
    Activity {
        /// Web page URL of the activity
        url: String,
    },

    /// Deliver a push payload
    Push {
        /// JSON payload, `@file`, or `-` for stdin
        payload: String,
    },

    /// Run a background fetch tick
    Fetch,

    /// Use a home-screen quick action
    Shortcut {
        /// Shortcut type (`sendLocation` or an action identifier)
        shortcut_type: String,

        /// User info entries
        #[arg(long = "info", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        info: Vec<(String, String)>,
    },

    /// Complete a background transfer session
    Session {
        /// Session identifier (`hacompanion.webhook.<webhook_id>` for webhook calls)
        identifier: String,
    },

    /// Deliver a watch message
    Watch {
        /// Message identifier (e.g. `ActionRowPressed`)
        identifier: String,

        /// JSON object with the message content
        #[arg(long)]
        content: Option<String>,
    },

    /// Run a voice shortcut intent
    Intent(IntentArgs),

    /// Act on a delivered notification
    NotificationResponse(NotificationResponseArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Treat each stdin line as a URL to open
    #[arg(long)]
    pub stdin: bool,
}

// ── Intents ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct IntentArgs {
    #[command(subcommand)]
    pub command: IntentCommand,
}

#[derive(Debug, Subcommand)]
pub enum IntentCommand {
    /// Fire an event
    FireEvent {
        #[arg(long)]
        event_name: Option<String>,

        /// JSON object string
        #[arg(long)]
        payload: Option<String>,
    },

    /// Call a service (`domain.service`)
    CallService {
        #[arg(long)]
        service: Option<String>,

        /// JSON object string
        #[arg(long)]
        payload: Option<String>,
    },

    /// Send the current location
    SendLocation,

    /// Render a template
    RenderTemplate {
        #[arg(long)]
        template: Option<String>,
    },
}

// ── Notification responses ───────────────────────────────────────────

#[derive(Debug, Args)]
pub struct NotificationResponseArgs {
    /// Action identifier (`default` and `dismiss` name the system actions)
    pub action: String,

    /// Notification payload: JSON, `@file`, or `-` for stdin
    #[arg(long)]
    pub payload: Option<String>,

    /// Notification category
    #[arg(long, default_value = "")]
    pub category: String,

    /// Text typed into a text-input action
    #[arg(long)]
    pub text: Option<String>,

    /// Seconds to wait for the notification URL to be opened
    #[arg(long, default_value = "5")]
    pub wait: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the current configuration (tokens masked)
    Show,

    /// Create or replace a profile
    Init {
        /// Server base URL
        #[arg(long)]
        server: String,

        /// Webhook id issued at registration
        #[arg(long)]
        webhook_id: String,

        /// Device name reported to the server
        #[arg(long)]
        device_name: Option<String>,

        /// Access token to store
        #[arg(long, env = "HACOMPANION_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Write the token into the config file instead of the keyring
        #[arg(long, requires = "token")]
        plaintext: bool,

        /// Replace an existing profile
        #[arg(long)]
        force: bool,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store an access token in the system keyring
    SetToken {
        /// Token value (read from stdin when omitted)
        #[arg(long)]
        token: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    pub shell: clap_complete::Shell,
}

// ── Parsers ──────────────────────────────────────────────────────────

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}
