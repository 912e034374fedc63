//! Config subcommand handlers.

use std::io::BufRead;

use serde_json::json;

use hacompanion_config::{self as config, Config, KEYRING_SERVICE, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output::Printer;

// ── Helpers ─────────────────────────────────────────────────────────

fn store_token(profile_name: &str, token: &str) -> Result<(), CliError> {
    let keyring_err = |e: keyring::Error| CliError::Keyring {
        message: e.to_string(),
    };
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .map_err(keyring_err)?
        .set_password(token)
        .map_err(keyring_err)
}

fn read_token_line() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let token = line.trim().to_owned();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }
    Ok(token)
}

fn profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts, printer: Printer) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = config::config_path();
            printer.emit(path.display(), &json!({ "path": path }));
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?.redacted();
            let rendered = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to render config: {e}"),
            })?;
            printer.emit(rendered.trim_end(), &serde_json::to_value(&cfg)?);
            Ok(())
        }

        ConfigCommand::Init {
            server,
            webhook_id,
            device_name,
            token,
            plaintext,
            force,
        } => {
            let mut cfg = config::load_config()?;
            let name = global.profile.clone().unwrap_or_else(|| "default".into());
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::Validation {
                    field: "profile".into(),
                    reason: format!("profile '{name}' already exists (use --force to replace it)"),
                });
            }

            let mut profile = Profile::template(&server, &webhook_id);
            if let Some(device_name) = device_name {
                profile.device.name = device_name;
            }
            // Validate before anything is written.
            profile.connection()?;

            match token {
                Some(token) if plaintext => profile.token = Some(token),
                Some(token) => store_token(&name, &token)?,
                None => {}
            }

            if cfg.profiles.is_empty() {
                cfg.default_profile = Some(name.clone());
            }
            cfg.profiles.insert(name.clone(), profile);
            config::save_config(&cfg)?;

            let path = config::config_path();
            printer.emit(
                format!("profile '{name}' saved to {}", path.display()),
                &json!({ "profile": name, "path": path }),
            );
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            for (name, profile) in &cfg.profiles {
                let marker = if name == default { "*" } else { " " };
                printer.emit(
                    format!("{marker} {name}\t{}", profile.server),
                    &json!({ "name": name, "server": profile.server, "default": name == default }),
                );
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", "),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            printer.emit(
                format!("default profile is now '{name}'"),
                &json!({ "default_profile": name }),
            );
            Ok(())
        }

        ConfigCommand::SetToken { token } => {
            let cfg = config::load_config()?;
            let name = profile_name(global, &cfg);
            let token = match token {
                Some(token) => token,
                None => read_token_line()?,
            };
            store_token(&name, &token)?;
            printer.emit(
                format!("token for '{name}' stored in the system keyring"),
                &json!({ "profile": name, "stored": "keyring" }),
            );
            Ok(())
        }
    }
}
