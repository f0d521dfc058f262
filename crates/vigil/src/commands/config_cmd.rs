//! Config subcommand handlers.

use std::io::BufRead;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "url = \"{}\"", p.url);
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if !p.cameras.is_empty() {
            let quoted: Vec<String> = p.cameras.iter().map(|c| format!("\"{c}\"")).collect();
            let _ = writeln!(out, "cameras = [{}]", quoted.join(", "));
        }
        if let Some(ms) = p.confirm_timeout_ms {
            let _ = writeln!(out, "confirm_timeout_ms = {ms}");
        }
        if let Some(ms) = p.reconnect_initial_ms {
            let _ = writeln!(out, "reconnect_initial_ms = {ms}");
        }
        if let Some(ms) = p.reconnect_max_ms {
            let _ = writeln!(out, "reconnect_max_ms = {ms}");
        }
        if let Some(n) = p.max_retries {
            let _ = writeln!(out, "max_retries = {n}");
        }
    }

    out
}

/// A copy of `cfg` safe to print as JSON.
fn redacted(cfg: &Config) -> Config {
    let mut copy = cfg.clone();
    for profile in copy.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("****".into());
        }
    }
    copy
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be a non-negative integer".into(),
    })
}

/// Apply `key = value` to a profile.
fn set_profile_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key {
        "url" => {
            vigil_config::parse_bus_url(&value)?;
            profile.url = value;
        }
        "token" => profile.token = Some(value),
        "token_env" | "token-env" => profile.token_env = Some(value),
        "cameras" => {
            profile.cameras = value
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_owned)
                .collect();
        }
        "confirm_timeout_ms" | "confirm-timeout-ms" => {
            profile.confirm_timeout_ms = Some(parse_number(key, &value)?);
        }
        "reconnect_initial_ms" | "reconnect-initial-ms" => {
            profile.reconnect_initial_ms = Some(parse_number(key, &value)?);
        }
        "reconnect_max_ms" | "reconnect-max-ms" => {
            profile.reconnect_max_ms = Some(parse_number(key, &value)?);
        }
        "max_retries" | "max-retries" => profile.max_retries = Some(parse_number(key, &value)?),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: url, token, token_env, cameras, \
                     confirm_timeout_ms, reconnect_initial_ms, reconnect_max_ms, max_retries"
                ),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init ────────────────────────────────────────────────────
        ConfigCommand::Init {
            url,
            name,
            cameras,
            token_env,
        } => {
            vigil_config::parse_bus_url(&url)?;

            let mut cfg = config::load_config_or_default();
            cfg.profiles.insert(
                name.clone(),
                Profile {
                    url,
                    token_env,
                    cameras,
                    ..Profile::default()
                },
            );
            cfg.default_profile = Some(name.clone());

            let path = config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Configuration written to {}", path.display());
                eprintln!("  Active profile: {name}");
                eprintln!("\n  Store a token with: vigil config set-token --profile {name}");
            }
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config_redacted, |_| {
                config::config_path().display().to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            set_profile_key(profile, &key, value)?;

            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Set {key} on profile '{profile_name}'");
            }
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: vigil config init --url <ws-url>");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();

            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Default profile set to '{name}'");
            }
            Ok(())
        }

        // ── SetToken ────────────────────────────────────────────────
        ConfigCommand::SetToken { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));

            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name: profile_name,
                });
            }

            let token = match global.token {
                Some(ref token) => token.clone(),
                None => {
                    if !global.quiet {
                        eprintln!("Paste the bearer token and press Enter:");
                    }
                    let mut line = String::new();
                    std::io::stdin().lock().read_line(&mut line)?;
                    line.trim().to_owned()
                }
            };

            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }

            vigil_config::store_token(&profile_name, &token)?;
            if !global.quiet {
                eprintln!("✓ Token stored in system keyring for profile '{profile_name}'");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cameras_are_split_and_trimmed() {
        let mut profile = Profile::default();
        set_profile_key(&mut profile, "cameras", "front_door, garage,,yard".into()).unwrap();
        assert_eq!(profile.cameras, vec!["front_door", "garage", "yard"]);
    }

    #[test]
    fn numeric_keys_reject_text() {
        let mut profile = Profile::default();
        assert!(set_profile_key(&mut profile, "max_retries", "lots".into()).is_err());
        set_profile_key(&mut profile, "confirm-timeout-ms", "2500".into()).unwrap();
        assert_eq!(profile.confirm_timeout_ms, Some(2500));
    }

    #[test]
    fn url_key_is_validated() {
        let mut profile = Profile::default();
        assert!(set_profile_key(&mut profile, "url", "http://nvr".into()).is_err());
        set_profile_key(&mut profile, "url", "ws://nvr:5000/ws".into()).unwrap();
        assert_eq!(profile.url, "ws://nvr:5000/ws");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut profile = Profile::default();
        let err = set_profile_key(&mut profile, "site", "x".into()).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }

    #[test]
    fn redaction_masks_plaintext_tokens() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                url: "ws://nvr/ws".into(),
                token: Some("s3cret".into()),
                ..Profile::default()
            },
        );
        let shown = format_config_redacted(&redacted(&cfg));
        assert!(shown.contains("token = \"****\""));
        assert!(!shown.contains("s3cret"));
    }
}
