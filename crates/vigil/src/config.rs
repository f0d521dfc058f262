//! CLI configuration: a thin wrapper around `vigil_config`.
//!
//! Adds resolution that respects `GlobalOpts` overrides (--url, --token).

use clap::ArgMatches;
use clap::ValueEnum;
use clap::parser::ValueSource;
use secrecy::SecretString;
use tracing::warn;

use vigil_config::{ConfigError, Defaults};
use vigil_core::HubConfig;

use crate::cli::{ColorMode, GlobalOpts, OutputFormat};
use crate::error::CliError;

pub use vigil_config::{Config, Profile, config_path, load_config_or_default, save_config};

/// Fill `--output`, `--color` and `--timeout` from the config file's
/// `[defaults]` table when neither the command line nor the environment
/// set them.
pub fn apply_file_defaults(global: &mut GlobalOpts, matches: &ArgMatches, defaults: &Defaults) {
    let unset = |id: &str| matches.value_source(id) == Some(ValueSource::DefaultValue);

    if unset("output") {
        match <OutputFormat as ValueEnum>::from_str(&defaults.output, true) {
            Ok(output) => global.output = output,
            Err(_) => warn!(value = %defaults.output, "ignoring unknown defaults.output"),
        }
    }
    if unset("color") {
        match <ColorMode as ValueEnum>::from_str(&defaults.color, true) {
            Ok(color) => global.color = color,
            Err(_) => warn!(value = %defaults.color, "ignoring unknown defaults.color"),
        }
    }
    if unset("timeout") {
        global.timeout = defaults.timeout;
    }
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names, for help text.
pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        "(none)".into()
    } else {
        config.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// A connection target resolved from flags and the config file.
pub struct Resolved {
    pub hub: HubConfig,
    pub cameras: Vec<String>,
}

/// Build a `HubConfig` from the config file, profile, and CLI overrides.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = load_config_or_default();

    let (mut hub, cameras) = match vigil_config::select_profile(&cfg, global.profile.as_deref()) {
        Ok((profile_name, profile)) => {
            let mut profile = profile.clone();
            if let Some(ref url) = global.url {
                profile.url.clone_from(url);
            }
            let hub = vigil_config::profile_to_hub_config(&profile, &profile_name)?;
            (hub, profile.cameras)
        }
        // An explicitly requested profile must exist.
        Err(ConfigError::UnknownProfile { name }) if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name,
                available: available_profiles(&cfg),
            });
        }
        // No usable profile: flags alone must name the bus.
        Err(_) => {
            let url = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            let hub = HubConfig::new(vigil_config::parse_bus_url(url)?);
            (hub, Vec::new())
        }
    };

    if let Some(ref token) = global.token {
        hub.token = Some(SecretString::from(token.clone()));
    }

    Ok(Resolved { hub, cameras })
}
