//! CLI configuration: thin wrapper around `canopy_config`.
//!
//! Re-exports the shared types and layers `GlobalOpts` overrides
//! (`--url`, `--farm`, `--anon-key`, `--insecure`, `--timeout`) on top of
//! the active profile.

use std::time::Duration;

use secrecy::SecretString;

use canopy_core::{AuthCredentials, FarmConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use canopy_config::{
    Config, Defaults, Profile, config_path, load_config_or_default, parse_url, save_config,
    store_secret,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names for error help text.
pub fn available_profiles(config: &Config) -> String {
    let mut names: Vec<_> = config.profiles.keys().cloned().collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort();
    names.join(", ")
}

/// Translate a `Profile` + global flags into a `FarmConfig`.
///
/// Flags win over profile values. One-shot commands need neither
/// periodic refresh nor realtime sync, so both are off.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
    global: &GlobalOpts,
) -> Result<FarmConfig, CliError> {
    let url = parse_url(global.url.as_deref().unwrap_or(&profile.url))?;

    let farm_id = global.farm.as_deref().unwrap_or(&profile.farm_id).trim();
    if farm_id.is_empty() {
        return Err(CliError::Validation {
            field: "farm".into(),
            reason: format!("profile '{profile_name}' has no farm_id; pass --farm"),
        });
    }

    let auth = AuthCredentials {
        anon_key: resolve_anon_key_with_flag(profile, profile_name, global)?,
        access_token: canopy_config::resolve_access_token(profile, profile_name),
    };

    let tls = if global.insecure || profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = FarmConfig::new(url, auth, farm_id);
    config.user_id.clone_from(&profile.user_id);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(global.timeout));
    config.realtime_enabled = false;
    config.refresh_interval_secs = 0;
    config.layer_mode = profile.layer_mode.unwrap_or(defaults.layer_mode);
    Ok(config)
}

/// Build a `FarmConfig` from flags alone when no profile matches.
pub fn from_flags(global: &GlobalOpts, profile_name: String) -> Result<FarmConfig, CliError> {
    let url_str = global.url.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;
    let url = parse_url(url_str)?;

    let farm_id = global.farm.clone().ok_or_else(|| CliError::Validation {
        field: "farm".into(),
        reason: "no profile configured; pass --farm".into(),
    })?;
    let anon_key = global
        .anon_key
        .clone()
        .map(SecretString::from)
        .ok_or(CliError::NoCredentials {
            profile: profile_name,
        })?;

    let mut config = FarmConfig::new(url, AuthCredentials::anon(anon_key), farm_id);
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    config.timeout = Duration::from_secs(global.timeout);
    config.realtime_enabled = false;
    config.refresh_interval_secs = 0;
    Ok(config)
}

fn resolve_anon_key_with_flag(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<SecretString, CliError> {
    if let Some(ref key) = global.anon_key {
        return Ok(SecretString::from(key.clone()));
    }
    Ok(canopy_config::resolve_anon_key(profile, profile_name)?)
}
