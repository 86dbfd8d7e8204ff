//! Shared configuration for the canopy CLI.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `canopy_core::FarmConfig`. The CLI adds
//! `GlobalOpts`-aware overrides on top.

use std::collections::HashMap;
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

use canopy_core::{AuthCredentials, FarmConfig, LayerMode, TlsVerification};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "canopy";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

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
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named farm profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub layer_mode: LayerMode,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            layer_mode: LayerMode::default(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_realtime() -> bool {
    true
}

/// A named farm profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "https://farm.example.co").
    pub url: String,

    pub farm_id: String,

    /// Scopes the rack and shelf change feeds.
    pub user_id: Option<String>,

    /// Project key (plaintext; prefer keyring or env var).
    pub anon_key: Option<String>,

    /// Environment variable name containing the project key.
    pub anon_key_env: Option<String>,

    /// Session token (plaintext; prefer keyring).
    pub access_token: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    /// Override timeout.
    pub timeout: Option<u64>,

    #[serde(default = "default_realtime")]
    pub realtime: bool,

    /// Override `defaults.layer_mode`.
    pub layer_mode: Option<LayerMode>,
}

impl Profile {
    pub fn new(url: impl Into<String>, farm_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            farm_id: farm_id.into(),
            realtime: true,
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "canopy", "canopy").map_or_else(
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
    p.push("canopy");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. `CANOPY_`-prefixed variables override file
/// values; nested keys use a double underscore (`CANOPY_DEFAULTS__OUTPUT`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CANOPY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
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

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str, secret: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/{secret}"),
    )?)
}

fn keyring_secret(profile_name: &str, secret: &str) -> Option<SecretString> {
    keyring_entry(profile_name, secret)
        .ok()?
        .get_password()
        .ok()
        .map(SecretString::from)
}

/// Store a profile secret (`anon-key` or `access-token`) in the keyring.
pub fn store_secret(profile_name: &str, secret: &str, value: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name, secret)?.set_password(value)?;
    Ok(())
}

/// Resolve the project key: `anon_key_env` → keyring → plaintext.
pub fn resolve_anon_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.anon_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Some(secret) = keyring_secret(profile_name, "anon-key") {
        return Ok(secret);
    }

    if let Some(ref key) = profile.anon_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve the optional session token: `CANOPY_ACCESS_TOKEN` → keyring →
/// plaintext.
pub fn resolve_access_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Ok(token) = std::env::var("CANOPY_ACCESS_TOKEN") {
        return Some(SecretString::from(token));
    }
    keyring_secret(profile_name, "access-token")
        .or_else(|| profile.access_token.clone().map(SecretString::from))
}

pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<AuthCredentials, ConfigError> {
    Ok(AuthCredentials {
        anon_key: resolve_anon_key(profile, profile_name)?,
        access_token: resolve_access_token(profile, profile_name),
    })
}

/// Parse and validate a profile's backend URL.
pub fn parse_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "url".into(),
            reason: format!("expected http or https, got '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// Build a `FarmConfig` from a profile, with no command-line overrides.
pub fn profile_to_farm_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<FarmConfig, ConfigError> {
    if profile.farm_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "farm_id".into(),
            reason: format!("profile '{profile_name}' has no farm_id"),
        });
    }
    let url = parse_url(&profile.url)?;
    let auth = resolve_auth(profile, profile_name)?;

    let tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = FarmConfig::new(url, auth, profile.farm_id.clone());
    config.user_id.clone_from(&profile.user_id);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.realtime_enabled = profile.realtime;
    config.layer_mode = profile.layer_mode.unwrap_or(defaults.layer_mode);
    Ok(config)
}
