//! `canopy config`: manage profiles in the config file and keyring.

use dialoguer::{Input, Select};

use canopy_core::LayerMode;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const MASK: &str = "********";

const SETTABLE_KEYS: &str =
    "url, farm_id, user_id, anon_key_env, timeout, realtime, insecure, layer_mode, ca_cert";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),
        ConfigCommand::Show => {
            show(global);
            Ok(())
        }
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let name = config::active_profile_name(global, &cfg);
            let profile = cfg
                .profiles
                .entry(name.clone())
                .or_insert_with(|| Profile::new("", ""));
            apply_setting(profile, &key, value)?;
            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{name}'");
            Ok(())
        }
        ConfigCommand::SetToken { profile, access } => {
            let cfg = config::load_config_or_default();
            let name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            ensure_profile(&cfg, &name)?;
            let kind = if access { Secret::AccessToken } else { Secret::AnonKey };
            let value = read_secret(kind)?;
            config::store_secret(&name, kind.keyring_name(), &value)?;
            eprintln!("✓ {} stored in system keyring for profile '{name}'", kind.label());
            Ok(())
        }
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            match profile_lines(&cfg) {
                lines if lines.is_empty() => {
                    eprintln!("No profiles configured. Run: canopy config init");
                }
                lines => println!("{}", lines.join("\n")),
            }
            Ok(())
        }
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            ensure_profile(&cfg, &name)?;
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }
    }
}

/// Secrets a profile can keep in the keyring.
#[derive(Debug, Clone, Copy)]
enum Secret {
    AnonKey,
    AccessToken,
}

impl Secret {
    fn keyring_name(self) -> &'static str {
        match self {
            Self::AnonKey => "anon-key",
            Self::AccessToken => "access-token",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::AnonKey => "Project key",
            Self::AccessToken => "Session token",
        }
    }
}

fn read_secret(kind: Secret) -> Result<String, CliError> {
    let value = rpassword::prompt_password(format!("{}: ", kind.label())).map_err(prompt_err)?;
    if value.is_empty() {
        return Err(CliError::Validation {
            field: kind.keyring_name().replace('-', "_"),
            reason: format!("{} cannot be empty", kind.label().to_lowercase()),
        });
    }
    Ok(value)
}

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn ask(prompt: &str, default: Option<&str>, optional: bool) -> Result<String, CliError> {
    let mut input = Input::<String>::new()
        .with_prompt(prompt)
        .allow_empty(optional);
    if let Some(default) = default {
        input = input.default(default.to_owned());
    }
    input
        .interact_text()
        .map(|s| s.trim().to_owned())
        .map_err(prompt_err)
}

fn init() -> Result<(), CliError> {
    let path = config::config_path();
    eprintln!("canopy configuration wizard ({})\n", path.display());

    let name = ask("Profile name", Some("default"), false)?;
    let url = ask("Backend URL", None, false)?;
    config::parse_url(&url)?;
    let farm_id = ask("Farm id", None, false)?;
    let user_id = ask("User id (blank to skip)", None, true)?;
    let key = read_secret(Secret::AnonKey)?;

    let in_keyring = Select::new()
        .with_prompt("Where to store the project key?")
        .items(&["System keyring", "Config file (plaintext)"])
        .default(0)
        .interact()
        .map_err(prompt_err)?
        == 0;

    let mut profile = Profile::new(url, &farm_id);
    profile.user_id = Some(user_id).filter(|u| !u.is_empty());
    if in_keyring {
        config::store_secret(&name, Secret::AnonKey.keyring_name(), &key)?;
    } else {
        profile.anon_key = Some(key);
    }

    let mut cfg = config::load_config_or_default();
    cfg.profiles.insert(name.clone(), profile);
    cfg.default_profile = Some(name.clone());
    config::save_config(&cfg)?;

    eprintln!("✓ Profile '{name}' written and set as default");
    eprintln!("  Try: canopy topology show");
    Ok(())
}

fn show(global: &GlobalOpts) {
    let mut cfg = config::load_config_or_default();
    redact(&mut cfg);
    let out = output::render_single(
        &global.output,
        &cfg,
        |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("{e}")),
        |_| config::config_path().display().to_string(),
    );
    output::print_output(&out, global.quiet);
}

/// Mask plaintext secrets before the config is printed.
fn redact(cfg: &mut Config) {
    for profile in cfg.profiles.values_mut() {
        for secret in [&mut profile.anon_key, &mut profile.access_token] {
            if secret.is_some() {
                *secret = Some(MASK.into());
            }
        }
    }
}

fn ensure_profile(cfg: &Config, name: &str) -> Result<(), CliError> {
    if cfg.profiles.contains_key(name) {
        return Ok(());
    }
    Err(CliError::ProfileNotFound {
        available: config::available_profiles(cfg),
        name: name.to_owned(),
    })
}

/// Sorted profile names, the default one marked with `*`.
fn profile_lines(cfg: &Config) -> Vec<String> {
    let default = cfg.default_profile.as_deref().unwrap_or("default");
    let mut names: Vec<&String> = cfg.profiles.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            if name == default {
                format!("{name} *")
            } else {
                name.clone()
            }
        })
        .collect()
}

fn invalid(field: &str, reason: &str) -> CliError {
    CliError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Write one `config set` value into a profile. Keys accept either
/// snake_case or kebab-case.
fn apply_setting(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    match key.replace('-', "_").as_str() {
        "url" => {
            config::parse_url(&value)?;
            profile.url = value;
        }
        "farm_id" | "farm" => profile.farm_id = value,
        "user_id" => profile.user_id = Some(value),
        "anon_key_env" => profile.anon_key_env = Some(value),
        "timeout" => {
            let secs = value
                .parse()
                .map_err(|_| invalid("timeout", "must be a number (seconds)"))?;
            profile.timeout = Some(secs);
        }
        "realtime" => {
            profile.realtime = value
                .parse()
                .map_err(|_| invalid("realtime", "must be 'true' or 'false'"))?;
        }
        "insecure" => {
            let insecure = value
                .parse()
                .map_err(|_| invalid("insecure", "must be 'true' or 'false'"))?;
            profile.insecure = Some(insecure);
        }
        "layer_mode" => {
            let mode: LayerMode = value
                .parse()
                .map_err(|_| invalid("layer_mode", "must be 'exclusive' or 'independent'"))?;
            profile.layer_mode = Some(mode);
        }
        "ca_cert" => profile.ca_cert = Some(value.into()),
        _ => {
            return Err(invalid(
                key,
                &format!("unknown config key '{key}'. Valid keys: {SETTABLE_KEYS}"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_secrets() {
        let mut cfg = Config::default();
        let mut profile = Profile::new("https://farm.example.co", "f-1");
        profile.anon_key = Some("super-secret".into());
        cfg.profiles.insert("default".into(), profile);

        redact(&mut cfg);

        let profile = &cfg.profiles["default"];
        assert_eq!(profile.anon_key.as_deref(), Some(MASK));
        assert_eq!(profile.access_token, None);
        assert_eq!(profile.farm_id, "f-1");
    }

    #[test]
    fn settings_accept_kebab_case_keys() {
        let mut profile = Profile::new("https://farm.example.co", "f-1");
        apply_setting(&mut profile, "layer-mode", "independent".into()).unwrap();
        apply_setting(&mut profile, "user-id", "u-9".into()).unwrap();
        apply_setting(&mut profile, "timeout", "45".into()).unwrap();

        assert_eq!(profile.layer_mode, Some(LayerMode::Independent));
        assert_eq!(profile.user_id.as_deref(), Some("u-9"));
        assert_eq!(profile.timeout, Some(45));
    }

    #[test]
    fn bad_setting_values_are_rejected() {
        let mut profile = Profile::new("https://farm.example.co", "f-1");
        assert!(apply_setting(&mut profile, "realtime", "sometimes".into()).is_err());
        assert!(apply_setting(&mut profile, "colour", "blue".into()).is_err());
        assert!(profile.realtime);
    }

    #[test]
    fn profile_lines_mark_the_default() {
        let mut cfg = Config::default();
        cfg.profiles.insert("west".into(), Profile::new("https://a.example.co", "f-1"));
        cfg.profiles.insert("east".into(), Profile::new("https://b.example.co", "f-2"));
        cfg.default_profile = Some("west".into());

        assert_eq!(profile_lines(&cfg), vec!["east", "west *"]);
    }
}
