//! Integration tests for the `canopy` CLI binary.
//!
//! These cover argument parsing, help output, shell completions, config
//! handling and error exit codes, all without a live backend.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `canopy` binary with env isolation.
///
/// Clears every `CANOPY_*` variable the CLI reads and points the config
/// directories at `home`, so tests never touch the user's configuration.
fn canopy_in(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("canopy");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("CANOPY_PROFILE")
        .env_remove("CANOPY_URL")
        .env_remove("CANOPY_FARM")
        .env_remove("CANOPY_ANON_KEY")
        .env_remove("CANOPY_ACCESS_TOKEN")
        .env_remove("CANOPY_OUTPUT")
        .env_remove("CANOPY_INSECURE")
        .env_remove("CANOPY_TIMEOUT");
    cmd
}

fn canopy() -> assert_cmd::Command {
    canopy_in(Path::new("/tmp/canopy-cli-test-nonexistent"))
}

/// Write a config file where the CLI looks for it on Linux.
fn write_config(home: &Path, contents: &str) {
    let dir = home.join(".config").join("canopy");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), contents).unwrap();
}

const CONFIG: &str = r#"
default_profile = "greenhouse"

[profiles.greenhouse]
url = "https://farm.example.co"
farm_id = "farm-1"
anon_key = "plaintext-project-key"
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_usage() {
    let output = canopy().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "expected usage in:\n{text}");
}

#[test]
fn help_lists_top_level_commands() {
    canopy().arg("--help").assert().success().stdout(
        predicate::str::contains("rows")
            .and(predicate::str::contains("racks"))
            .and(predicate::str::contains("shelves"))
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn version_flag() {
    canopy()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("canopy"));
}

#[test]
fn node_commands_share_subcommands() {
    for level in ["rows", "racks", "shelves"] {
        canopy().args([level, "--help"]).assert().success().stdout(
            predicate::str::contains("add")
                .and(predicate::str::contains("rename"))
                .and(predicate::str::contains("remove"))
                .and(predicate::str::contains("move"))
                .and(predicate::str::contains("order")),
        );
    }
}

#[test]
fn order_requires_ids() {
    canopy().args(["racks", "order", "--parent", "r1"]).assert().code(2);
}

#[test]
fn invalid_output_format() {
    canopy()
        .args(["--output", "xml", "topology", "show"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("xml"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn completions_for_each_shell() {
    for shell in ["bash", "zsh", "fish"] {
        canopy()
            .args(["completions", shell])
            .assert()
            .success()
            .stdout(predicate::str::contains("canopy"));
    }
}

// ── Commands that need no connection ────────────────────────────────

#[test]
fn device_types_for_a_shelf() {
    canopy()
        .args(["devices", "types", "shelf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("light").and(predicate::str::contains("sensor")));
}

#[test]
fn device_types_reject_unknown_kinds() {
    canopy()
        .args(["devices", "types", "greenhouse"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("row, rack or shelf"));
}

// ── Connection setup errors ─────────────────────────────────────────

#[test]
fn topology_without_config_points_at_init() {
    canopy()
        .args(["topology", "show"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config init"));
}

#[test]
fn unknown_profile_exits_not_found() {
    canopy()
        .args(["--profile", "nope", "rows", "list"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn flags_without_farm_are_a_usage_error() {
    canopy()
        .args(["--url", "https://farm.example.co", "rows", "list"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--farm"));
}

#[test]
fn flags_without_key_exit_auth() {
    canopy()
        .args(["--url", "https://farm.example.co", "--farm", "f-1", "rows", "list"])
        .assert()
        .code(3);
}

#[test]
fn non_http_url_is_rejected() {
    canopy()
        .args([
            "--url",
            "ftp://farm.example.co",
            "--farm",
            "f-1",
            "--anon-key",
            "k",
            "rows",
            "list",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("http"));
}

#[test]
fn watch_rejects_unknown_tables() {
    canopy()
        .args([
            "--url",
            "https://farm.example.co",
            "--farm",
            "f-1",
            "--anon-key",
            "k",
            "watch",
            "greenhouses",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("greenhouses"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_subcommands_exist() {
    canopy().args(["config", "--help"]).assert().success().stdout(
        predicate::str::contains("init")
            .and(predicate::str::contains("show"))
            .and(predicate::str::contains("set-token"))
            .and(predicate::str::contains("use")),
    );
}

#[cfg(target_os = "linux")]
#[test]
fn config_show_masks_plaintext_keys() {
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), CONFIG);

    canopy_in(home.path())
        .args(["--output", "json", "config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("farm-1")
                .and(predicate::str::contains("********"))
                .and(predicate::str::contains("plaintext-project-key").not()),
        );
}

#[cfg(target_os = "linux")]
#[test]
fn config_set_writes_the_active_profile() {
    let home = tempfile::tempdir().unwrap();
    write_config(home.path(), CONFIG);

    canopy_in(home.path())
        .args(["config", "set", "layer_mode", "independent"])
        .assert()
        .success();

    let written =
        std::fs::read_to_string(home.path().join(".config/canopy/config.toml")).unwrap();
    assert!(written.contains("layer_mode = \"independent\""), "{written}");
}

#[test]
fn config_set_rejects_bad_values() {
    let home = tempfile::tempdir().unwrap();
    canopy_in(home.path())
        .args(["config", "set", "timeout", "soon"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("seconds"));
}

#[test]
fn config_use_unknown_profile() {
    let home = tempfile::tempdir().unwrap();
    canopy_in(home.path())
        .args(["config", "use", "nope"])
        .assert()
        .code(4);
}
