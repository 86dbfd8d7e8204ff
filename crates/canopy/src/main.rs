mod cli;
mod commands;
mod config;
mod error;
mod notify;
mod output;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use tracing_subscriber::EnvFilter;

use canopy_core::{FarmConfig, FarmController, Services};

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;
use crate::notify::{ConsoleNotifier, TerminalConfirm};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // No farm connection needed
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "canopy", &mut std::io::stdout());
            Ok(())
        }

        Command::Devices(cli::DevicesArgs {
            command: cli::DevicesCommand::Types { kind },
        }) => commands::devices::types(&kind, &cli.global),

        // Streams from the realtime feed without loading the farm
        Command::Watch(args) => {
            let farm_config = build_farm_config(&cli.global)?;
            commands::watch::handle(&farm_config, args, &cli.global).await
        }

        cmd => {
            let farm_config = build_farm_config(&cli.global)?;
            let controller = connect(farm_config, &cli.global).await?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &controller, &cli.global).await;
            controller.disconnect().await;
            result
        }
    }
}

/// Build a `FarmConfig` from the config file, profile, and CLI overrides.
fn build_farm_config(global: &GlobalOpts) -> Result<FarmConfig, CliError> {
    let cfg = config::load_config_or_default();
    let profile_name = config::active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return config::resolve_profile(profile, &profile_name, &cfg.defaults, global);
    }
    if global.profile.is_some() {
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: config::available_profiles(&cfg),
        });
    }

    config::from_flags(global, profile_name)
}

async fn connect(farm_config: FarmConfig, global: &GlobalOpts) -> Result<FarmController, CliError> {
    let notifier = ConsoleNotifier {
        quiet: global.quiet,
        color: output::stderr_color(&global.color),
    };
    let services = Services::rest(&farm_config)?
        .with_notifier(Arc::new(notifier))
        .with_confirm(Arc::new(TerminalConfirm {
            assume_yes: global.yes,
        }));

    let spinner = (!global.quiet && std::io::stderr().is_terminal()).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_message(format!("Loading farm {}", farm_config.farm_id));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let controller = FarmController::with_services(farm_config, services);
    let connected = controller.connect().await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    connected?;
    Ok(controller)
}
