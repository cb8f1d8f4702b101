//! boardflash - Flash firmware to attached development boards
//!
//! Finds boards through every enabled backend (mass-storage volumes, ST-LINK
//! probes, pyOCD probes), picks the ones a request targets and flashes them.
//!
//! The process exit code is the outcome code of a single board, or the sum
//! of the outcome codes of a batch (0 when every board was flashed).

mod cli;
mod commands;

use boardflash_flash::{BackendRegistry, DispatchMode, FlashConfig};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Flash(args) => {
            if let Some(timeout) = args.timeout {
                config.attempt_timeout_secs = timeout;
            }
            if args.parallel {
                config.dispatch = DispatchMode::Parallel;
            }
            let registry = BackendRegistry::from_config(&config);
            let code = commands::flash::run_flash(registry, &config, &args)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::ListDevices { json } => {
            let registry = BackendRegistry::from_config(&config);
            commands::list_devices(&registry, json)
        }
        Commands::ListBackends => {
            commands::list_backends();
            Ok(())
        }
        Commands::ListPlatforms => {
            let registry = BackendRegistry::from_config(&config);
            commands::list_platforms(&registry);
            Ok(())
        }
    }
}

/// Load the configuration file, or the defaults when none is given
fn load_config(path: Option<&Path>) -> Result<FlashConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = FlashConfig::from_toml_file(path)?;
            log::debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(FlashConfig::default()),
    }
}
