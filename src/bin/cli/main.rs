#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dispsnap::config::{DEFAULT_CONFIG_PATH, Settings};
use dispsnap::display::DisplayEngine;
use dispsnap::display::fixture::FixtureMachine;
use dispsnap::display::profile::{Profile, ProfileStore};
use dispsnap::utils::tracing::setup_tracing;
use serde_json::json;
use tracing::{error, info};

/// Global CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Recorded machine the display services run against
    #[arg(short, long, default_value = "machine.json")]
    fixture: PathBuf,

    /// Settings file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable terminal logging
    #[arg(short, long)]
    log: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// List of available subcommands
#[derive(Subcommand, Debug)]
#[command(rename_all = "camelCase")]
enum Commands {
    Identifiers {
        /// Include connected displays that are not in use
        #[arg(short, long)]
        all: bool,
    },
    ShowActive,
    Capture {
        name: String,
    },
    ListProfiles,
    Status {
        name: String,
    },
    Apply {
        name: String,
    },
    DeleteProfile {
        name: String,
    },
}

/// Entry point
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    setup_tracing(&settings.log_path, &settings.log_level, cli.log)?;

    // Execute the command
    if let Err(e) = handle_command(&cli, &settings) {
        error!("Command {:?} failed: {}", cli.command, e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn open_engine(fixture: &Path, settings: &Settings) -> dispsnap::Result<(FixtureMachine, DisplayEngine)> {
    let machine = FixtureMachine::load(fixture)?;
    let engine = DisplayEngine::new(
        Box::new(machine.clone()),
        Some(Box::new(machine.clone())),
        settings.apply.clone(),
    )?;
    Ok((machine, engine))
}

/// Execute the selected subcommand
fn handle_command(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = ProfileStore::new(&settings.profile_dir);

    match &cli.command {
        Commands::Identifiers { all } => {
            let (_, mut engine) = open_engine(&cli.fixture, settings)?;
            let identifiers = if *all {
                engine.get_all_connected_display_identifiers()?
            } else {
                engine.get_current_display_identifiers()?
            };
            for identifier in identifiers {
                println!("{}", identifier);
            }
        }
        Commands::ShowActive => {
            let (_, engine) = open_engine(&cli.fixture, settings)?;
            println!("{}", serde_json::to_string_pretty(engine.get_active_config())?);
        }
        Commands::Capture { name } => {
            let (_, engine) = open_engine(&cli.fixture, settings)?;
            let profile = Profile::new(name, engine.get_active_config().clone());
            let path = store.save(&profile)?;
            println!("{}", path.display());
        }
        Commands::ListProfiles => {
            for name in store.list()? {
                println!("{}", name);
            }
        }
        Commands::Status { name } => {
            let profile = store.load(name)?;
            let (_, engine) = open_engine(&cli.fixture, settings)?;
            let differences = engine.diff_against_active(&profile.snapshot);
            let status = json!({
                "name": profile.name,
                "created": profile.created,
                "active": differences.is_empty(),
                "possible": engine.is_possible_config(&profile.snapshot),
                "valid": engine.is_valid_config(&profile.snapshot)?,
                "differences": differences,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Apply { name } => {
            let profile = store.load(name)?;
            let (machine, mut engine) = open_engine(&cli.fixture, settings)?;
            let outcome = engine.set_active_config(&profile.snapshot);

            // The machine records every change, including those of a failed apply
            machine.save(&cli.fixture)?;
            let report = outcome?;
            info!("Profile '{}' applied", name);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::DeleteProfile { name } => {
            store.delete(name)?;
        }
    }

    Ok(())
}
