// ABOUTME: CLI entry point for frpdeck.
// ABOUTME: Parses arguments, loads the app config, and dispatches to Deck commands.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frpdeck_cli::{changes_liveness, init_config, summary_line, Deck};
use frpdeck_core::paths::DeploymentMode;
use frpdeck_core::{codec, DeckConfig, LogBus, ProcessSupervisor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "frpdeck")]
#[command(about = "Manage and run named frpc configurations")]
#[command(version = frpdeck_cli::VERSION)]
struct Cli {
    /// Path to the frpdeck config file
    #[arg(long, global = true, env = "FRPDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Write diagnostics to the log file instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a frpdeck config file with defaults
    Init {
        /// Directory for stored configurations (`~` is expanded)
        #[arg(long)]
        data_dir: Option<String>,

        /// Deployment mode: installed, development or packaged
        #[arg(long)]
        mode: Option<DeploymentMode>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    #[command(flatten)]
    Deck(DeckCommand),
}

/// Commands that work on the data directory.
#[derive(Subcommand, Debug)]
enum DeckCommand {
    /// List stored configurations
    List,

    /// Show one configuration
    Show {
        name: String,
    },

    /// Store settings read from a TOML file under a new name
    Add {
        name: String,

        /// TOML file with the agent settings
        #[arg(long)]
        from: PathBuf,
    },

    /// Store a TOML file, named after the file
    Import {
        file: PathBuf,
    },

    /// Rename a configuration or replace its settings
    Edit {
        name: String,

        /// New name
        #[arg(long)]
        rename: Option<String>,

        /// TOML file with replacement settings
        #[arg(long)]
        from: Option<PathBuf>,
    },

    /// Delete a configuration
    Remove {
        name: String,

        /// Delete even if it is marked as running
        #[arg(long)]
        force: bool,
    },

    /// Print the agent TOML for a configuration
    Render {
        name: String,
    },

    /// Show or change the frpc binary
    Binary {
        /// Use this binary
        #[arg(long, conflicts_with = "clear")]
        set: Option<PathBuf>,

        /// Forget the configured binary and use the bundled one
        #[arg(long)]
        clear: bool,
    },

    /// Start configurations and stream their output until Ctrl+C
    Run {
        /// Configurations to start (all when omitted)
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.log_file {
        frpdeck_log::init_file("frpdeck");
    } else if matches!(cli.command, Commands::Deck(DeckCommand::Run { .. })) {
        frpdeck_log::init();
    } else {
        frpdeck_log::init_for("frpdeck-core");
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => DeckConfig::default_path()?,
    };
    let command = match cli.command {
        Commands::Init {
            data_dir,
            mode,
            force,
        } => {
            let config = init_config(&config_path, data_dir, mode, force)?;
            println!("Wrote {}", config_path.display());
            println!("Data directory: {}", config.data_dir()?.display());
            return Ok(());
        }
        Commands::Deck(command) => command,
    };

    let config = DeckConfig::load_or_default(&config_path)?;
    let mut deck = Deck::open(&config)?;

    match command {
        DeckCommand::List => {
            if deck.records().is_empty() {
                println!("No configurations. Add one with `frpdeck add <name> --from <file>`.");
            }
            for record in deck.records() {
                println!("{}", summary_line(record));
            }
            Ok(())
        }
        DeckCommand::Show { name } => {
            let record = deck.record(&name)?;
            println!("Name:    {}", record.name);
            println!("Id:      {}", record.id);
            println!("File:    {}", record.agent_file(deck.data_dir()).display());
            println!("Running: {}", record.is_running);
            println!();
            print!("{}", codec::encode(&record.settings)?);
            Ok(())
        }
        DeckCommand::Add { name, from } => {
            let record = deck.add(&name, &from)?;
            println!("Added \"{}\" ({})", record.name, record.id);
            Ok(())
        }
        DeckCommand::Import { file } => {
            let record = deck.import(&file)?;
            println!("Imported \"{}\" ({})", record.name, record.id);
            Ok(())
        }
        DeckCommand::Edit { name, rename, from } => {
            let record = deck.edit(&name, rename, from.as_deref())?;
            println!("Updated \"{}\"", record.name);
            Ok(())
        }
        DeckCommand::Remove { name, force } => {
            let record = deck.remove(&name, force)?;
            println!("Removed \"{}\"", record.name);
            Ok(())
        }
        DeckCommand::Render { name } => {
            print!("{}", deck.render(&name)?);
            Ok(())
        }
        DeckCommand::Binary { set, clear } => {
            if set.is_some() || clear {
                deck.set_binary(set)?;
            }
            let binary = deck.binary();
            let state = if binary.is_file() { "found" } else { "missing" };
            println!("{} [{}]", binary.display(), state);
            Ok(())
        }
        DeckCommand::Run { names } => run(&mut deck, &names, config.log_capacity).await,
    }
}

/// Start agents and print their output until interrupted or all have exited.
async fn run(deck: &mut Deck, names: &[String], log_capacity: usize) -> Result<()> {
    let supervisor = ProcessSupervisor::new(LogBus::new(log_capacity));
    let mut events = supervisor.log_bus().subscribe();

    let started = match deck.start(names, &supervisor).await {
        Ok(started) => started,
        Err(e) => {
            supervisor.stop_all().await;
            deck.clear_running()?;
            return Err(e);
        }
    };
    tracing::info!(count = started.len(), "Agents started, press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C, stopping agents");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", deck.label(&event));
                if changes_liveness(&event) {
                    deck.sync_running(&supervisor).await?;
                    if supervisor.list().await.is_empty() {
                        tracing::info!("All agents exited");
                        break;
                    }
                }
            }
        }
    }

    let stopped = supervisor.stop_all().await;
    let cleared = deck.clear_running()?;
    tracing::info!(stopped, cleared, "frpdeck run finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_binary_flags_conflict() {
        let result = Cli::try_parse_from(["frpdeck", "binary", "--set", "/x", "--clear"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_init_parses_mode() {
        let cli = Cli::try_parse_from(["frpdeck", "init", "--mode", "packaged", "--force"]).unwrap();
        match cli.command {
            Commands::Init { mode, force, data_dir } => {
                assert_eq!(mode, Some(DeploymentMode::Packaged));
                assert!(force);
                assert_eq!(data_dir, None);
            }
            _ => panic!("expected init"),
        }
        assert!(Cli::try_parse_from(["frpdeck", "init", "--mode", "sideways"]).is_err());
    }

    #[test]
    fn test_version_flag_reports_crate_version() {
        let err = Cli::try_parse_from(["frpdeck", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains(frpdeck_cli::VERSION));
    }

    #[test]
    fn test_run_accepts_names() {
        let cli = Cli::try_parse_from(["frpdeck", "run", "home", "office"]).unwrap();
        match cli.command {
            Commands::Deck(DeckCommand::Run { names }) => assert_eq!(names, ["home", "office"]),
            _ => panic!("expected run"),
        }
    }
}
