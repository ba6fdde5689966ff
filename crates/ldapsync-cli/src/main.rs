mod cmd;
mod config_path;
mod output;
mod services;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, profile::ProfileSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ldapsync",
    about = "Mirror directory groups, security markings and profiles into the content repository",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ldapsync.yaml in this or a parent directory, then /etc/ldapsync/)
    #[arg(long, global = true, env = "LDAPSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation
    Run {
        /// Ignore a lock left by an earlier run and re-check every group and user
        #[arg(long)]
        force: bool,
    },

    /// Show whether a run lock is held
    Status,

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Move profile data between repository and directory
    Profile {
        #[command(subcommand)]
        subcommand: ProfileSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Profile { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = config_path::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Run { force } => cmd::run::run(&config, force, cli.json),
        Commands::Status => cmd::status::run(&config, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
        Commands::Profile { subcommand } => cmd::profile::run(&config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
