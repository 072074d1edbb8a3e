//! rampart - host-based ransomware containment for Linux
//!
//! # Usage
//!
//! ```bash
//! # Gate the mounts named in the configuration
//! sudo rampart run
//!
//! # Gate a specific mount, stay in the foreground
//! sudo rampart run --foreground /home
//!
//! # Check agent status
//! rampart status
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rampart::{daemon, Config};

#[derive(Parser)]
#[command(name = "rampart")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/rampart/config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the containment agent
    Run {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Mount points to gate (overrides the configuration)
        mounts: Vec<PathBuf>,
    },

    /// Stop the running agent
    Stop,

    /// Check agent status
    Status,

    /// Show the effective configuration
    Config,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // A broken config never keeps the agent down
    let mut config = Config::load_or_default(&cli.config);

    match cli.command {
        Commands::Run { foreground, mounts } => {
            if !mounts.is_empty() {
                config.mounts = mounts;
            }
            daemon::start(config, foreground)?;
        }

        Commands::Stop => daemon::stop(&config)?,

        Commands::Status => daemon::status(&config)?,

        Commands::Config => print!("{}", serde_yaml::to_string(&config)?),
    }

    Ok(())
}
