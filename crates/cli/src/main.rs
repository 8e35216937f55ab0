//! index-relay - async search-index event workers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_run, load_config};
use logging::{init_cli_logging, init_logging};

#[derive(Parser)]
#[command(name = "index-relay")]
#[command(about = "Queue-driven search indexing workers")]
#[command(after_help = "\
QUICK START:
  index-relay config init            # Write a default config file
  index-relay run --seed 100         # Run workers over 100 demo entities")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `index-relay config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Print the effective configuration
  Show {
    /// Config file (default: built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,
  },
  /// Write the default configuration to a file
  Init {
    /// Output path
    #[arg(default_value = "index-relay.toml")]
    path: PathBuf,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the worker pool until interrupted
  Run {
    /// Config file (default: built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
    /// Seed this many demo entities and queue their index events
    #[arg(long, default_value = "0")]
    seed: usize,
  },
  /// Configuration management
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Run { config, log_dir, seed } => {
      let config = load_config(config.as_deref())?;
      let _guard = init_logging(&config.logging.level, log_dir.as_deref());
      cmd_run(config, seed).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Show { config } => cmd_config_show(config.as_deref()),
        ConfigCommand::Init { path, force } => cmd_config_init(&path, force),
      }
    }
  }
}
