//! Command line driver for the `harvest` paper acquisition pipeline.
//!
//! The binary downloads conference papers, converts them to Markdown and reports progress:
//! - `download` crawls the selected conferences and years
//! - `convert` runs the external converter over downloaded PDFs
//! - `run` does both in sequence
//! - `status` summarizes what is on disk
//!
//! # Usage
//!
//! ```bash
//! # Download IEEE S&P papers for 2023 and 2022
//! harvest download -c ieee_sp -y 2023 2022
//!
//! # Download every configured conference through FlareSolverr
//! harvest download --all --flaresolverr
//!
//! # Convert one year with a GPU backend
//! harvest convert -c usenix -y 2024 --backend vlm-transformers
//!
//! # Download and convert in one go
//! harvest run -c ndss -y 2024
//!
//! # Show what has been downloaded and converted
//! harvest status
//! ```
//!
//! Logs go to stderr and to a daily rolling file under `<base>/logs/`. `RUST_LOG` overrides the
//! level chosen with `-v`.

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use clap::{builder::ArgAction, Parser};
use console::style;
use harvest::config::Config;
use tracing::{debug, info, warn};
use tracing_appender::{
  non_blocking::WorkerGuard,
  rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod commands;
pub mod error;

use crate::{commands::*, error::*};

/// Prefix for information messages
static INFO_PREFIX: &str = "ℹ ";
/// Prefix for success messages
static SUCCESS_PREFIX: &str = "✓ ";
/// Prefix for warning messages
static WARNING_PREFIX: &str = "⚠️ ";
/// Prefix for error messages
static ERROR_PREFIX: &str = "✗ ";

/// Command line interface configuration and argument parsing
#[derive(Parser)]
#[command(author, version, about = "Download conference papers and convert them to Markdown")]
pub struct Cli {
  /// Verbose mode (-v, -vv) for more logging detail
  #[arg(short, long, action = ArgAction::Count, global = true, help = "Increase logging verbosity")]
  verbose: u8,

  /// Configuration file. Defaults to the platform configuration directory.
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Root directory for papers, Markdown and logs. Overrides `base_dir` from the configuration.
  #[arg(long, global = true)]
  base_dir: Option<PathBuf>,

  /// The subcommand to execute
  #[command(subcommand)]
  command: Commands,
}

/// Configures logging to stderr and to a daily file in `log_dir`.
///
/// The verbosity levels are:
/// - 0: info (default)
/// - 1: debug
/// - 2+: trace
///
/// The returned guard flushes the file writer when dropped and must live until exit.
fn setup_logging(verbosity: u8, log_dir: &Path) -> Option<WorkerGuard> {
  let level = match verbosity {
    0 => "info",
    1 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

  let appender = std::fs::create_dir_all(log_dir).map_err(|e| e.to_string()).and_then(|()| {
    RollingFileAppender::builder()
      .rotation(Rotation::DAILY)
      .filename_prefix("harvest")
      .filename_suffix("log")
      .build(log_dir)
      .map_err(|e| e.to_string())
  });
  let (file_layer, guard) = match appender {
    Ok(appender) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
    },
    Err(e) => {
      eprintln!("{} Logging to stderr only, cannot write to {}: {e}", style(WARNING_PREFIX).yellow(), log_dir.display());
      (None, None)
    },
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(file_layer)
    .init();
  guard
}

/// Reads the configuration and applies the global overrides.
fn load_config(cli: &Cli) -> Result<Config> {
  let path = cli.config.clone().unwrap_or_else(Config::default_path);
  let mut config = Config::load_or_default(&path)?;
  if let Some(base_dir) = &cli.base_dir {
    config = config.with_base_dir(base_dir);
  }
  Ok(config)
}

/// Runs the parsed command.
async fn run(cli: Cli) -> Result<()> {
  let config = load_config(&cli)?;
  let _guard = setup_logging(cli.verbose, &config.base_dir.join("logs"));
  debug!("Data directory: {}", config.base_dir.display());

  match &cli.command {
    Commands::Download(args) => download(&config, args).await,
    Commands::Convert(args) => convert(&config, args).await,
    Commands::Run(args) => run_all(&config, args).await,
    Commands::Status(args) => status(&config, args).await,
  }
}

/// Entry point for the `harvest` CLI.
///
/// Exits with status 1 when the command fails as a whole: no conference selected, an unknown
/// conference, a missing credential, an invalid configuration or a missing converter. Failures of
/// single papers or years are logged and do not change the exit status.
#[tokio::main]
async fn main() {
  let cli = Cli::parse();
  if let Err(e) = run(cli).await {
    eprintln!("{} {e}", style(ERROR_PREFIX).red());
    std::process::exit(1);
  }
}
