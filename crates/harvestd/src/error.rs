//! Error types for the `harvest` command line driver.

use thiserror::Error;

/// Error type alias used by the CLI.
pub type Result<T> = core::result::Result<T, HarvestdError>;

/// Failures that end a CLI invocation with a non-zero exit code.
#[derive(Error, Debug)]
pub enum HarvestdError {
  /// An error from the `harvest` library.
  #[error(transparent)]
  Harvest(#[from] harvest::error::HarvestError),

  /// A filesystem error outside the library.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// Neither `--conference` nor `--all` was given.
  #[error("No conference selected: pass --conference <key> or --all")]
  NoConference,

  /// The converter executable could not be run.
  #[error("Converter `{0}` is not available; run `harvest convert --install-guide`")]
  ConverterMissing(String),

  /// A command line value could not be interpreted.
  #[error("Invalid argument: {0}")]
  InvalidArgument(String),
}
