//! Error types for the harvest library.
//!
//! Most failures in this crate are recovered close to where they happen: a bad URL falls through
//! to the next candidate, a failed paper is counted and logged, and a failed year is logged while
//! the crawl moves on. The errors defined here are the ones that still need to travel, such as
//! configuration problems that must stop a whole source, or listing failures that the crawler
//! turns into a zero-count year.
//!
//! # Examples
//!
//! ```
//! use harvest::{error::HarvestError, paper::PaperDescriptor};
//!
//! match PaperDescriptor::new("   ", "NDSS") {
//!   Err(HarvestError::EmptyTitle) => println!("titles are identity keys and must not be empty"),
//!   Err(e) => println!("other error: {e}"),
//!   Ok(_) => unreachable!(),
//! }
//! ```

use thiserror::Error;

/// Error type alias used for the [`harvest`](crate) crate.
pub type Result<T> = core::result::Result<T, HarvestError>;

/// Errors that can occur while discovering, downloading, or converting papers.
#[derive(Error, Debug)]
pub enum HarvestError {
  /// A paper descriptor was created without a usable title.
  ///
  /// Titles are the identity key of a paper within a year and determine the file name of the
  /// downloaded artifact, so an empty or whitespace-only title is rejected up front.
  #[error("Paper title must not be empty")]
  EmptyTitle,

  /// The requested conference key is not configured.
  #[error("Unknown conference: {0}")]
  UnknownConference(String),

  /// A source that mandates credentials was constructed without them.
  ///
  /// This is the only error that is allowed to abort a whole source's run.
  #[error("Missing credential for {source_name}: {hint}")]
  MissingCredential {
    /// Display name of the source that needs the credential.
    source_name: String,
    /// How the credential can be supplied.
    hint:        String,
  },

  /// A network request failed.
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// An external API returned something we could not use.
  #[error("API error: {0}")]
  ApiError(String),

  /// A file system operation failed.
  #[error(transparent)]
  Path(#[from] std::io::Error),

  /// JSON (de)serialization failed.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// Writing or reading CSV metadata failed.
  #[error(transparent)]
  Csv(#[from] csv::Error),

  /// A TOML configuration file could not be parsed.
  #[error(transparent)]
  TomlDe(#[from] toml::de::Error),

  /// A configuration could not be rendered as TOML.
  #[error(transparent)]
  TomlSer(#[from] toml::ser::Error),

  /// An XML response (e.g. an Atom feed) could not be parsed.
  #[error(transparent)]
  Xml(#[from] quick_xml::DeError),

  /// A URL could not be parsed or joined.
  #[error(transparent)]
  Url(#[from] url::ParseError),

  /// The configuration is invalid.
  #[error("{0}")]
  Config(String),

  /// The external document converter cannot be invoked.
  #[error("Converter `{0}` is not available")]
  ConverterUnavailable(String),

  /// A spawned task panicked or was cancelled.
  #[error("Task failed: {0}")]
  TaskFailed(String),
}

impl From<tokio::task::JoinError> for HarvestError {
  fn from(e: tokio::task::JoinError) -> Self { HarvestError::TaskFailed(e.to_string()) }
}
