//! Resilient bulk acquisition of conference papers.
//!
//! `harvest` retrieves academic papers from conference websites, downloads their PDFs and hands
//! them to an external converter that produces Markdown. The library is built around a single
//! fetch-validate-retry-persist pipeline that every conference source shares:
//!
//! - **Sources** ([`sources`]) discover [`PaperDescriptor`]s for a year and propose ordered
//!   candidate URLs for each paper's PDF, falling back to open-access mirrors ([`services`]).
//! - **Downloads** ([`download`]) try candidate URLs in order with a bounded retry policy, sniff
//!   the stream for login walls, and promote a file to its final path only after validating it.
//! - **Crawling** ([`crawler`]) fans a year's papers out over a bounded worker pool, keeps
//!   running counts, and always persists the discovered metadata ([`metadata`]).
//! - **Conversion** ([`convert`]) scans downloaded PDFs and runs the converter in isolated OS
//!   processes, in batches, with per-task timeouts and memory backpressure.
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvest::{
//!   config::Config,
//!   crawler::Crawler,
//!   sources::{build_source, SourceOptions},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let config = Config::default();
//!   let source = build_source("ndss", &config, SourceOptions::default())?;
//!   let crawler = Crawler::new(Arc::from(source), &config);
//!
//!   // Years are crawled sequentially; a failing year never aborts the others.
//!   let total = crawler.crawl(&[2024, 2023]).await;
//!   println!("{total} papers present");
//!   Ok(())
//! }
//! ```
//!
//! # Filesystem layout
//!
//! ```text
//! <base>/<source>/<year>/papers/<sanitized title>.pdf
//! <base>/<source>/<year>/markdown/<stem>/<stem>.md        (or <stem>/auto/<stem>.md)
//! <base>/<source>/<year>/metadata.{csv,json,txt}
//! ```

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
  collections::BTreeMap,
  fmt::Display,
  path::{Path, PathBuf},
  str::FromStr,
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};
#[cfg(test)]
use {tempfile::tempdir, tracing_test::traced_test};

pub mod config;
pub mod convert;
pub mod crawler;
pub mod download;
pub mod error;
pub mod format;
pub mod metadata;
pub mod paper;
pub mod services;
pub mod session;
pub mod sources;

pub use crate::paper::PaperDescriptor;
use crate::{config::*, error::*};

/// Common traits and types for ergonomic imports.
///
/// ```no_run
/// use harvest::prelude::*;
///
/// fn example() -> Result<(), HarvestError> {
///   let paper = PaperDescriptor::new("A Study of Login Walls", "NDSS")?;
///   println!("{}", paper.file_name());
///   Ok(())
/// }
/// ```
pub mod prelude {
  pub use crate::{
    download::DownloadOutcome, error::HarvestError, paper::PaperDescriptor,
    sources::SourceAdapter,
  };
}
