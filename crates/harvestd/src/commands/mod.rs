use clap::{Args, Subcommand};
use harvest::{
  config::ConferenceConfig,
  convert::{ConversionSummary, Converter},
  metadata::MetadataFormat,
  sources::SourceOptions,
};

use super::*;

pub mod convert;
pub mod download;
pub mod run;
pub mod status;

pub use convert::convert;
pub use download::download;
pub use run::run_all;
pub use status::status;

/// Metadata formats accepted by `--format`.
const FORMATS: [&str; 4] = ["csv", "json", "txt", "all"];

/// Converter backends accepted by `--backend`.
const BACKENDS: [&str; 4] = ["auto", "pipeline", "vlm-transformers", "vlm-vllm"];

/// Available commands for the CLI
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
  /// Download papers for the selected conferences and years
  Download(DownloadArgs),

  /// Convert downloaded PDFs to Markdown
  Convert(ConvertArgs),

  /// Download, then convert
  Run(RunArgs),

  /// Show download and conversion progress
  Status(StatusArgs),
}

/// Which conferences and years a command works on.
#[derive(Args, Clone, Debug, Default)]
pub struct Selection {
  /// Conference key, e.g. usenix, ndss, ieee_sp or acm_ccs
  #[arg(short, long)]
  pub conference: Option<String>,

  /// Every configured conference
  #[arg(long, conflicts_with = "conference")]
  pub all: bool,

  /// Years to process; defaults to each conference's configured years
  #[arg(short, long, num_args = 1..)]
  pub years: Vec<u32>,
}

impl Selection {
  /// Keys of the selected conferences.
  pub fn conferences(&self, config: &Config) -> Result<Vec<String>> {
    match (&self.conference, self.all) {
      (_, true) => Ok(config.conference_keys()),
      (Some(key), false) => {
        config.conference(key)?;
        Ok(vec![key.clone()])
      },
      (None, false) => Err(HarvestdError::NoConference),
    }
  }

  /// Years to process for `conference`.
  pub fn years_for(&self, conference: &ConferenceConfig) -> Vec<u32> {
    if self.years.is_empty() {
      conference.years.clone()
    } else {
      self.years.clone()
    }
  }
}

/// Download tuning shared by `download` and `run`.
#[derive(Args, Clone, Debug, Default)]
pub struct DownloadOptions {
  /// Concurrent downloads per year
  #[arg(long)]
  pub workers: Option<usize>,

  /// Delay between requests, in seconds
  #[arg(long)]
  pub delay: Option<f64>,

  /// Metadata file format
  #[arg(long, value_parser = FORMATS)]
  pub format: Option<String>,

  /// Solve bot challenges through FlareSolverr
  #[arg(long)]
  pub flaresolverr: bool,

  /// Cookie file (JSON list of browser cookies) for paywalled sites
  #[arg(long)]
  pub cookies: Option<PathBuf>,
}

impl DownloadOptions {
  /// `config` with these options applied.
  pub fn apply(&self, config: &Config) -> Result<Config> {
    let mut config = config.clone();
    if let Some(workers) = self.workers {
      config = config.with_workers(workers);
    }
    if let Some(delay) = self.delay {
      config = config.with_delay_secs(delay);
    }
    if let Some(format) = &self.format {
      let format = format
        .parse::<MetadataFormat>()
        .map_err(|_| HarvestdError::InvalidArgument(format!("unknown metadata format `{format}`")))?;
      config = config.with_metadata_format(format);
    }
    config.validate()?;
    Ok(config)
  }

  /// Options handed to the source adapters.
  pub fn source_options(&self) -> SourceOptions {
    let options = SourceOptions::default().with_flaresolverr(self.flaresolverr);
    match &self.cookies {
      Some(path) => options.with_cookie_file(path),
      None => options,
    }
  }
}

/// Conversion tuning shared by `convert` and `run`.
#[derive(Args, Clone, Debug, Default)]
pub struct ConvertOptions {
  /// Converter backend
  #[arg(long, value_parser = BACKENDS)]
  pub backend: Option<String>,

  /// Convert again even if Markdown already exists
  #[arg(long)]
  pub force: bool,

  /// Per-PDF conversion timeout, in seconds
  #[arg(long)]
  pub timeout: Option<u64>,
}

impl ConvertOptions {
  /// A converter for `config` with these options applied.
  pub fn converter(&self, config: &Config, workers: Option<usize>) -> Converter {
    let mut converter = Converter::new(config);
    if let Some(backend) = &self.backend {
      converter = converter.with_backend(backend);
    }
    if let Some(timeout) = self.timeout {
      converter = converter.with_timeout(std::time::Duration::from_secs(timeout));
    }
    if let Some(workers) = workers {
      converter = converter.with_workers(workers);
    }
    converter
  }
}

/// Arguments of `harvest download`.
#[derive(Args, Clone, Debug)]
pub struct DownloadArgs {
  #[command(flatten)]
  pub selection: Selection,

  #[command(flatten)]
  pub options: DownloadOptions,
}

/// Arguments of `harvest convert`.
#[derive(Args, Clone, Debug)]
pub struct ConvertArgs {
  #[command(flatten)]
  pub selection: Selection,

  #[command(flatten)]
  pub options: ConvertOptions,

  /// Concurrent converter processes
  #[arg(long)]
  pub workers: Option<usize>,

  /// Print how to install the converter and exit
  #[arg(long)]
  pub install_guide: bool,
}

/// Arguments of `harvest run`.
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
  #[command(flatten)]
  pub selection: Selection,

  #[command(flatten)]
  pub download: DownloadOptions,

  #[command(flatten)]
  pub convert: ConvertOptions,
}

/// Arguments of `harvest status`; every conference is reported when none is selected.
#[derive(Args, Clone, Debug)]
pub struct StatusArgs {
  #[command(flatten)]
  pub selection: Selection,
}

/// Fails with [`HarvestdError::ConverterMissing`] after printing the install guide if the
/// converter cannot be run.
async fn ensure_converter(converter: &Converter) -> Result<()> {
  if converter.check_available().await {
    return Ok(());
  }
  println!("{}", Converter::install_guide());
  Err(HarvestdError::ConverterMissing(converter.settings().command.clone()))
}
