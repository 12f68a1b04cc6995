//! PDF to Markdown conversion through an external converter.
//!
//! Conversion is CPU and memory heavy, so each PDF is converted by its own converter process
//! (MinerU by default) rather than inside this process. The [`Converter`] scans a year's papers
//! for PDFs without Markdown output, then runs them in fixed-size batches:
//!
//! - at most `workers` processes run at once, and a batch fully drains before the next starts;
//! - every process has a wall-clock timeout, after which it is killed and reaped;
//! - between batches, available memory is sampled through a [`MemoryProbe`] and the pipeline pauses
//!   while it is below the configured threshold.
//!
//! A PDF counts as converted when `<year>/markdown/<stem>/<stem>.md` or
//! `<year>/markdown/<stem>/auto/<stem>.md` exists, so conversion can be resumed at any time.
//!
//! # Examples
//!
//! ```no_run
//! use harvest::{config::Config, convert::Converter};
//!
//! # async fn run() -> harvest::error::Result<()> {
//! let config = Config::default();
//! let converter = Converter::new(&config);
//! if !converter.check_available().await {
//!   eprintln!("{}", Converter::install_guide());
//!   return Ok(());
//! }
//! let ndss = config.conference("ndss")?;
//! let summary = converter.convert_conference(ndss, &[2024], false).await;
//! println!("{} converted, {} failed", summary.converted, summary.failed);
//! # Ok(())
//! # }
//! ```

use std::process::Stdio;

use futures::StreamExt;
use tokio::{io::AsyncReadExt, process::Command};

use super::*;
use crate::format::truncate;

/// Length of the stderr excerpt logged for a failed conversion.
const STDERR_TAIL: usize = 300;

/// Timeout of the availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// One PDF to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
  /// Source PDF.
  pub pdf:          PathBuf,
  /// The year's `markdown` directory; output goes to `<markdown_dir>/<stem>/`.
  pub markdown_dir: PathBuf,
  /// File stem of the PDF.
  pub stem:         String,
}

impl ConversionTask {
  /// Creates a task for `pdf`, writing under `markdown_dir`.
  pub fn new(pdf: impl Into<PathBuf>, markdown_dir: impl Into<PathBuf>) -> Self {
    let pdf = pdf.into();
    let stem = pdf.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    Self { pdf, markdown_dir: markdown_dir.into(), stem }
  }

  /// Whether Markdown output already exists for this PDF.
  pub fn is_converted(&self) -> bool { markdown_exists(&self.markdown_dir.join(&self.stem), &self.stem) }
}

/// Whether `dir` holds `<stem>.md` directly or under `auto/`.
fn markdown_exists(dir: &Path, stem: &str) -> bool {
  let file = format!("{stem}.md");
  dir.join(&file).is_file() || dir.join("auto").join(&file).is_file()
}

/// Conversion progress of one year.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearStatus {
  /// The year.
  pub year:           u32,
  /// Downloaded PDFs eligible for conversion.
  pub pdf_count:      usize,
  /// PDFs with Markdown output.
  pub markdown_count: usize,
  /// Eligible PDFs still to convert.
  pub remaining:      usize,
}

/// Outcome of converting one or more years.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
  /// PDFs converted by this run.
  pub converted:         usize,
  /// PDFs whose conversion failed.
  pub failed:            usize,
  /// Eligible PDFs that were already converted.
  pub already_converted: usize,
}

/// Reports available system memory.
pub trait MemoryProbe: Send + Sync {
  /// Available memory in MiB, or `None` if it cannot be determined.
  fn available_mb(&self) -> Option<u64>;
}

/// Reads `MemAvailable` from `/proc/meminfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
  fn available_mb(&self) -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
  }
}

/// Extracts `MemAvailable` in MiB from the contents of `/proc/meminfo`.
fn parse_mem_available(meminfo: &str) -> Option<u64> {
  meminfo
    .lines()
    .find_map(|line| line.strip_prefix("MemAvailable:"))
    .and_then(|rest| rest.split_whitespace().next())
    .and_then(|kb| kb.parse::<u64>().ok())
    .map(|kb| kb / 1024)
}

/// The last `max` characters of a process's stderr.
fn stderr_tail(stderr: &[u8], max: usize) -> String {
  let text = String::from_utf8_lossy(stderr);
  let text = text.trim();
  let skip = text.chars().count().saturating_sub(max);
  text.chars().skip(skip).collect()
}

/// Whether a file name is eligible: a PDF that is not a whole proceedings volume.
fn is_eligible_name(name: &str) -> bool { name.ends_with(".pdf") && !name.contains("Proceedings") }

/// Runs PDF to Markdown conversions.
pub struct Converter {
  /// Converter settings.
  settings:     ConversionSettings,
  /// Data root.
  base_dir:     PathBuf,
  /// PDFs must be larger than this.
  min_size:     u64,
  /// PDFs must be smaller than this.
  max_size:     u64,
  /// Length of one memory pause.
  memory_pause: Duration,
  /// Memory source for backpressure.
  memory:       Arc<dyn MemoryProbe>,
}

impl Converter {
  /// Creates a converter from the conversion settings of `config`.
  pub fn new(config: &Config) -> Self {
    Self {
      settings:     config.conversion.clone(),
      base_dir:     config.base_dir.clone(),
      min_size:     config.min_pdf_size,
      max_size:     config.max_pdf_size,
      memory_pause: Duration::from_secs(config.conversion.memory_pause_secs),
      memory:       Arc::new(SystemMemory),
    }
  }

  /// Uses another memory source.
  pub fn with_memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
    self.memory = memory;
    self
  }

  /// Overrides the length of one memory pause.
  pub fn with_memory_pause(mut self, pause: Duration) -> Self {
    self.memory_pause = pause;
    self
  }

  /// Overrides the converter backend.
  pub fn with_backend(mut self, backend: &str) -> Self {
    self.settings.backend = backend.to_string();
    self
  }

  /// Overrides the per-task timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.settings.timeout_secs = timeout.as_secs().max(1);
    self
  }

  /// Overrides the number of concurrent converter processes.
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.settings.workers = Some(workers.max(1));
    self
  }

  /// The resolved settings.
  pub fn settings(&self) -> &ConversionSettings { &self.settings }

  /// Whether the converter command runs: `<command> --version` must exit successfully.
  pub async fn check_available(&self) -> bool {
    let probe = Command::new(&self.settings.command)
      .arg("--version")
      .envs(&self.settings.env)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .status();
    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
      Ok(Ok(status)) => status.success(),
      Ok(Err(e)) => {
        debug!("Cannot run {}: {e}", self.settings.command);
        false
      },
      Err(_) => {
        debug!("{} --version timed out", self.settings.command);
        false
      },
    }
  }

  /// How to install the default converter.
  pub fn install_guide() -> &'static str {
    r#"MinerU Installation Guide
=========================

1. Basic installation:
   pip install -U "mineru[core]"
   # or with uv:
   uv pip install -U "mineru[core]"

2. VLM accelerated version (higher quality, requires a GPU):
   pip install -U "mineru[core,vllm]"

3. CUDA (optional, for GPU acceleration):
   CUDA 11.8 / 12.4 / 12.6 / 12.8; check the GPU with `nvidia-smi`

4. Download the models (required after installation):
   mineru-models download

5. Performance:
   one worker per GPU, or half the CPU cores (the default); use --workers N to override

Another converter can be configured under [conversion] as long as it accepts
`-p <pdf> -o <output dir>` and writes `<output dir>/<stem>/<stem>.md`.

More details: https://github.com/opendatalab/MinerU"#
  }

  /// `papers` and `markdown` directories of one year.
  fn year_dirs(&self, conference: &ConferenceConfig, year: u32) -> (PathBuf, PathBuf) {
    let year_dir = self.base_dir.join(&conference.dir_name).join(year.to_string());
    (year_dir.join("papers"), year_dir.join("markdown"))
  }

  /// Eligible PDFs of a `papers` directory, sorted by name.
  fn eligible_pdfs(&self, papers_dir: &Path) -> Result<Vec<PathBuf>> {
    if !papers_dir.is_dir() {
      return Ok(Vec::new());
    }
    let mut pdfs = Vec::new();
    for entry in std::fs::read_dir(papers_dir)? {
      let entry = entry?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if !is_eligible_name(&name) {
        continue;
      }
      let size = entry.metadata()?.len();
      if size > self.min_size && size < self.max_size {
        pdfs.push(entry.path());
      }
    }
    pdfs.sort();
    Ok(pdfs)
  }

  /// Tasks for the eligible PDFs of one year; converted PDFs are included only with `force`.
  pub fn scan_pending(&self, conference: &ConferenceConfig, year: u32, force: bool) -> Result<Vec<ConversionTask>> {
    let (papers_dir, markdown_dir) = self.year_dirs(conference, year);
    Ok(
      self
        .eligible_pdfs(&papers_dir)?
        .into_iter()
        .map(|pdf| ConversionTask::new(pdf, &markdown_dir))
        .filter(|task| force || !task.is_converted())
        .collect(),
    )
  }

  /// Converts `pending` and returns `(succeeded, failed)`.
  pub async fn convert(&self, pending: Vec<ConversionTask>) -> (usize, usize) {
    if pending.is_empty() {
      return (0, 0);
    }
    let total = pending.len();
    let workers = self.settings.worker_count();
    let batch_size = self.settings.batch_size.max(1);
    let batches = total.div_ceil(batch_size);
    info!("Converting {total} PDFs with {workers} workers in {batches} batches");

    let (mut succeeded, mut failed) = (0, 0);
    let mut pending = pending.into_iter().peekable();
    let mut batch_number = 0;
    while pending.peek().is_some() {
      batch_number += 1;
      let batch: Vec<ConversionTask> = pending.by_ref().take(batch_size).collect();
      debug!("Batch {batch_number}/{batches}: {} tasks", batch.len());

      let mut results = futures::stream::iter(batch)
        .map(|task| {
          let settings = self.settings.clone();
          let name = task.stem.clone();
          (name, tokio::spawn(run_conversion(settings, task)))
        })
        .map(|(name, handle)| async move { (name, handle.await) })
        .buffer_unordered(workers);

      while let Some((name, result)) = results.next().await {
        let done = succeeded + failed + 1;
        match result {
          Ok(Ok(())) => {
            succeeded += 1;
            info!("[{done}/{total}] ✓ {}", truncate(&name, 50));
          },
          Ok(Err(e)) => {
            failed += 1;
            error!("[{done}/{total}] ✗ {}: {e}", truncate(&name, 50));
          },
          Err(e) => {
            failed += 1;
            error!("[{done}/{total}] ✗ {}: {}", truncate(&name, 50), HarvestError::from(e));
          },
        }
      }

      if pending.peek().is_some() {
        self.wait_for_memory().await;
      }
    }

    info!("Conversion complete: {succeeded}/{total} succeeded, {failed} failed");
    (succeeded, failed)
  }

  /// Pauses while available memory is below the threshold, up to `max_memory_waits` times.
  async fn wait_for_memory(&self) {
    let threshold = self.settings.min_available_memory_mb;
    let mut waits = 0;
    while let Some(available) = self.memory.available_mb() {
      if available >= threshold {
        return;
      }
      if waits >= self.settings.max_memory_waits {
        warn!("Available memory still {available} MiB after {waits} pauses, continuing anyway");
        return;
      }
      waits += 1;
      warn!(
        "Low memory: {available} MiB available (< {threshold} MiB), pausing {:?} ({waits}/{})",
        self.memory_pause, self.settings.max_memory_waits
      );
      tokio::time::sleep(self.memory_pause).await;
    }
  }

  /// Converts the given years of one conference.
  pub async fn convert_conference(&self, conference: &ConferenceConfig, years: &[u32], force: bool) -> ConversionSummary {
    let mut summary = ConversionSummary::default();
    for &year in years {
      let (papers_dir, _) = self.year_dirs(conference, year);
      if !papers_dir.is_dir() {
        warn!("No papers directory for {} {year}", conference.name);
        continue;
      }
      let eligible = match self.eligible_pdfs(&papers_dir) {
        Ok(pdfs) => pdfs.len(),
        Err(e) => {
          error!("Cannot scan {}: {e}", papers_dir.display());
          continue;
        },
      };
      let pending = match self.scan_pending(conference, year, force) {
        Ok(pending) => pending,
        Err(e) => {
          error!("Cannot scan {}: {e}", papers_dir.display());
          continue;
        },
      };

      info!("Converting {} {year}...", conference.name);
      let already = eligible - pending.len();
      if already > 0 {
        info!("Skipping {already} already converted files");
      }
      if pending.is_empty() {
        info!("All files already converted");
      }
      let (converted, failed) = self.convert(pending).await;
      summary.converted += converted;
      summary.failed += failed;
      summary.already_converted += already;
    }
    summary
  }

  /// Conversion progress of the given years of one conference.
  pub fn status(&self, conference: &ConferenceConfig, years: &[u32]) -> Vec<YearStatus> {
    years
      .iter()
      .map(|&year| {
        let (papers_dir, markdown_dir) = self.year_dirs(conference, year);
        let pdf_count = self.eligible_pdfs(&papers_dir).map(|pdfs| pdfs.len()).unwrap_or(0);
        let markdown_count = count_markdown_dirs(&markdown_dir);
        YearStatus { year, pdf_count, markdown_count, remaining: pdf_count.saturating_sub(markdown_count) }
      })
      .collect()
  }
}

/// Number of `<stem>/` directories under `markdown_dir` holding Markdown output.
fn count_markdown_dirs(markdown_dir: &Path) -> usize {
  let Ok(entries) = std::fs::read_dir(markdown_dir) else { return 0 };
  entries
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.path().is_dir())
    .filter(|entry| markdown_exists(&entry.path(), &entry.file_name().to_string_lossy()))
    .count()
}

/// Arguments passed to the converter for `task`.
fn converter_args(settings: &ConversionSettings, task: &ConversionTask) -> Vec<String> {
  let mut args = vec![
    "-p".to_string(),
    task.pdf.to_string_lossy().into_owned(),
    "-o".to_string(),
    task.markdown_dir.to_string_lossy().into_owned(),
  ];
  if !matches!(settings.backend.as_str(), "" | "auto" | "pipeline") {
    args.push("-b".to_string());
    args.push(settings.backend.clone());
  }
  args
}

/// Runs one converter process to completion or until the timeout kills it.
async fn run_conversion(settings: ConversionSettings, task: ConversionTask) -> Result<()> {
  tokio::fs::create_dir_all(&task.markdown_dir).await?;
  let mut child = Command::new(&settings.command)
    .args(converter_args(&settings, &task))
    .envs(&settings.env)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .map_err(|e| HarvestError::TaskFailed(format!("cannot start {}: {e}", settings.command)))?;

  let stderr = child.stderr.take();
  let reader = tokio::spawn(async move {
    let mut buffer = Vec::new();
    if let Some(mut stderr) = stderr {
      let _ = stderr.read_to_end(&mut buffer).await;
    }
    buffer
  });

  let timeout = Duration::from_secs(settings.timeout_secs);
  match tokio::time::timeout(timeout, child.wait()).await {
    Ok(Ok(status)) if status.success() => {
      reader.abort();
      Ok(())
    },
    Ok(Ok(status)) => {
      let stderr = reader.await.unwrap_or_default();
      Err(HarvestError::TaskFailed(format!("{status}: {}", stderr_tail(&stderr, STDERR_TAIL))))
    },
    Ok(Err(e)) => {
      reader.abort();
      Err(e.into())
    },
    Err(_) => {
      reader.abort();
      if let Err(e) = child.kill().await {
        warn!("Failed to kill converter for {}: {e}", task.stem);
      }
      Err(HarvestError::TaskFailed(format!("conversion timed out after {}s", settings.timeout_secs)))
    },
  }
}
