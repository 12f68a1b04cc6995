//! Per-year acquisition orchestration.
//!
//! A [`Crawler`] drives one [`SourceAdapter`] through the years it is asked for. Each year goes
//! through the same phases:
//!
//! 1. **List** the year's papers through the adapter and drop repeated titles. Distinct titles that
//!    sanitize to the same file name are all kept; later ones get a hash-suffixed file name.
//! 2. **Filter** papers whose PDF is already present and valid; they count as skipped.
//! 3. **Dispatch** the rest over at most `workers` concurrent tasks. With a single worker, tasks run
//!    one after another with the configured delay in between.
//! 4. **Await** every task. A task that panics is counted as failed and never affects its siblings.
//! 5. **Persist** the metadata of every listed paper, downloaded or not.
//!
//! Years are processed sequentially, and a year whose listing fails or panics is logged and skipped.

use std::{any::Any, collections::HashSet, panic::AssertUnwindSafe};

use futures::{FutureExt, StreamExt};

use super::*;
use crate::{
  download::{DownloadOutcome, Downloader},
  format::truncate,
  metadata::{MetadataFormat, MetadataStore},
  sources::SourceAdapter,
};

/// Phases of a year's crawl, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  /// Listing papers.
  List,
  /// Skipping papers already on disk.
  FilterExisting,
  /// Starting download tasks.
  Dispatch,
  /// Waiting for running tasks.
  AwaitAll,
  /// Writing metadata.
  PersistMetadata,
  /// Finished.
  Done,
}

/// Running counts of one year.
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
  /// New downloads.
  downloaded: usize,
  /// Already present.
  skipped:    usize,
  /// Failed downloads.
  failed:     usize,
}

impl Counters {
  /// Counts one outcome.
  fn record(&mut self, outcome: DownloadOutcome) {
    match outcome {
      DownloadOutcome::Downloaded => self.downloaded += 1,
      DownloadOutcome::Skipped => self.skipped += 1,
      DownloadOutcome::Failed => self.failed += 1,
    }
  }
}

/// Result of crawling one year.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
  /// The crawled year.
  pub year:       u32,
  /// Distinct papers listed by the source.
  pub listed:     usize,
  /// Papers downloaded by this run.
  pub downloaded: usize,
  /// Papers that were already present.
  pub skipped:    usize,
  /// Papers that could not be downloaded.
  pub failed:     usize,
}

impl CrawlReport {
  /// Papers present on disk after the run.
  pub fn present(&self) -> usize { self.downloaded + self.skipped }
}

/// One paper waiting to be downloaded.
#[derive(Debug)]
struct DownloadTask {
  /// 1-based position in the year's list, for log lines.
  index:       usize,
  /// The paper.
  paper:       PaperDescriptor,
  /// Final PDF path.
  destination: PathBuf,
}

/// Downloads the papers of one source.
pub struct Crawler {
  /// Where papers come from.
  source:          Arc<dyn SourceAdapter>,
  /// Fetch-validate-retry pipeline.
  downloader:      Downloader,
  /// Metadata files of the source.
  metadata:        MetadataStore,
  /// Which metadata files to write.
  metadata_format: MetadataFormat,
  /// Maximum concurrent downloads.
  workers:         usize,
  /// Politeness delay.
  delay:           Duration,
  /// Counts of the year in progress.
  counters:        Arc<Mutex<Counters>>,
}

impl Crawler {
  /// Creates a crawler for `source` using the download settings of `config`.
  pub fn new(source: Arc<dyn SourceAdapter>, config: &Config) -> Self {
    let metadata = MetadataStore::new(config.base_dir.clone(), source.dir_name());
    Self {
      source,
      downloader: Downloader::new(config),
      metadata,
      metadata_format: config.metadata_format,
      workers: config.workers.max(1),
      delay: config.delay(),
      counters: Arc::new(Mutex::new(Counters::default())),
    }
  }

  /// The source being crawled.
  pub fn source(&self) -> &dyn SourceAdapter { self.source.as_ref() }

  /// Directory holding the PDFs of `year`.
  pub fn papers_dir(&self, year: u32) -> PathBuf { self.metadata.year_dir(year).join("papers") }

  /// Crawls `years` in order and returns the number of papers present across all of them.
  pub async fn crawl(&self, years: &[u32]) -> usize {
    let mut total = 0;
    for (i, &year) in years.iter().enumerate() {
      if i > 0 {
        tokio::time::sleep(self.delay).await;
      }
      match AssertUnwindSafe(self.crawl_year(year)).catch_unwind().await {
        Ok(Ok(count)) => total += count,
        Ok(Err(e)) => error!("Failed to crawl {} {year}: {e}", self.source.name()),
        Err(panic) => error!("Crawl of {} {year} panicked: {}", self.source.name(), panic_message(&*panic)),
      }
    }
    info!("Total papers for {}: {total}", self.source.name());
    total
  }

  /// Crawls one year and returns the number of papers present afterwards.
  pub async fn crawl_year(&self, year: u32) -> Result<usize> {
    self.crawl_year_report(year).await.map(|report| report.present())
  }

  /// Crawls one year and returns its counts.
  pub async fn crawl_year_report(&self, year: u32) -> Result<CrawlReport> {
    info!("{}", "=".repeat(50));
    info!("Crawling {} {year}", self.source.name());
    info!("{}", "=".repeat(50));
    *self.lock_counters() = Counters::default();

    self.enter(year, Phase::List);
    let listed = self.source.list_papers(year).await?;
    if listed.is_empty() {
      warn!("No papers found for {} {year}", self.source.name());
      return Ok(CrawlReport { year, ..CrawlReport::default() });
    }
    let mut titles = HashSet::new();
    let papers: Vec<PaperDescriptor> =
      listed.into_iter().filter(|paper| titles.insert(paper.title.clone())).collect();
    let total = papers.len();
    info!("Found {total} papers");

    self.enter(year, Phase::FilterExisting);
    let papers_dir = self.papers_dir(year);
    let mut pending = Vec::new();
    for (i, (paper, destination)) in papers.iter().zip(destinations(&papers_dir, &papers)).enumerate() {
      let Some(destination) = destination else {
        error!("[{}/{total}] No free file name for: {}", i + 1, truncate(&paper.title, 60));
        self.lock_counters().record(DownloadOutcome::Failed);
        continue;
      };
      if self.downloader.is_valid(&destination) {
        debug!("[{}/{total}] Skipped (exists): {}", i + 1, truncate(&paper.title, 60));
        self.lock_counters().record(DownloadOutcome::Skipped);
      } else {
        pending.push(DownloadTask { index: i + 1, paper: paper.clone(), destination });
      }
    }
    info!("{} already downloaded, {} to fetch", total - pending.len(), pending.len());

    self.enter(year, Phase::Dispatch);
    if self.workers == 1 {
      let last = pending.len();
      for (i, task) in pending.into_iter().enumerate() {
        let handle = tokio::spawn(self.task(task, total));
        self.settle(handle.await);
        if i + 1 < last {
          tokio::time::sleep(self.delay).await;
        }
      }
      self.enter(year, Phase::AwaitAll);
    } else {
      let results = futures::stream::iter(pending)
        .map(|task| tokio::spawn(self.task(task, total)))
        .buffer_unordered(self.workers);
      self.enter(year, Phase::AwaitAll);
      results.for_each(|result| futures::future::ready(self.settle(result))).await;
    }

    self.enter(year, Phase::PersistMetadata);
    if let Err(e) = self.metadata.save(&papers, year, self.metadata_format) {
      error!("Failed to save metadata for {year}: {e}");
    }

    self.enter(year, Phase::Done);
    let counters = *self.lock_counters();
    let report = CrawlReport {
      year,
      listed: total,
      downloaded: counters.downloaded,
      skipped: counters.skipped,
      failed: counters.failed,
    };
    info!(
      "Year {year} complete: {} downloaded, {} skipped, {} failed",
      report.downloaded, report.skipped, report.failed
    );
    Ok(report)
  }

  /// Builds the future of one download task.
  fn task(&self, task: DownloadTask, total: usize) -> impl std::future::Future<Output = ()> + Send + 'static {
    run_task(
      Arc::clone(&self.source),
      self.downloader.clone(),
      Arc::clone(&self.counters),
      task,
      total,
    )
  }

  /// Counts a task that panicked or was cancelled.
  fn settle(&self, result: core::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
      error!("Download task error: {}", HarvestError::from(e));
      self.lock_counters().record(DownloadOutcome::Failed);
    }
  }

  /// Logs a phase transition.
  fn enter(&self, year: u32, phase: Phase) { trace!("{} {year}: {phase:?}", self.source.name()) }

  /// Locks the counters, recovering from poisoning.
  fn lock_counters(&self) -> std::sync::MutexGuard<'_, Counters> {
    self.counters.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Assigns each paper its PDF path in `papers_dir`.
///
/// The first paper claiming a file name gets it; later papers whose titles sanitize to the same name
/// get [`PaperDescriptor::disambiguated_file_name`]. `None` marks a paper for which that name is
/// taken as well. Assignment depends only on listing order, so reruns reuse the same paths.
fn destinations(papers_dir: &Path, papers: &[PaperDescriptor]) -> Vec<Option<PathBuf>> {
  let mut used = HashSet::new();
  papers
    .iter()
    .map(|paper| {
      let name = paper.file_name();
      if used.insert(name.clone()) {
        return Some(papers_dir.join(name));
      }
      let alternative = paper.disambiguated_file_name();
      warn!("{name} is taken, storing {:?} as {alternative}", truncate(&paper.title, 60));
      used.insert(alternative.clone()).then(|| papers_dir.join(alternative))
    })
    .collect()
}

/// The message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
  payload
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("unknown panic")
}

/// Downloads one paper and records the outcome.
async fn run_task(
  source: Arc<dyn SourceAdapter>,
  downloader: Downloader,
  counters: Arc<Mutex<Counters>>,
  task: DownloadTask,
  total: usize,
) {
  let DownloadTask { index, paper, destination } = task;
  let title = truncate(&paper.title, 60);
  debug!("[{index}/{total}] Downloading: {title}");

  let urls = source.pdf_candidate_urls(&paper).await;
  let outcome = if urls.is_empty() {
    warn!("[{index}/{total}] No PDF URL: {title}");
    DownloadOutcome::Failed
  } else {
    match source.sessions().worker_client() {
      Ok(client) => downloader.download(&client, &urls, &destination).await,
      Err(e) => {
        error!("[{index}/{total}] Cannot build HTTP client: {e}");
        DownloadOutcome::Failed
      },
    }
  };

  match outcome {
    DownloadOutcome::Downloaded => info!("[{index}/{total}] ✓ {title}"),
    DownloadOutcome::Skipped => debug!("[{index}/{total}] Skipped (exists): {title}"),
    DownloadOutcome::Failed => warn!("[{index}/{total}] ✗ {title}"),
  }
  counters.lock().unwrap_or_else(|e| e.into_inner()).record(outcome);
}
