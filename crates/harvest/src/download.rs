//! Fetch, validate and persist PDFs.
//!
//! [`Downloader::download`] takes an ordered list of candidate URLs and a destination path and
//! guarantees that the destination is either untouched or a validated PDF:
//!
//! - An existing valid file at the destination is reported as [`DownloadOutcome::Skipped`]
//!   without any network access.
//! - Candidates are tried in order; each one gets its own bounded retry loop with exponential
//!   backoff ([`RetryPolicy`]).
//! - The first chunk of every response is sniffed. HTML that mentions a login or an access denial
//!   is a terminal failure for that URL; other HTML is retried.
//! - Bytes are written to `<destination>.tmp` and renamed into place only after the size and the
//!   `%PDF` magic read back from disk check out. Every failure removes the temporary file.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::Path;
//!
//! use harvest::{config::Config, download::Downloader, session::SessionFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let downloader = Downloader::new(&config);
//! let client = SessionFactory::new(&config).worker_client()?;
//!
//! let urls = vec![
//!   "https://ieeexplore.ieee.org/ielx7/1/2/3.pdf".to_string(),
//!   "https://arxiv.org/pdf/2301.00001.pdf".to_string(),
//! ];
//! let outcome = downloader.download(&client, &urls, Path::new("papers/Some Title.pdf")).await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

/// Case-insensitive phrases that mark an HTML page as a login or paywall page.
const ACCESS_MARKERS: [&str; 3] = ["login", "sign in", "access denied"];

/// Number of leading bytes of a non-PDF response that are inspected for HTML.
const SNIFF_LEN: usize = 500;

/// Result of one [`Downloader::download`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
  /// A new validated file was written.
  Downloaded,
  /// A valid file was already present; nothing was fetched.
  Skipped,
  /// No candidate produced a valid file.
  Failed,
}

impl DownloadOutcome {
  /// `true` unless the download failed.
  pub fn is_success(self) -> bool { !matches!(self, DownloadOutcome::Failed) }
}

/// Attempts and backoff per candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts per URL, at least one.
  pub max_retries: u32,
  /// Backoff before the second attempt.
  pub retry_delay: Duration,
  /// Upper bound for the backoff.
  pub max_backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self::from(&RetrySettings::default()) }
}

impl From<&RetrySettings> for RetryPolicy {
  fn from(settings: &RetrySettings) -> Self {
    Self {
      max_retries: settings.max_retries.max(1),
      retry_delay: Duration::from_millis(settings.retry_delay_ms),
      max_backoff: Duration::from_millis(settings.max_backoff_ms),
    }
  }
}

impl RetryPolicy {
  /// Wait before the next attempt, given how many attempts already failed (at least one).
  pub fn backoff(&self, failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(16);
    self.retry_delay.saturating_mul(1 << exponent).min(self.max_backoff)
  }
}

/// Why a single fetch attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  /// The server answered with a non-success status.
  #[error("HTTP {0}")]
  Status(StatusCode),
  /// The response is a login or access-denied page.
  #[error("login or access-denied page")]
  AccessDenied,
  /// The response is an HTML page rather than a PDF.
  #[error("received HTML instead of a PDF")]
  NotPdf,
  /// The response body was empty.
  #[error("empty response body")]
  Empty,
  /// The body is smaller than a real paper can be.
  #[error("file too small: {0} bytes")]
  TooSmall(u64),
  /// The bytes on disk do not start with `%PDF`.
  #[error("missing %PDF header")]
  BadMagic,
  /// Connecting or reading the body failed.
  #[error(transparent)]
  Network(#[from] reqwest::Error),
  /// Writing the temporary file failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl FetchError {
  /// Whether another attempt at the same URL may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      FetchError::Status(status) => !matches!(status.as_u16(), 401 | 403 | 404),
      FetchError::AccessDenied | FetchError::TooSmall(_) | FetchError::BadMagic => false,
      FetchError::Network(e) => !e.is_builder(),
      FetchError::NotPdf | FetchError::Empty | FetchError::Io(_) => true,
    }
  }
}

/// Returns `true` if `path` is a file of at least `min_size` bytes starting with `%PDF`.
pub fn validate_pdf(path: &Path, min_size: u64) -> bool {
  let Ok(metadata) = std::fs::metadata(path) else {
    return false;
  };
  if !metadata.is_file() || metadata.len() < min_size {
    return false;
  }
  let mut head = [0u8; 4];
  std::fs::File::open(path)
    .and_then(|mut file| std::io::Read::read_exact(&mut file, &mut head))
    .map(|()| &head == b"%PDF")
    .unwrap_or(false)
}

/// The sibling path that receives bytes before validation.
pub fn temp_path(destination: &Path) -> PathBuf {
  let mut tmp = destination.as_os_str().to_owned();
  tmp.push(".tmp");
  PathBuf::from(tmp)
}

/// Classifies the first chunk of a response body.
fn sniff(first: &[u8]) -> std::result::Result<(), FetchError> {
  if first.starts_with(b"%PDF") {
    return Ok(());
  }
  let preview = String::from_utf8_lossy(&first[..first.len().min(SNIFF_LEN)]).to_lowercase();
  if preview.contains("<html") || preview.contains("<!doctype") {
    if ACCESS_MARKERS.iter().any(|marker| preview.contains(marker)) {
      return Err(FetchError::AccessDenied);
    }
    return Err(FetchError::NotPdf);
  }
  Ok(())
}

/// Downloads PDFs with per-URL retries and atomic promotion.
#[derive(Debug, Clone)]
pub struct Downloader {
  /// Retry behaviour per candidate URL.
  policy:   RetryPolicy,
  /// Minimum size of a valid PDF.
  min_size: u64,
}

impl Downloader {
  /// Creates a downloader from the retry settings and minimum PDF size of `config`.
  pub fn new(config: &Config) -> Self {
    Self { policy: RetryPolicy::from(&config.retry), min_size: config.min_pdf_size }
  }

  /// Creates a downloader with an explicit policy.
  pub fn with_policy(policy: RetryPolicy, min_size: u64) -> Self { Self { policy, min_size } }

  /// The minimum size of a valid PDF.
  pub fn min_size(&self) -> u64 { self.min_size }

  /// Whether a valid PDF already exists at `path`.
  pub fn is_valid(&self, path: &Path) -> bool { validate_pdf(path, self.min_size) }

  /// Tries `urls` in order until one yields a valid PDF at `destination`.
  pub async fn download(&self, client: &Client, urls: &[String], destination: &Path) -> DownloadOutcome {
    if self.is_valid(destination) {
      trace!("Already present: {}", destination.display());
      return DownloadOutcome::Skipped;
    }
    if let Some(parent) = destination.parent() {
      if let Err(e) = tokio::fs::create_dir_all(parent).await {
        error!("Cannot create {}: {e}", parent.display());
        return DownloadOutcome::Failed;
      }
    }

    for url in urls {
      match self.download_url(client, url, destination).await {
        Ok(()) => {
          debug!("Saved {} from {url}", destination.display());
          return DownloadOutcome::Downloaded;
        },
        Err(e) => debug!("Giving up on {url}: {e}"),
      }
    }
    DownloadOutcome::Failed
  }

  /// Retry loop for a single URL.
  async fn download_url(
    &self,
    client: &Client,
    url: &str,
    destination: &Path,
  ) -> std::result::Result<(), FetchError> {
    let mut attempt = 1;
    loop {
      match self.fetch_once(client, url, destination).await {
        Ok(()) => return Ok(()),
        Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
          let wait = self.policy.backoff(attempt);
          debug!("Attempt {attempt}/{} for {url} failed ({e}), retrying in {wait:?}", self.policy.max_retries);
          tokio::time::sleep(wait).await;
          attempt += 1;
        },
        Err(e) => return Err(e),
      }
    }
  }

  /// One attempt; the temporary file never survives a failure.
  async fn fetch_once(
    &self,
    client: &Client,
    url: &str,
    destination: &Path,
  ) -> std::result::Result<(), FetchError> {
    let tmp = temp_path(destination);
    let result = self.stream_to_disk(client, url, &tmp).await;
    let result = match result {
      Ok(()) => tokio::fs::rename(&tmp, destination).await.map_err(FetchError::from),
      Err(e) => Err(e),
    };
    if result.is_err() {
      let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
  }

  /// Streams the body of `url` into `tmp` and validates what landed on disk.
  async fn stream_to_disk(
    &self,
    client: &Client,
    url: &str,
    tmp: &Path,
  ) -> std::result::Result<(), FetchError> {
    let mut response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status(status));
    }

    let first = match response.chunk().await? {
      Some(chunk) if !chunk.is_empty() => chunk,
      _ => return Err(FetchError::Empty),
    };
    sniff(&first)?;

    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(&first).await?;
    let mut total = first.len() as u64;
    while let Some(chunk) = response.chunk().await? {
      file.write_all(&chunk).await?;
      total += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if total < self.min_size {
      return Err(FetchError::TooSmall(total));
    }

    let mut head = [0u8; 4];
    let mut file = tokio::fs::File::open(tmp).await?;
    match file.read_exact(&mut head).await {
      Ok(_) if &head == b"%PDF" => Ok(()),
      Ok(_) => Err(FetchError::BadMagic),
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FetchError::BadMagic),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pdf_body(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(len, b'0');
    body
  }

  fn downloader() -> Downloader {
    Downloader::with_policy(
      RetryPolicy {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
      },
      MIN_PDF_SIZE,
    )
  }

  #[test]
  fn test_backoff_is_exponential_and_capped() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff(1), Duration::from_secs(1));
    assert_eq!(policy.backoff(2), Duration::from_secs(2));
    assert_eq!(policy.backoff(3), Duration::from_secs(4));
    assert_eq!(policy.backoff(4), Duration::from_secs(5));
    assert_eq!(policy.backoff(40), Duration::from_secs(5));
  }

  #[test]
  fn test_fetch_error_classification() {
    assert!(!FetchError::Status(StatusCode::FORBIDDEN).is_retryable());
    assert!(!FetchError::Status(StatusCode::NOT_FOUND).is_retryable());
    assert!(FetchError::Status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
    assert!(FetchError::Status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
    assert!(!FetchError::AccessDenied.is_retryable());
    assert!(!FetchError::TooSmall(10).is_retryable());
    assert!(FetchError::NotPdf.is_retryable());
    assert!(FetchError::Empty.is_retryable());
  }

  #[test]
  fn test_sniff() {
    assert!(sniff(b"%PDF-1.5").is_ok());
    assert!(matches!(
      sniff(b"<!DOCTYPE html><html><title>Sign In</title></html>"),
      Err(FetchError::AccessDenied)
    ));
    assert!(matches!(sniff(b"<html><body>Loading...</body></html>"), Err(FetchError::NotPdf)));
    assert!(sniff(b"\x00\x01binary").is_ok());
  }

  #[test]
  fn test_validate_pdf() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.pdf");
    let small = dir.path().join("small.pdf");
    let bad = dir.path().join("bad.pdf");
    std::fs::write(&good, pdf_body(60_000)).unwrap();
    std::fs::write(&small, pdf_body(1_000)).unwrap();
    std::fs::write(&bad, vec![b'x'; 60_000]).unwrap();

    assert!(validate_pdf(&good, MIN_PDF_SIZE));
    assert!(!validate_pdf(&small, MIN_PDF_SIZE));
    assert!(!validate_pdf(&bad, MIN_PDF_SIZE));
    assert!(!validate_pdf(&dir.path().join("missing.pdf"), MIN_PDF_SIZE));
    assert!(!validate_pdf(dir.path(), 0));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_download_writes_validated_file() {
    let mut server = mockito::Server::new_async().await;
    let mock =
      server.mock("GET", "/paper.pdf").with_body(pdf_body(80_000)).expect(1).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("papers").join("Paper.pdf");
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Downloaded);
    assert!(validate_pdf(&destination, MIN_PDF_SIZE));
    assert!(!temp_path(&destination).exists());
    mock.assert_async().await;
    assert!(logs_contain("Saved"));
  }

  #[tokio::test]
  async fn test_existing_valid_file_is_not_refetched() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/paper.pdf").with_status(500).expect(0).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    std::fs::write(&destination, pdf_body(60_000)).unwrap();

    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Skipped);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_invalid_existing_file_is_replaced() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/paper.pdf").with_body(pdf_body(70_000)).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    std::fs::write(&destination, b"<html>old error page</html>").unwrap();

    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Downloaded);
    assert_eq!(std::fs::metadata(&destination).unwrap().len(), 70_000);
  }

  #[tokio::test]
  async fn test_forbidden_candidates_fall_through_without_retry() {
    let mut server = mockito::Server::new_async().await;
    let first = server.mock("GET", "/a.pdf").with_status(403).expect(1).create_async().await;
    let second = server.mock("GET", "/b.pdf").with_status(403).expect(1).create_async().await;
    let third = server.mock("GET", "/c.pdf").with_body(pdf_body(60_000)).expect(1).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    let urls: Vec<String> =
      ["/a.pdf", "/b.pdf", "/c.pdf"].iter().map(|p| format!("{}{p}", server.url())).collect();
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Downloaded);
    first.assert_async().await;
    second.assert_async().await;
    third.assert_async().await;
  }

  #[tokio::test]
  async fn test_login_wall_is_terminal() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/paper.pdf")
      .with_header("content-type", "text/html")
      .with_body("<!DOCTYPE html><html><body><a href=\"/login\">Sign in</a> to continue</body></html>")
      .expect(1)
      .create_async()
      .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    assert!(!destination.exists());
    assert!(!temp_path(&destination).exists());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_plain_html_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/paper.pdf")
      .with_body("<html><body>Please wait while we prepare your document</body></html>")
      .expect(3)
      .create_async()
      .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_server_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/paper.pdf").with_status(503).expect(3).create_async().await;

    let dir = tempdir().unwrap();
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &dir.path().join("P.pdf")).await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_undersized_pdf_never_reaches_final_path() {
    let mut server = mockito::Server::new_async().await;
    let mock =
      server.mock("GET", "/paper.pdf").with_body(pdf_body(10_000)).expect(1).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    assert!(!destination.exists());
    assert!(!temp_path(&destination).exists());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_non_pdf_bytes_are_rejected_after_write() {
    let mut server = mockito::Server::new_async().await;
    let mock =
      server.mock("GET", "/paper.pdf").with_body(vec![b'x'; 60_000]).expect(1).create_async().await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("Paper.pdf");
    let urls = vec![format!("{}/paper.pdf", server.url())];
    let outcome = downloader().download(&Client::new(), &urls, &destination).await;

    assert_eq!(outcome, DownloadOutcome::Failed);
    assert!(!destination.exists());
    assert!(!temp_path(&destination).exists());
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_no_candidates_fails() {
    let dir = tempdir().unwrap();
    let outcome = downloader().download(&Client::new(), &[], &dir.path().join("P.pdf")).await;
    assert_eq!(outcome, DownloadOutcome::Failed);
  }
}
