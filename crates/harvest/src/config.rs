//! Configuration for crawling and conversion.
//!
//! A [`Config`] is read from a TOML file (by default `<config dir>/harvest/config.toml`) and can
//! be adjusted afterwards with `with_*` builder methods, which is how command line flags override
//! file values. Every field has a default, so a partial file (or no file at all) is valid.
//!
//! Per-year identifiers that change every year, such as IEEE Xplore proceeding numbers, are
//! configuration data under `[conferences.<key>.proceedings]` rather than constants in code.
//!
//! # Examples
//!
//! ```
//! use harvest::config::Config;
//!
//! let config: Config = toml::from_str(
//!   r#"
//!   workers = 2
//!
//!   [conferences.ieee_sp.proceedings]
//!   "2026" = "11111111"
//!   "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.workers, 2);
//! assert_eq!(config.conference("ieee_sp").unwrap().proceeding(2026), Some("11111111"));
//! ```

use super::*;
use crate::metadata::MetadataFormat;

/// Desktop Chrome user agent presented to conference sites.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/120.0.0.0 Safari/537.36";

/// Smallest file, in bytes, that is accepted as a downloaded paper.
pub const MIN_PDF_SIZE: u64 = 50_000;

/// Largest file, in bytes, that is handed to the converter.
pub const MAX_CONVERT_PDF_SIZE: u64 = 35 * 1024 * 1024;

/// Default FlareSolverr endpoint.
pub const DEFAULT_FLARESOLVERR_URL: &str = "http://localhost:8191/v1";

/// Top level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Root under which every conference directory is created.
  pub base_dir:         PathBuf,
  /// Polite delay between requests, in seconds.
  pub delay_secs:       f64,
  /// Number of concurrent downloads per year.
  pub workers:          usize,
  /// Which metadata files to write after each year.
  pub metadata_format:  MetadataFormat,
  /// Minimum size of a valid PDF, in bytes.
  pub min_pdf_size:     u64,
  /// Maximum size of a PDF that is sent to the converter, in bytes.
  pub max_pdf_size:     u64,
  /// Download retry behaviour.
  pub retry:            RetrySettings,
  /// FlareSolverr endpoint (`.../v1`).
  pub flaresolverr_url: String,
  /// User agent sent with every request.
  pub user_agent:       String,
  /// Conversion pipeline settings.
  pub conversion:       ConversionSettings,
  /// Known conferences keyed by their short name (`usenix`, `ndss`, ...).
  #[serde(deserialize_with = "merge_conferences")]
  pub conferences:      BTreeMap<String, ConferenceConfig>,
}

/// Retry and timeout settings for PDF downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  /// Attempts per candidate URL.
  pub max_retries:          u32,
  /// Base backoff before the second attempt, in milliseconds.
  pub retry_delay_ms:       u64,
  /// Upper bound on the backoff, in milliseconds.
  pub max_backoff_ms:       u64,
  /// Connection timeout, in seconds.
  pub connect_timeout_secs: u64,
  /// Timeout for a whole request including the body, in seconds.
  pub read_timeout_secs:    u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_retries:          3,
      retry_delay_ms:       1_000,
      max_backoff_ms:       5_000,
      connect_timeout_secs: 10,
      read_timeout_secs:    60,
    }
  }
}

/// Settings for the external PDF to Markdown converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
  /// Converter executable.
  pub command:                 String,
  /// Converter backend; `auto` and `pipeline` leave the choice to the converter.
  pub backend:                 String,
  /// Concurrent converter processes; half the available cores when unset.
  pub workers:                 Option<usize>,
  /// Tasks submitted per batch.
  pub batch_size:              usize,
  /// Wall-clock limit per conversion, in seconds.
  pub timeout_secs:            u64,
  /// Available memory below which the pipeline pauses between batches, in MiB.
  pub min_available_memory_mb: u64,
  /// Length of one memory pause, in seconds.
  pub memory_pause_secs:       u64,
  /// Pauses after which the pipeline continues despite low memory.
  pub max_memory_waits:        u32,
  /// Extra environment variables for converter processes.
  pub env:                     BTreeMap<String, String>,
}

impl Default for ConversionSettings {
  fn default() -> Self {
    Self {
      command:                 "mineru".to_string(),
      backend:                 "auto".to_string(),
      workers:                 None,
      batch_size:              10,
      timeout_secs:            600,
      min_available_memory_mb: 2048,
      memory_pause_secs:       30,
      max_memory_waits:        10,
      env:                     BTreeMap::from([(
        "PYTHONIOENCODING".to_string(),
        "utf-8".to_string(),
      )]),
    }
  }
}

impl ConversionSettings {
  /// Resolved worker count, never zero.
  pub fn worker_count(&self) -> usize {
    self.workers.unwrap_or_else(|| {
      std::thread::available_parallelism().map(|n| n.get() / 2).unwrap_or(1)
    })
    .max(1)
  }
}

/// One conference that can be crawled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConferenceConfig {
  /// Display name.
  pub name:                 String,
  /// Directory under the base directory.
  pub dir_name:             String,
  /// Years crawled when none are given.
  pub years:                Vec<u32>,
  /// Whether papers can be fetched without an institutional session.
  pub free_access:          bool,
  /// Refuse to run without a cookie file or FlareSolverr.
  pub requires_credentials: bool,
  /// Cookie file exported from a logged-in browser session.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cookie_file:          Option<PathBuf>,
  /// Per-year identifiers (proceeding numbers, DOI prefixes) keyed by year.
  pub proceedings:          BTreeMap<String, String>,
}

impl ConferenceConfig {
  /// Creates a conference entry with no per-year identifiers.
  pub fn new(name: &str, dir_name: &str, years: &[u32], free_access: bool) -> Self {
    Self {
      name: name.to_string(),
      dir_name: dir_name.to_string(),
      years: years.to_vec(),
      free_access,
      requires_credentials: false,
      cookie_file: None,
      proceedings: BTreeMap::new(),
    }
  }

  /// Adds a per-year identifier.
  pub fn with_proceeding(mut self, year: u32, id: &str) -> Self {
    self.proceedings.insert(year.to_string(), id.to_string());
    self
  }

  /// The identifier configured for `year`, if any.
  pub fn proceeding(&self, year: u32) -> Option<&str> {
    self.proceedings.get(&year.to_string()).map(String::as_str)
  }
}

/// Partial conference entry as it appears in a configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConferenceOverride {
  name:                 Option<String>,
  dir_name:             Option<String>,
  years:                Option<Vec<u32>>,
  free_access:          Option<bool>,
  requires_credentials: Option<bool>,
  cookie_file:          Option<PathBuf>,
  proceedings:          BTreeMap<String, String>,
}

impl ConferenceOverride {
  /// Applies the fields present in the file to `conference`.
  fn apply(self, mut conference: ConferenceConfig) -> ConferenceConfig {
    if let Some(name) = self.name {
      conference.name = name;
    }
    if let Some(dir_name) = self.dir_name {
      conference.dir_name = dir_name;
    }
    if let Some(years) = self.years {
      conference.years = years;
    }
    if let Some(free_access) = self.free_access {
      conference.free_access = free_access;
    }
    if let Some(requires_credentials) = self.requires_credentials {
      conference.requires_credentials = requires_credentials;
    }
    if self.cookie_file.is_some() {
      conference.cookie_file = self.cookie_file;
    }
    conference.proceedings.extend(self.proceedings);
    conference
  }
}

/// Merges the conferences of a configuration file over the built-in ones.
fn merge_conferences<'de, D>(
  deserializer: D,
) -> std::result::Result<BTreeMap<String, ConferenceConfig>, D::Error>
where D: serde::Deserializer<'de> {
  use serde::de::Error as _;

  let overrides = BTreeMap::<String, ConferenceOverride>::deserialize(deserializer)?;
  let mut conferences = Config::default().conferences;
  for (key, entry) in overrides {
    let base = match conferences.remove(&key) {
      Some(existing) => existing,
      None => {
        let name = entry
          .name
          .clone()
          .ok_or_else(|| D::Error::custom(format!("conference `{key}` needs a `name`")))?;
        let dir_name = entry.dir_name.clone().unwrap_or_else(|| name.replace(' ', "_"));
        ConferenceConfig::new(&name, &dir_name, &[], true)
      },
    };
    conferences.insert(key, entry.apply(base));
  }
  Ok(conferences)
}

impl Default for Config {
  fn default() -> Self {
    let ieee = [
      (2025, "10919321"),
      (2024, "10646615"),
      (2023, "10179215"),
      (2022, "9833550"),
      (2021, "9519381"),
      (2020, "9144328"),
      (2019, "8835275"),
      (2018, "8418567"),
    ]
    .into_iter()
    .fold(
      ConferenceConfig::new("IEEE S&P", "IEEE_SP", &[2023, 2022, 2021, 2020], true),
      |conf, (year, id)| conf.with_proceeding(year, id),
    );

    let acm = [
      (2024, "10.1145/3658644"),
      (2023, "10.1145/3576915"),
      (2022, "10.1145/3548606"),
      (2021, "10.1145/3460120"),
      (2020, "10.1145/3372297"),
      (2019, "10.1145/3319535"),
      (2018, "10.1145/3243734"),
    ]
    .into_iter()
    .fold(
      ConferenceConfig::new("ACM CCS", "ACM_CCS", &[2024, 2023, 2022, 2021, 2020], false),
      |conf, (year, prefix)| conf.with_proceeding(year, prefix),
    );

    let recent = [2024, 2023, 2022, 2021, 2020];
    let conferences = BTreeMap::from([
      (
        "usenix".to_string(),
        ConferenceConfig::new("USENIX Security", "USENIX_Security", &recent, true),
      ),
      ("ndss".to_string(), ConferenceConfig::new("NDSS", "NDSS", &recent, true)),
      ("ieee_sp".to_string(), ieee),
      ("acm_ccs".to_string(), acm),
    ]);

    Self {
      base_dir: Self::default_base_dir(),
      delay_secs: 1.0,
      workers: 5,
      metadata_format: MetadataFormat::Csv,
      min_pdf_size: MIN_PDF_SIZE,
      max_pdf_size: MAX_CONVERT_PDF_SIZE,
      retry: RetrySettings::default(),
      flaresolverr_url: DEFAULT_FLARESOLVERR_URL.to_string(),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      conversion: ConversionSettings::default(),
      conferences,
    }
  }
}

impl Config {
  /// Default location of the configuration file.
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("harvest").join("config.toml")
  }

  /// Default root for downloaded papers.
  pub fn default_base_dir() -> PathBuf {
    dirs::document_dir().unwrap_or_else(|| PathBuf::from(".")).join("harvest")
  }

  /// Reads a configuration file.
  ///
  /// Conferences listed in the file are merged field by field over the built-in ones, so a file
  /// only needs to mention what it changes. New conferences need at least a `name`.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads `path` if it exists, otherwise returns the defaults.
  pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if path.exists() {
      Self::load(path)
    } else {
      debug!("No configuration at {}, using defaults", path.display());
      Ok(Self::default())
    }
  }

  /// Writes the configuration as TOML, creating parent directories.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Rejects values that would make a run meaningless.
  pub fn validate(&self) -> Result<()> {
    if self.workers == 0 {
      return Err(HarvestError::Config("workers must be at least 1".into()));
    }
    if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
      return Err(HarvestError::Config("delay_secs must be a non-negative number".into()));
    }
    if self.retry.max_retries == 0 {
      return Err(HarvestError::Config("retry.max_retries must be at least 1".into()));
    }
    if self.conversion.batch_size == 0 {
      return Err(HarvestError::Config("conversion.batch_size must be at least 1".into()));
    }
    if self.min_pdf_size >= self.max_pdf_size {
      return Err(HarvestError::Config("min_pdf_size must be below max_pdf_size".into()));
    }
    Ok(())
  }

  /// Looks up a conference by key.
  pub fn conference(&self, key: &str) -> Result<&ConferenceConfig> {
    self.conferences.get(key).ok_or_else(|| HarvestError::UnknownConference(key.to_string()))
  }

  /// All configured conference keys, sorted.
  pub fn conference_keys(&self) -> Vec<String> { self.conferences.keys().cloned().collect() }

  /// The polite delay as a [`Duration`].
  pub fn delay(&self) -> Duration { Duration::from_secs_f64(self.delay_secs.max(0.0)) }

  /// Directory holding one year of a conference.
  pub fn year_dir(&self, conference: &ConferenceConfig, year: u32) -> PathBuf {
    self.base_dir.join(&conference.dir_name).join(year.to_string())
  }

  /// Sets the base directory.
  pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
    self.base_dir = base_dir.into();
    self
  }

  /// Sets the polite delay in seconds.
  pub fn with_delay_secs(mut self, delay_secs: f64) -> Self {
    self.delay_secs = delay_secs;
    self
  }

  /// Sets the download worker count.
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// Sets the metadata format.
  pub fn with_metadata_format(mut self, format: MetadataFormat) -> Self {
    self.metadata_format = format;
    self
  }

  /// Sets the FlareSolverr endpoint.
  pub fn with_flaresolverr_url(mut self, url: &str) -> Self {
    self.flaresolverr_url = url.to_string();
    self
  }

  /// Sets the retry settings.
  pub fn with_retry(mut self, retry: RetrySettings) -> Self {
    self.retry = retry;
    self
  }

  /// Sets the conversion settings.
  pub fn with_conversion(mut self, conversion: ConversionSettings) -> Self {
    self.conversion = conversion;
    self
  }

  /// Adds or replaces a conference.
  pub fn with_conference(mut self, key: &str, conference: ConferenceConfig) -> Self {
    self.conferences.insert(key.to_string(), conference);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_conferences() {
    let config = Config::default();
    assert_eq!(config.conference_keys(), vec!["acm_ccs", "ieee_sp", "ndss", "usenix"]);
    assert_eq!(config.conference("usenix").unwrap().dir_name, "USENIX_Security");
    assert_eq!(config.conference("ieee_sp").unwrap().proceeding(2022), Some("9833550"));
    assert_eq!(config.conference("acm_ccs").unwrap().proceeding(2024), Some("10.1145/3658644"));
    assert!(!config.conference("acm_ccs").unwrap().free_access);
    assert!(matches!(config.conference("sigcomm"), Err(HarvestError::UnknownConference(_))));
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config: Config = toml::from_str("delay_secs = 0.5\n[retry]\nmax_retries = 5\n").unwrap();
    assert_eq!(config.delay(), Duration::from_millis(500));
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.max_backoff_ms, 5_000);
    assert_eq!(config.workers, 5);
    assert_eq!(config.min_pdf_size, MIN_PDF_SIZE);
  }

  #[test]
  fn test_file_conferences_merge_over_defaults() {
    let config: Config = toml::from_str(
      r#"
      [conferences.acm_ccs]
      requires_credentials = true

      [conferences.ieee_sp.proceedings]
      "2026" = "11111111"

      [conferences.raid]
      name = "RAID Symposium"
      years = [2024]
      "#,
    )
    .unwrap();
    let acm = config.conference("acm_ccs").unwrap();
    assert!(acm.requires_credentials);
    assert_eq!(acm.name, "ACM CCS");
    let ieee = config.conference("ieee_sp").unwrap();
    assert_eq!(ieee.proceeding(2026), Some("11111111"));
    assert_eq!(ieee.proceeding(2023), Some("10179215"));
    assert_eq!(config.conference("raid").unwrap().dir_name, "RAID_Symposium");
    assert!(config.conference("usenix").is_ok());
  }

  #[test]
  fn test_new_conference_without_name_is_rejected() {
    assert!(toml::from_str::<Config>("[conferences.raid]
years = [2024]
").is_err());
  }

  #[test]
  fn test_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = Config::default().with_base_dir(dir.path()).with_workers(3);
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
  }

  #[test]
  fn test_load_or_default_without_file() {
    let dir = tempdir().unwrap();
    let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
    assert_eq!(config.workers, 5);
  }

  #[test]
  fn test_validate_rejects_zero_workers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "workers = 0\n").unwrap();
    assert!(matches!(Config::load(&path), Err(HarvestError::Config(_))));
  }

  #[test]
  fn test_conversion_worker_count_is_positive() {
    let settings = ConversionSettings { workers: Some(0), ..Default::default() };
    assert_eq!(settings.worker_count(), 1);
    assert!(ConversionSettings::default().worker_count() >= 1);
  }
}
