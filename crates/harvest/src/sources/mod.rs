//! Conference sources.
//!
//! A [`SourceAdapter`] knows how to list the papers of one conference for a given year and which
//! URLs might serve each paper's PDF. The crawler only ever talks to this trait, so adding a
//! conference means adding an adapter and a `[conferences.<key>]` entry.
//!
//! Listing is best effort. Adapters try several discovery strategies in order and return the
//! first non-empty result; a page that fails to load degrades the result instead of aborting it.
//! Candidate URLs are returned in decreasing order of trust and are deduplicated.

use scraper::{ElementRef, Html, Selector};

use super::*;
use crate::{
  services::{ArxivClient, FlareSolverrClient, SemanticScholarClient},
  session::SessionFactory,
};

pub mod acm_ccs;
pub mod ieee_sp;
pub mod ndss;
pub mod usenix;

pub use acm_ccs::AcmCcsSource;
pub use ieee_sp::IeeeSpSource;
pub use ndss::NdssSource;
pub use usenix::UsenixSource;

/// A conference website that papers can be listed and fetched from.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
  /// Display name, e.g. "USENIX Security".
  fn name(&self) -> &str;

  /// Directory under the base directory, e.g. "USENIX_Security".
  fn dir_name(&self) -> &str;

  /// Session factory whose cookies apply to this source's downloads.
  fn sessions(&self) -> &SessionFactory;

  /// Lists every paper of `year`. An empty list means nothing was found.
  async fn list_papers(&self, year: u32) -> Result<Vec<PaperDescriptor>>;

  /// Candidate PDF URLs for `paper`, most trusted first.
  async fn pdf_candidate_urls(&self, paper: &PaperDescriptor) -> Vec<String> {
    if paper.pdf_url.is_empty() {
      Vec::new()
    } else {
      vec![paper.pdf_url.clone()]
    }
  }
}

/// Per-run options that are not part of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
  /// Use FlareSolverr to obtain challenge cookies.
  pub use_flaresolverr: bool,
  /// Cookie file exported from a logged-in browser session.
  pub cookie_file:      Option<PathBuf>,
}

impl SourceOptions {
  /// Enables FlareSolverr.
  pub fn with_flaresolverr(mut self, enabled: bool) -> Self {
    self.use_flaresolverr = enabled;
    self
  }

  /// Sets the cookie file.
  pub fn with_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.cookie_file = Some(path.into());
    self
  }
}

/// Builds the adapter for the conference configured under `key`.
pub fn build_source(
  key: &str,
  config: &Config,
  options: SourceOptions,
) -> Result<Box<dyn SourceAdapter>> {
  let conference = config.conference(key)?.clone();
  check_credentials(&conference, &options)?;
  let source: Box<dyn SourceAdapter> = match key {
    "usenix" => Box::new(UsenixSource::new(conference, config)),
    "ndss" => Box::new(NdssSource::new(conference, config)),
    "ieee_sp" => Box::new(IeeeSpSource::new(conference, config, &options)?),
    "acm_ccs" => Box::new(AcmCcsSource::new(conference, config, &options)?),
    other =>
      return Err(HarvestError::Config(format!(
        "Conference `{other}` is configured but has no source adapter"
      ))),
  };
  Ok(source)
}

/// The cookie file to use: the per-run option wins over the configured one.
fn cookie_file_for(conference: &ConferenceConfig, options: &SourceOptions) -> Option<PathBuf> {
  options.cookie_file.clone().or_else(|| conference.cookie_file.clone())
}

/// Fails when `conference` requires credentials and neither a cookie file nor FlareSolverr was
/// provided.
fn check_credentials(conference: &ConferenceConfig, options: &SourceOptions) -> Result<()> {
  if conference.requires_credentials
    && cookie_file_for(conference, options).is_none()
    && !options.use_flaresolverr
  {
    return Err(HarvestError::MissingCredential {
      source_name: conference.name.clone(),
      hint:        "pass --cookies <file> or --flaresolverr, or set `cookie_file` in the \
                    configuration"
        .to_string(),
    });
  }
  Ok(())
}

/// Loads a cookie file into `sessions`. Returns whether any cookie was loaded.
fn apply_cookie_file(sessions: &SessionFactory, path: &Path) -> bool {
  if !path.exists() {
    warn!("Cookie file not found: {}", path.display());
    return false;
  }
  match crate::services::cookies::load_cookie_file(path) {
    Ok(cookies) if !cookies.is_empty() => {
      sessions.update_cookies(&cookies);
      true
    },
    Ok(_) => {
      warn!("Cookie file {} is empty", path.display());
      false
    },
    Err(e) => {
      warn!("Failed to load cookies from {}: {e}", path.display());
      false
    },
  }
}

/// Open-access lookups shared by the paywalled sources.
#[derive(Debug, Clone)]
pub struct Mirrors {
  /// Semantic Scholar client.
  pub semantic_scholar: SemanticScholarClient,
  /// arXiv client.
  pub arxiv:            ArxivClient,
}

impl Mirrors {
  /// Creates mirror clients with a plain client from `sessions`.
  pub fn new(sessions: &SessionFactory) -> Result<Self> {
    let client = sessions.client()?;
    Ok(Self {
      semantic_scholar: SemanticScholarClient::new(client.clone()),
      arxiv:            ArxivClient::new(client),
    })
  }

  /// Points both clients at other endpoints.
  pub fn with_endpoints(mut self, semantic_scholar: &str, arxiv: &str) -> Self {
    self.semantic_scholar = self.semantic_scholar.with_base_url(semantic_scholar);
    self.arxiv = self.arxiv.with_base_url(arxiv);
    self
  }
}

/// Drops repeated URLs, keeping the first occurrence.
pub fn dedup_urls(urls: Vec<String>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  urls.into_iter().filter(|url| !url.is_empty() && seen.insert(url.clone())).collect()
}

/// GETs `url` and returns the body on a 2xx status.
async fn fetch_html(client: &Client, url: &str, timeout: Duration) -> Option<String> {
  match client.get(url).timeout(timeout).send().await {
    Ok(response) if response.status().is_success() => match response.text().await {
      Ok(body) => Some(body),
      Err(e) => {
        debug!("Failed to read {url}: {e}");
        None
      },
    },
    Ok(response) => {
      trace!("{url} returned {}", response.status());
      None
    },
    Err(e) => {
      debug!("Failed to access {url}: {e}");
      None
    },
  }
}

/// Parses a selector that is known to be valid.
fn selector(css: &str) -> Selector {
  Selector::parse(css).unwrap_or_else(|_| unreachable!("invalid selector {css}"))
}

/// Text of an element with whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
  element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Resolves `href` against `base`.
fn absolute_url(base: &str, href: &str) -> Option<String> {
  if href.starts_with("http://") || href.starts_with("https://") {
    return Some(href.to_string());
  }
  Url::parse(base).and_then(|base| base.join(href)).ok().map(String::from)
}

/// Closest ancestor of `element` whose tag is one of `names`.
fn ancestor<'a>(element: ElementRef<'a>, names: &[&str]) -> Option<ElementRef<'a>> {
  element
    .ancestors()
    .filter_map(ElementRef::wrap)
    .find(|parent| names.contains(&parent.value().name()))
}

/// First element in `root` whose tag is one of `names` and, if given, whose class contains
/// `class_hint` (case-insensitive).
fn find_descendant<'a>(
  root: ElementRef<'a>,
  names: &[&str],
  class_hint: Option<&str>,
) -> Option<ElementRef<'a>> {
  root.descendants().filter_map(ElementRef::wrap).skip(1).find(|el| {
    names.contains(&el.value().name())
      && class_hint.map_or(true, |hint| {
        el.value().attr("class").is_some_and(|class| class.to_lowercase().contains(hint))
      })
  })
}

/// Authors block: the first `div` or `p` whose class mentions "author".
fn authors_in(document: &Html) -> String {
  find_descendant(document.root_element(), &["div", "p"], Some("author"))
    .map(element_text)
    .unwrap_or_default()
}

/// Links whose `href` ends in `.pdf`, case-insensitively, in document order.
fn pdf_links(root: ElementRef<'_>) -> Vec<(ElementRef<'_>, String)> {
  lazy_static! {
    static ref LINK: Selector = selector("a[href]");
  }
  root
    .select(&LINK)
    .filter_map(|a| a.value().attr("href").map(|href| (a, href.trim().to_string())))
    .filter(|(_, href)| href.to_lowercase().ends_with(".pdf"))
    .collect()
}

/// Drops papers whose lowercased 50-character title prefix was already seen.
fn dedup_by_title_prefix(papers: Vec<PaperDescriptor>) -> Vec<PaperDescriptor> {
  let mut seen = std::collections::HashSet::new();
  papers
    .into_iter()
    .filter(|paper| seen.insert(paper.title.to_lowercase().chars().take(50).collect::<String>()))
    .collect()
}
