//! ACM Conference on Computer and Communications Security.
//!
//! The paper list comes from the DBLP table of contents, falling back to the SIGSAC OpenTOC
//! page. Both only give titles, authors and DOIs. PDFs live in the ACM Digital Library, which
//! needs either session cookies (from a cookie file or a FlareSolverr challenge) or an
//! open-access copy found through Semantic Scholar or arXiv.

use super::*;
use crate::services::cookies::save_cookie_file;

/// Root of DBLP.
pub const DBLP_BASE: &str = "https://dblp.org";

/// Root of the SIGSAC website hosting OpenTOC pages.
pub const SIGSAC_BASE: &str = "https://www.sigsac.org";

/// Root of the ACM Digital Library.
pub const ACM_DL_BASE: &str = "https://dl.acm.org";

/// Name of the cookie file saved after a solved challenge.
pub const COOKIE_FILE_NAME: &str = "acm_cookies.json";

/// Timeout for table of contents pages.
const TOC_TIMEOUT: Duration = Duration::from_secs(30);

/// Titles shorter than this are navigation text, not paper titles.
const MIN_TITLE_LEN: usize = 10;

lazy_static! {
  /// DOI inside a `doi.org` link.
  static ref DOI_LINK: Regex = Regex::new(r"doi\.org/(10\.\d+/[^\s]+)").unwrap();
  /// ACM DOI inside an OpenTOC link.
  static ref ACM_DOI: Regex = Regex::new(r"10\.1145/[\d.]+").unwrap();
}

/// A paper as listed by a table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TocEntry {
  /// Title without a trailing period.
  title:   String,
  /// Comma-joined authors.
  authors: String,
  /// DOI, possibly empty.
  doi:     String,
}

/// Parses a DBLP conference page.
fn parse_dblp(html: &str) -> Vec<TocEntry> {
  lazy_static! {
    static ref ENTRY: Selector = selector("li.entry");
    static ref TITLE: Selector = selector("span.title");
    static ref DOI: Selector = selector(r#"a[href*="doi.org"]"#);
    static ref AUTHOR: Selector = selector(r#"span[itemprop="author"]"#);
  }
  let document = Html::parse_document(html);
  document
    .select(&ENTRY)
    .filter(|entry| !entry.value().classes().any(|class| class == "proceedings"))
    .filter_map(|entry| {
      let title = element_text(entry.select(&TITLE).next()?);
      let title = title.strip_suffix('.').unwrap_or(&title).to_string();
      let doi = entry
        .select(&DOI)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| DOI_LINK.captures(href).map(|caps| caps[1].to_string()))
        .unwrap_or_default();
      let authors = entry
        .select(&AUTHOR)
        .map(element_text)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
      Some(TocEntry { title, authors, doi })
    })
    .collect()
}

/// Parses a SIGSAC OpenTOC page.
fn parse_opentoc(html: &str) -> Vec<TocEntry> {
  lazy_static! {
    static ref PAPER: Selector = selector(r#"a[href*="dl.acm.org/doi/10.1145"]"#);
    static ref ITEM: Selector = selector("li");
  }
  let document = Html::parse_document(html);
  document
    .select(&PAPER)
    .filter_map(|link| {
      let title = element_text(link);
      if title.chars().count() < MIN_TITLE_LEN {
        return None;
      }
      let doi = link
        .value()
        .attr("href")
        .and_then(|href| ACM_DOI.find(href))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
      let authors = ancestor(link, &["div", "li", "h5"])
        .and_then(|parent| {
          parent
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .find(|sibling| matches!(sibling.value().name(), "ul" | "div"))
        })
        .map(|list| list.select(&ITEM).map(element_text).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
      Some(TocEntry { title, authors, doi })
    })
    .collect()
}

/// Source adapter for ACM CCS.
#[derive(Debug)]
pub struct AcmCcsSource {
  /// Conference settings.
  conference:   ConferenceConfig,
  /// Session factory; holds ACM cookies once known.
  sessions:     SessionFactory,
  /// Where solved cookies are saved.
  cookie_path:  PathBuf,
  /// DBLP root, overridable for tests.
  dblp_base:    String,
  /// SIGSAC root, overridable for tests.
  sigsac_base:  String,
  /// ACM Digital Library root, overridable for tests.
  acm_base:     String,
  /// Open-access mirrors.
  mirrors:      Mirrors,
  /// Challenge solver; always present for paywalled conferences.
  flaresolverr: Option<FlareSolverrClient>,
}

impl AcmCcsSource {
  /// Creates the adapter and loads cookies from the given cookie file or, failing that, from the
  /// cookies saved by an earlier run.
  pub fn new(conference: ConferenceConfig, config: &Config, options: &SourceOptions) -> Result<Self> {
    let sessions = SessionFactory::new(config);
    let cookie_path = config.base_dir.join(&conference.dir_name).join(COOKIE_FILE_NAME);
    match cookie_file_for(&conference, options) {
      Some(path) => {
        apply_cookie_file(&sessions, &path);
      },
      None if cookie_path.exists() => {
        apply_cookie_file(&sessions, &cookie_path);
      },
      None => {},
    }

    let mirrors = Mirrors::new(&sessions)?;
    let flaresolverr = if options.use_flaresolverr || !conference.free_access {
      Some(FlareSolverrClient::new(sessions.client()?, &config.flaresolverr_url))
    } else {
      None
    };
    Ok(Self {
      conference,
      sessions,
      cookie_path,
      dblp_base: DBLP_BASE.to_string(),
      sigsac_base: SIGSAC_BASE.to_string(),
      acm_base: ACM_DL_BASE.to_string(),
      mirrors,
      flaresolverr,
    })
  }

  /// Points the adapter at other DBLP, SIGSAC and ACM roots.
  pub fn with_endpoints(mut self, dblp: &str, sigsac: &str, acm: &str) -> Self {
    self.dblp_base = dblp.trim_end_matches('/').to_string();
    self.sigsac_base = sigsac.trim_end_matches('/').to_string();
    self.acm_base = acm.trim_end_matches('/').to_string();
    self
  }

  /// Replaces the open-access mirrors.
  pub fn with_mirrors(mut self, mirrors: Mirrors) -> Self {
    self.mirrors = mirrors;
    self
  }

  /// Replaces the challenge solver.
  pub fn with_flaresolverr(mut self, flaresolverr: Option<FlareSolverrClient>) -> Self {
    self.flaresolverr = flaresolverr;
    self
  }

  /// Entries from DBLP.
  async fn from_dblp(&self, client: &Client, year: u32) -> Vec<TocEntry> {
    let url = format!("{}/db/conf/ccs/ccs{year}.html", self.dblp_base);
    info!("Fetching paper list from DBLP: {url}");
    let Some(html) = fetch_html(client, &url, TOC_TIMEOUT).await else {
      warn!("DBLP has no table of contents for {year}");
      return Vec::new();
    };
    let entries = parse_dblp(&html);
    info!("Got {} papers from DBLP", entries.len());
    entries
  }

  /// Entries from the first OpenTOC page that lists any.
  async fn from_opentoc(&self, client: &Client, year: u32) -> Vec<TocEntry> {
    let pages = [
      format!("{}/ccs/CCS{year}/tocs/tocs-ccs{}.html", self.sigsac_base, year % 100),
      format!("{}/ccs/CCS{year}/tocs/tocs-ccs{year}.html", self.sigsac_base),
    ];
    for url in pages {
      info!("Trying OpenTOC: {url}");
      let Some(html) = fetch_html(client, &url, TOC_TIMEOUT).await else { continue };
      let entries = parse_opentoc(&html);
      if !entries.is_empty() {
        info!("Got {} papers from OpenTOC", entries.len());
        return entries;
      }
    }
    Vec::new()
  }

  /// Obtains ACM cookies through the challenge solver and saves them.
  async fn acquire_cookies(&self, sample_doi: &str) {
    let Some(solver) = &self.flaresolverr else { return };
    if !solver.check_available().await {
      return;
    }
    info!("Getting ACM cookies via FlareSolverr...");
    let Some(solved) = solver.get_cookies(&format!("{}/doi/pdf/{sample_doi}", self.acm_base)).await else {
      return;
    };
    self.sessions.update_cookies(&solved.cookies);
    self.sessions.update_user_agent(&solved.user_agent);
    info!("Got {} ACM cookies", solved.cookies.len());
    if let Err(e) = save_cookie_file(&self.cookie_path, &solved.cookies) {
      warn!("Failed to save cookies: {e}");
    }
  }
}

#[async_trait]
impl SourceAdapter for AcmCcsSource {
  fn name(&self) -> &str { &self.conference.name }

  fn dir_name(&self) -> &str { &self.conference.dir_name }

  fn sessions(&self) -> &SessionFactory { &self.sessions }

  async fn list_papers(&self, year: u32) -> Result<Vec<PaperDescriptor>> {
    info!("Fetching paper list for {} {year}", self.conference.name);
    let client = self.sessions.client()?;

    let mut entries = self.from_dblp(&client, year).await;
    if entries.is_empty() {
      entries = self.from_opentoc(&client, year).await;
    }

    let volume = self.conference.proceeding(year);
    let papers: Vec<PaperDescriptor> = entries
      .into_iter()
      .filter(|entry| volume != Some(entry.doi.as_str()))
      .filter_map(|entry| {
        PaperDescriptor::new(&entry.title, "ACM")
          .ok()
          .map(|paper| paper.with_authors(entry.authors).with_doi(entry.doi))
      })
      .collect();
    if papers.is_empty() {
      warn!("No papers found for {year}");
      return Ok(papers);
    }

    if !self.sessions.has_cookies() {
      if let Some(doi) = papers.iter().find_map(|paper| paper.doi.as_deref()) {
        self.acquire_cookies(doi).await;
      }
    }

    info!("Found {} papers for {year}", papers.len());
    Ok(papers)
  }

  async fn pdf_candidate_urls(&self, paper: &PaperDescriptor) -> Vec<String> {
    let mut urls = Vec::new();
    if let Some(doi) = paper.doi.as_deref() {
      if self.sessions.has_cookies() {
        urls.push(format!("{}/doi/pdf/{doi}", self.acm_base));
      }
    }
    urls.push(paper.pdf_url.clone());

    if let Some(found) =
      self.mirrors.semantic_scholar.find_open_access_pdf(paper.doi.as_deref(), Some(&paper.title)).await
    {
      debug!("Found open access PDF via {}", found.provider);
      urls.push(found.url);
    }
    if let Some(found) = self.mirrors.arxiv.find_paper(Some(&paper.title), None).await {
      debug!("Found arXiv PDF {}", found.id);
      urls.push(found.pdf_url);
    }
    dedup_urls(urls)
  }
}
