//! USENIX Security Symposium.
//!
//! USENIX publishes every paper openly. Since 2023 the accepted papers are split over a summer
//! and a fall page; older years use a single technical-sessions, program or papers page. Each
//! listed presentation has its own page carrying the PDF link and the authors.

use super::*;

/// Root of the USENIX website.
pub const USENIX_BASE: &str = "https://www.usenix.org";

/// Timeout for listing and presentation pages.
const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Titles shorter than this are navigation text, not paper titles.
const MIN_TITLE_LEN: usize = 10;

lazy_static! {
  /// Presentation page link, capturing the short year and the slug.
  static ref PRESENTATION: Regex =
    Regex::new(r"/conference/usenixsecurity(\d+)/presentation/([^/?#]+)").unwrap();
}

/// A titled link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListingLink {
  /// Absolute URL.
  url:   String,
  /// Link or surrounding title.
  title: String,
}

/// Links extracted from one listing page.
#[derive(Debug, Default)]
struct ListingPage {
  /// Presentation pages, deduplicated by URL.
  presentations: Vec<ListingLink>,
  /// PDFs linked directly from the listing.
  direct_pdfs:   Vec<ListingLink>,
}

/// Extracts presentation and PDF links from a listing page.
fn parse_listing(html: &str, base: &str) -> ListingPage {
  lazy_static! {
    static ref LINK: Selector = selector("a[href]");
  }
  let document = Html::parse_document(html);
  let mut page = ListingPage::default();
  let mut seen = std::collections::HashSet::new();

  for link in document.select(&LINK) {
    let Some(href) = link.value().attr("href") else { continue };
    if !PRESENTATION.is_match(href) || !seen.insert(href.to_string()) {
      continue;
    }
    let mut title = element_text(link);
    if title.chars().count() < MIN_TITLE_LEN {
      if let Some(parent) = ancestor(link, &["li", "div", "article"]) {
        if let Some(heading) = find_descendant(parent, &["h3", "h4", "strong", "a"], None) {
          title = element_text(heading);
        }
      }
    }
    if title.chars().count() < MIN_TITLE_LEN {
      continue;
    }
    if let Some(url) = absolute_url(base, href) {
      page.presentations.push(ListingLink { url, title });
    }
  }

  for (link, href) in pdf_links(document.root_element()) {
    let mut title = element_text(link);
    if title.is_empty() {
      if let Some(parent) = ancestor(link, &["div", "li", "td", "article"]) {
        title = ["title", "paper"]
          .iter()
          .find_map(|hint| find_descendant(parent, &["h3", "h4", "strong", "span"], Some(hint)))
          .map(element_text)
          .unwrap_or_default();
      }
    }
    if title.chars().count() < MIN_TITLE_LEN {
      continue;
    }
    if let Some(url) = absolute_url(base, &href) {
      page.direct_pdfs.push(ListingLink { url, title });
    }
  }
  page
}

/// Extracts the PDF link and the authors from a presentation page.
fn parse_presentation(html: &str, base: &str) -> (Option<String>, String) {
  lazy_static! {
    static ref LINK: Selector = selector("a[href]");
  }
  let document = Html::parse_document(html);
  let pdf = pdf_links(document.root_element()).into_iter().map(|(_, href)| href).next().or_else(|| {
    document.select(&LINK).filter_map(|a| a.value().attr("href")).find_map(|href| {
      let lower = href.to_lowercase();
      (lower.contains("paper") && lower.contains(".pdf")).then(|| href.to_string())
    })
  });
  (pdf.and_then(|href| absolute_url(base, &href)), authors_in(&document))
}

/// Conventional PDF locations for a presentation, used when its page has no PDF link.
fn guessed_pdf_urls(base: &str, short_year: &str, slug: &str) -> Vec<String> {
  vec![
    format!("{base}/system/files/sec{short_year}_{slug}.pdf"),
    format!("{base}/system/files/conference/usenixsecurity{short_year}/sec{short_year}_{slug}.pdf"),
    format!("{base}/sites/default/files/sec{short_year}_paper_{slug}.pdf"),
    format!("{base}/sites/default/files/{slug}.pdf"),
  ]
}

/// Source adapter for USENIX Security.
#[derive(Debug)]
pub struct UsenixSource {
  /// Conference settings.
  conference: ConferenceConfig,
  /// Session factory.
  sessions:   SessionFactory,
  /// Website root, overridable for tests.
  base_url:   String,
  /// Politeness delay between requests.
  delay:      Duration,
}

impl UsenixSource {
  /// Creates the adapter.
  pub fn new(conference: ConferenceConfig, config: &Config) -> Self {
    Self {
      conference,
      sessions: SessionFactory::new(config),
      base_url: USENIX_BASE.to_string(),
      delay: config.delay(),
    }
  }

  /// Points the adapter at another website root.
  pub fn with_base_url(mut self, base_url: &str) -> Self {
    self.base_url = base_url.trim_end_matches('/').to_string();
    self
  }

  /// Listing pages to try, as groups of split pages followed by single pages.
  fn candidate_pages(&self, year: u32) -> (Vec<[String; 2]>, Vec<String>) {
    let conf = format!("{}/conference/usenixsecurity", self.base_url);
    let short = format!("{:02}", year % 100);
    let split = [&short, &year.to_string()]
      .iter()
      .map(|y| [format!("{conf}{y}/summer-accepted-papers"), format!("{conf}{y}/fall-accepted-papers")])
      .collect();
    let single = ["technical-sessions", "program", "papers"]
      .iter()
      .flat_map(|page| [format!("{conf}{year}/{page}"), format!("{conf}{short}/{page}")])
      .collect();
    (split, single)
  }

  /// Loads the listing pages of `year` and returns them with their bodies.
  async fn discover_pages(&self, client: &Client, year: u32) -> Vec<(String, String)> {
    let (split, single) = self.candidate_pages(year);
    for group in split {
      let mut found = Vec::new();
      for url in group {
        if let Some(body) = fetch_html(client, &url, PAGE_TIMEOUT).await {
          info!("Found conference page: {url}");
          found.push((url, body));
        }
      }
      if !found.is_empty() {
        return found;
      }
    }
    for url in single {
      if let Some(body) = fetch_html(client, &url, PAGE_TIMEOUT).await {
        info!("Found conference page: {url}");
        return vec![(url, body)];
      }
    }
    Vec::new()
  }

  /// Builds descriptors for every paper linked from one listing page.
  async fn papers_from_page(&self, client: &Client, html: &str) -> Vec<PaperDescriptor> {
    let listing = parse_listing(html, &self.base_url);
    info!("Found {} presentation links", listing.presentations.len());

    let mut papers = Vec::new();
    for link in listing.presentations {
      let (pdf_url, authors) = match fetch_html(client, &link.url, PAGE_TIMEOUT).await {
        Some(page) => parse_presentation(&page, &self.base_url),
        None => (None, String::new()),
      };
      let mut paper = match PaperDescriptor::new(&link.title, "USENIX") {
        Ok(paper) => paper.with_authors(authors).with_extra("presentation_url", link.url.as_str()),
        Err(e) => {
          debug!("Skipping presentation {}: {e}", link.url);
          continue;
        },
      };
      if let Some(pdf_url) = pdf_url {
        paper = paper.with_pdf_url(pdf_url);
      }
      papers.push(paper);
      tokio::time::sleep(self.delay.mul_f64(0.3)).await;
    }

    for link in listing.direct_pdfs {
      if papers.iter().any(|p| p.pdf_url == link.url) {
        continue;
      }
      if let Ok(paper) = PaperDescriptor::new(&link.title, "USENIX") {
        papers.push(paper.with_pdf_url(link.url));
      }
    }
    papers
  }
}

#[async_trait]
impl SourceAdapter for UsenixSource {
  fn name(&self) -> &str { &self.conference.name }

  fn dir_name(&self) -> &str { &self.conference.dir_name }

  fn sessions(&self) -> &SessionFactory { &self.sessions }

  async fn list_papers(&self, year: u32) -> Result<Vec<PaperDescriptor>> {
    info!("Fetching paper list for {} {year}", self.conference.name);
    let client = self.sessions.client()?;
    let pages = self.discover_pages(&client, year).await;
    if pages.is_empty() {
      warn!("No conference page found for {year}");
      return Ok(Vec::new());
    }

    let mut papers = Vec::new();
    for (url, body) in pages {
      let found = self.papers_from_page(&client, &body).await;
      info!("Extracted {} papers from {url}", found.len());
      papers.extend(found);
    }
    let papers = dedup_by_title_prefix(papers);
    info!("Total {} unique papers found for {year}", papers.len());
    Ok(papers)
  }

  async fn pdf_candidate_urls(&self, paper: &PaperDescriptor) -> Vec<String> {
    let mut urls = vec![paper.pdf_url.clone()];
    if let Some(caps) = paper.extra_str("presentation_url").and_then(|url| PRESENTATION.captures(url)) {
      urls.extend(guessed_pdf_urls(&self.base_url, &caps[1], &caps[2]));
    }
    dedup_urls(urls)
  }
}
