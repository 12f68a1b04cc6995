//! NDSS Symposium.
//!
//! The NDSS site links each accepted paper to a `/ndss-paper/<slug>/` detail page holding the
//! title, the authors and the paper PDF (next to slides, which we ignore). Several listing pages
//! exist per year and all of them are scanned.

use super::*;

/// Root of the NDSS website.
pub const NDSS_BASE: &str = "https://www.ndss-symposium.org";

/// Timeout for listing and detail pages.
const PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Titles shorter than this are navigation text, not paper titles.
const MIN_TITLE_LEN: usize = 10;

/// Link texts that say nothing about the paper.
const GENERIC_LINK_TEXT: [&str; 3] = ["pdf", "download", "[pdf]"];

lazy_static! {
  /// Detail page link, capturing the slug.
  static ref DETAIL: Regex = Regex::new(r"/ndss-paper/([^/]+)/?").unwrap();
}

/// Turns `some-paper-slug` into `Some Paper Slug`.
fn title_from_slug(slug: &str) -> String {
  slug
    .split('-')
    .filter(|word| !word.is_empty())
    .map(|word| {
      let mut chars = word.chars();
      chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
      })
    })
    .collect::<Vec<_>>()
    .join(" ")
}

/// Detail page links of a listing page as `(absolute url, slug)`, in document order.
fn detail_links(html: &str, base: &str) -> Vec<(String, String)> {
  lazy_static! {
    static ref LINK: Selector = selector("a[href]");
  }
  let document = Html::parse_document(html);
  document
    .select(&LINK)
    .filter_map(|a| a.value().attr("href"))
    .filter_map(|href| {
      let slug = DETAIL.captures(href)?[1].to_string();
      Some((absolute_url(base, href)?, slug))
    })
    .collect()
}

/// Paper PDFs linked directly from a listing page, as `(absolute url, title)`. Slides are
/// skipped; titles come from the link or from a titled element around it.
fn direct_pdfs(html: &str, base: &str) -> Vec<(String, String)> {
  let document = Html::parse_document(html);
  let mut found = Vec::new();
  for (link, href) in pdf_links(document.root_element()) {
    let Some(url) = absolute_url(base, &href) else { continue };
    if url.to_lowercase().contains("slide") {
      continue;
    }
    let mut title = element_text(link);
    if title.is_empty() || GENERIC_LINK_TEXT.contains(&title.to_lowercase().as_str()) {
      if let Some(parent) = ancestor(link, &["div", "li", "article", "section", "tr"]) {
        let names = ["h3", "h4", "h5", "strong", "a", "span"];
        title = ["title", "paper"]
          .iter()
          .find_map(|hint| find_descendant(parent, &names, Some(hint)))
          .map(element_text)
          .unwrap_or_else(|| element_text(parent).chars().take(200).collect());
      }
    }
    if title.chars().count() >= MIN_TITLE_LEN {
      found.push((url, title));
    }
  }
  found
}

/// Reads a detail page into a descriptor; `None` when it links no paper PDF.
fn parse_detail(html: &str, base: &str, slug: &str) -> Option<PaperDescriptor> {
  let document = Html::parse_document(html);
  let root = document.root_element();

  let long_enough = |title: &String| title.chars().count() >= MIN_TITLE_LEN;
  let title = find_descendant(root, &["h1", "h2", "h3"], None)
    .map(element_text)
    .filter(long_enough)
    .or_else(|| find_descendant(root, &["div", "span"], Some("title")).map(element_text).filter(long_enough))
    .unwrap_or_else(|| title_from_slug(slug));

  let pdfs: Vec<String> = pdf_links(root).into_iter().filter_map(|(_, href)| absolute_url(base, &href)).collect();
  let first = pdfs.first()?;
  let pdf_url = if first.to_lowercase().contains("slide") {
    pdfs
      .iter()
      .find(|url| {
        let lower = url.to_lowercase();
        lower.contains("paper") && !lower.contains("slide")
      })
      .unwrap_or(first)
  } else {
    first
  };

  PaperDescriptor::new(&title, "NDSS")
    .ok()
    .map(|paper| paper.with_authors(authors_in(&document)).with_pdf_url(pdf_url.as_str()).with_extra("slug", slug))
}

/// Source adapter for NDSS.
#[derive(Debug)]
pub struct NdssSource {
  /// Conference settings.
  conference: ConferenceConfig,
  /// Session factory.
  sessions:   SessionFactory,
  /// Website root, overridable for tests.
  base_url:   String,
  /// Politeness delay between requests.
  delay:      Duration,
}

impl NdssSource {
  /// Creates the adapter.
  pub fn new(conference: ConferenceConfig, config: &Config) -> Self {
    Self {
      conference,
      sessions: SessionFactory::new(config),
      base_url: NDSS_BASE.to_string(),
      delay: config.delay(),
    }
  }

  /// Points the adapter at another website root.
  pub fn with_base_url(mut self, base_url: &str) -> Self {
    self.base_url = base_url.trim_end_matches('/').to_string();
    self
  }

  /// Listing pages of `year`, most specific first.
  fn candidate_pages(&self, year: u32) -> Vec<String> {
    ["accepted-papers/", "program/", "", "papers/"]
      .iter()
      .map(|page| format!("{}/ndss{year}/{page}", self.base_url))
      .collect()
  }
}

#[async_trait]
impl SourceAdapter for NdssSource {
  fn name(&self) -> &str { &self.conference.name }

  fn dir_name(&self) -> &str { &self.conference.dir_name }

  fn sessions(&self) -> &SessionFactory { &self.sessions }

  async fn list_papers(&self, year: u32) -> Result<Vec<PaperDescriptor>> {
    info!("Fetching paper list for {} {year}", self.conference.name);
    let client = self.sessions.client()?;

    let mut pages = Vec::new();
    for url in self.candidate_pages(year) {
      if let Some(body) = fetch_html(&client, &url, PAGE_TIMEOUT).await {
        info!("Found conference page: {url}");
        pages.push((url, body));
      }
    }
    if pages.is_empty() {
      warn!("No conference page found for {year}");
      return Ok(Vec::new());
    }

    let mut papers: Vec<PaperDescriptor> = Vec::new();
    let mut seen_slugs = std::collections::HashSet::new();
    let mut seen_pdfs = std::collections::HashSet::new();
    for (url, body) in &pages {
      let links = detail_links(body, &self.base_url);
      info!("Found {} paper detail links from {url}", links.len());

      for (detail_url, slug) in links {
        if !seen_slugs.insert(slug.clone()) {
          continue;
        }
        let paper = match fetch_html(&client, &detail_url, PAGE_TIMEOUT).await {
          Some(detail) => parse_detail(&detail, &self.base_url, &slug),
          None => None,
        };
        match paper {
          Some(paper) if seen_pdfs.insert(paper.pdf_url.clone()) => papers.push(paper),
          Some(_) => {},
          None => debug!("No paper PDF on {detail_url}"),
        }
        tokio::time::sleep(self.delay.mul_f64(0.5)).await;
      }

      for (pdf_url, title) in direct_pdfs(body, &self.base_url) {
        if !seen_pdfs.insert(pdf_url.clone()) {
          continue;
        }
        if let Ok(paper) = PaperDescriptor::new(&title, "NDSS") {
          papers.push(paper.with_pdf_url(pdf_url));
        }
      }
    }

    let papers = dedup_by_title_prefix(papers);
    info!("Total {} unique papers found for {year}", papers.len());
    Ok(papers)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const LISTING: &str = r#"<html><body>
    <div class="tag-box">
      <a href="/ndss-paper/the-hidden-cost-of-tls/">The Hidden Cost of TLS</a>
      <a href="https://www.ndss-symposium.org/ndss-paper/the-hidden-cost-of-tls/">More</a>
      <a href="/ndss-paper/auto-draft-42/">Read</a>
    </div>
    <ul>
      <li><strong class="paper-title">Poisoning Attacks on Code Models</strong>
        <a href="/wp-content/uploads/2024-11-paper.pdf">PDF</a></li>
      <li><a href="/wp-content/uploads/2024-11-slides.pdf">Slides for Poisoning Attacks</a></li>
    </ul>
  </body></html>"#;

  const DETAIL: &str = r#"<html><body>
    <h1 class="entry-title">The Hidden Cost of TLS</h1>
    <div class="paper-data"><p><strong>Ann Author (MIT), Bo Writer (ETH)</strong></p></div>
    <p class="ndss_authors">Ann Author (MIT), Bo Writer (ETH)</p>
    <a class="pdf-button" href="/wp-content/uploads/2024-7-slides.pdf">Slides</a>
    <a class="pdf-button" href="/wp-content/uploads/2024-7-paper.pdf">Paper</a>
  </body></html>"#;

  #[test]
  fn test_title_from_slug() {
    assert_eq!(title_from_slug("the-hidden-cost-OF-tls"), "The Hidden Cost Of Tls");
    assert_eq!(title_from_slug("--x--"), "X");
  }

  #[test]
  fn test_detail_links() {
    let links = detail_links(LISTING, NDSS_BASE);
    assert_eq!(links.len(), 3);
    assert_eq!(links[0], (
      "https://www.ndss-symposium.org/ndss-paper/the-hidden-cost-of-tls/".to_string(),
      "the-hidden-cost-of-tls".to_string()
    ));
    assert_eq!(links[1].1, links[0].1);
    assert_eq!(links[2].1, "auto-draft-42");
  }

  #[test]
  fn test_direct_pdfs_skip_slides() {
    let pdfs = direct_pdfs(LISTING, NDSS_BASE);
    assert_eq!(pdfs, vec![(
      "https://www.ndss-symposium.org/wp-content/uploads/2024-11-paper.pdf".to_string(),
      "Poisoning Attacks on Code Models".to_string()
    )]);
  }

  #[test]
  fn test_parse_detail_prefers_paper_over_slides() {
    let paper = parse_detail(DETAIL, NDSS_BASE, "the-hidden-cost-of-tls").unwrap();
    assert_eq!(paper.title, "The Hidden Cost of TLS");
    assert_eq!(paper.authors, "Ann Author (MIT), Bo Writer (ETH)");
    assert_eq!(paper.pdf_url, "https://www.ndss-symposium.org/wp-content/uploads/2024-7-paper.pdf");
    assert_eq!(paper.extra_str("slug"), Some("the-hidden-cost-of-tls"));
  }

  #[test]
  fn test_parse_detail_fallbacks() {
    let html = r#"<h2>Menu</h2><a href="/x/final.pdf">get</a>"#;
    let paper = parse_detail(html, NDSS_BASE, "a-study-of-things").unwrap();
    assert_eq!(paper.title, "A Study Of Things");
    assert!(parse_detail("<h1>A Paper Without Any PDF</h1>", NDSS_BASE, "x").is_none());
  }

  #[traced_test]
  #[tokio::test]
  async fn test_list_papers_scans_all_pages() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let _accepted =
      server.mock("GET", "/ndss2024/accepted-papers/").with_body(LISTING).create_async().await;
    let _program = server
      .mock("GET", "/ndss2024/program/")
      .with_body(r#"<a href="/ndss-paper/the-hidden-cost-of-tls/">again</a>"#)
      .create_async()
      .await;
    let detail = server
      .mock("GET", "/ndss-paper/the-hidden-cost-of-tls/")
      .with_body(DETAIL)
      .expect(1)
      .create_async()
      .await;
    let _draft = server.mock("GET", "/ndss-paper/auto-draft-42/").with_status(404).create_async().await;

    let config = Config::default().with_delay_secs(0.0);
    let source =
      NdssSource::new(config.conference("ndss").unwrap().clone(), &config).with_base_url(&base);
    let papers = source.list_papers(2024).await.unwrap();

    let titles: Vec<_> = papers.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["The Hidden Cost of TLS", "Poisoning Attacks on Code Models"]);
    assert!(papers.iter().all(|p| p.source == "NDSS"));
    assert_eq!(source.pdf_candidate_urls(&papers[0]).await, vec![papers[0].pdf_url.clone()]);
    detail.assert_async().await;
    assert!(logs_contain("Total 2 unique papers"));
  }
}
