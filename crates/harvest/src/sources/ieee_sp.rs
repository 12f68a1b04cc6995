//! IEEE Symposium on Security and Privacy.
//!
//! Papers are listed through the JSON search endpoint behind IEEE Xplore, one proceeding number
//! per year (configured under `[conferences.ieee_sp.proceedings]`). Xplore sits behind a bot
//! challenge and most PDFs sit behind a paywall, so downloads combine the direct `ielx` links
//! with open-access mirrors.

use chrono::Datelike;

use super::*;

/// Root of IEEE Xplore.
pub const XPLORE_BASE: &str = "https://ieeexplore.ieee.org";

/// Page size of the search endpoint.
const ROWS_PER_PAGE: usize = 100;

/// Timeout of one search request.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Response of `/rest/search`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
  /// Number of records across all pages.
  #[serde(default)]
  total_records: usize,
  /// Records of this page.
  #[serde(default)]
  records:       Vec<XploreRecord>,
}

/// One search record. Numbers arrive as strings or integers depending on the endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XploreRecord {
  /// Title.
  #[serde(default)]
  article_title:      String,
  /// Article number (`arnumber`).
  #[serde(default)]
  article_number:     Value,
  /// Publication number (`punumber`).
  #[serde(default)]
  publication_number: Value,
  /// Issue number (`isnumber`).
  #[serde(default)]
  is_number:          Value,
  /// DOI.
  #[serde(default)]
  doi:                Option<String>,
  /// Abstract.
  #[serde(rename = "abstract", default)]
  abstract_text:      Option<String>,
  /// Author list.
  #[serde(default)]
  authors:            Vec<XploreAuthor>,
  /// Open-access flag.
  #[serde(default)]
  is_open_access:     bool,
}

/// An author of a record.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XploreAuthor {
  /// Display name.
  #[serde(default)]
  preferred_name:  String,
  /// Fallback name.
  #[serde(default)]
  normalized_name: String,
}

/// A string or number field as text.
fn value_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.trim().to_string(),
    Value::Number(n) => n.to_string(),
    _ => String::new(),
  }
}

/// Direct PDF link on one of the `ielx` mirrors.
fn ielx_url(base: &str, mirror: &str, publication: &str, issue: &str, article: &str) -> String {
  format!("{base}/{mirror}/{publication}/{issue}/{article}.pdf?tp=&arnumber={article}&isnumber={issue}&ref=")
}

impl XploreRecord {
  /// Comma-joined author names.
  fn author_names(&self) -> String {
    self
      .authors
      .iter()
      .map(|a| if a.preferred_name.is_empty() { &a.normalized_name } else { &a.preferred_name })
      .filter(|name| !name.is_empty())
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(", ")
  }

  /// Converts a record of a proceeding listing.
  fn into_paper(self, base: &str, punumber: &str) -> Option<PaperDescriptor> {
    let article = value_text(&self.article_number);
    let issue = value_text(&self.is_number);
    let publication = Some(value_text(&self.publication_number)).filter(|p| !p.is_empty()).unwrap_or_else(|| punumber.to_string());
    let pdf_url = if !article.is_empty() && !issue.is_empty() {
      ielx_url(base, "ielx7", &publication, &issue, &article)
    } else {
      String::new()
    };
    let paper = self
      .base_paper()?
      .with_pdf_url(pdf_url)
      .with_extra("article_number", article)
      .with_extra("publication_number", publication)
      .with_extra("is_number", issue)
      .with_extra("is_open_access", self.is_open_access);
    Some(paper)
  }

  /// Converts a record of a free-text search.
  fn into_search_hit(self, base: &str) -> Option<PaperDescriptor> {
    let article = value_text(&self.article_number);
    let pdf_url = if article.is_empty() {
      String::new()
    } else {
      format!("{base}/stamp/stamp.jsp?tp=&arnumber={article}")
    };
    let paper = self
      .base_paper()?
      .with_pdf_url(pdf_url)
      .with_extra("article_number", article)
      .with_extra("is_open_access", self.is_open_access);
    Some(paper)
  }

  /// Descriptor with the fields common to both record kinds; `None` without a title.
  fn base_paper(&self) -> Option<PaperDescriptor> {
    let mut paper = PaperDescriptor::new(&self.article_title, "IEEE").ok()?.with_authors(self.author_names());
    if let Some(doi) = &self.doi {
      paper = paper.with_doi(doi.as_str());
    }
    if let Some(text) = &self.abstract_text {
      paper = paper.with_abstract(text.as_str());
    }
    Some(paper)
  }
}

/// Source adapter for IEEE S&P.
#[derive(Debug)]
pub struct IeeeSpSource {
  /// Conference settings.
  conference:   ConferenceConfig,
  /// Session factory; receives challenge cookies.
  sessions:     SessionFactory,
  /// Xplore root, overridable for tests.
  xplore_base:  String,
  /// Politeness delay between pages.
  delay:        Duration,
  /// Open-access mirrors.
  mirrors:      Mirrors,
  /// Challenge solver, when enabled.
  flaresolverr: Option<FlareSolverrClient>,
}

impl IeeeSpSource {
  /// Creates the adapter, loading the cookie file if one is configured.
  pub fn new(conference: ConferenceConfig, config: &Config, options: &SourceOptions) -> Result<Self> {
    let sessions = SessionFactory::new(config);
    if let Some(path) = cookie_file_for(&conference, options) {
      apply_cookie_file(&sessions, &path);
    }
    let mirrors = Mirrors::new(&sessions)?;
    let flaresolverr = if options.use_flaresolverr {
      Some(FlareSolverrClient::new(sessions.client()?, &config.flaresolverr_url))
    } else {
      None
    };
    Ok(Self { conference, sessions, xplore_base: XPLORE_BASE.to_string(), delay: config.delay(), mirrors, flaresolverr })
  }

  /// Points the adapter at another Xplore root.
  pub fn with_xplore_base(mut self, base: &str) -> Self {
    self.xplore_base = base.trim_end_matches('/').to_string();
    self
  }

  /// Replaces the open-access mirrors.
  pub fn with_mirrors(mut self, mirrors: Mirrors) -> Self {
    self.mirrors = mirrors;
    self
  }

  /// Posts one search request; `None` on a non-success status.
  async fn search(&self, client: &Client, payload: &Value, referer: Option<&str>) -> Result<Option<SearchResponse>> {
    let mut request = client
      .post(format!("{}/rest/search", self.xplore_base))
      .header(reqwest::header::ACCEPT, "application/json")
      .header(reqwest::header::ORIGIN, &self.xplore_base)
      .json(payload)
      .timeout(SEARCH_TIMEOUT);
    if let Some(referer) = referer {
      request = request.header(reqwest::header::REFERER, referer);
    }
    let response = request.send().await?;
    if response.status() != StatusCode::OK {
      warn!("IEEE Xplore API returned {}", response.status());
      return Ok(None);
    }
    Ok(Some(response.json().await?))
  }

  /// All papers of one proceeding, page by page.
  async fn fetch_proceeding(&self, client: &Client, punumber: &str) -> Vec<PaperDescriptor> {
    info!("Fetching from IEEE Xplore API (punumber={punumber})...");
    let referer = format!("{}/xpl/conhome/{punumber}/proceeding", self.xplore_base);
    let mut papers = Vec::new();
    let mut page = 1;

    loop {
      let payload = serde_json::json!({
        "punumber": punumber,
        "rowsPerPage": ROWS_PER_PAGE,
        "pageNumber": page,
      });
      let data = match self.search(client, &payload, Some(&referer)).await {
        Ok(Some(data)) => data,
        Ok(None) => break,
        Err(e) => {
          error!("IEEE Xplore API request failed: {e}");
          break;
        },
      };
      if page == 1 {
        info!("IEEE Xplore API returned {} papers", data.total_records);
      }
      if data.records.is_empty() {
        break;
      }

      let rows = data.records.len();
      papers.extend(data.records.into_iter().filter_map(|r| r.into_paper(&self.xplore_base, punumber)));
      if papers.len() >= data.total_records || rows < ROWS_PER_PAGE {
        break;
      }
      page += 1;
      tokio::time::sleep(self.delay).await;
    }
    papers
  }

  /// Free-text search for a year without a configured proceeding number.
  async fn search_by_year(&self, client: &Client, year: u32) -> Vec<PaperDescriptor> {
    let payload = serde_json::json!({
      "queryText": format!("\"IEEE Symposium on Security and Privacy\" AND year:{year}"),
      "rowsPerPage": ROWS_PER_PAGE,
      "pageNumber": 1,
    });
    match self.search(client, &payload, None).await {
      Ok(Some(data)) =>
        data.records.into_iter().filter_map(|r| r.into_search_hit(&self.xplore_base)).collect(),
      Ok(None) => Vec::new(),
      Err(e) => {
        error!("Search failed: {e}");
        Vec::new()
      },
    }
  }
}

#[async_trait]
impl SourceAdapter for IeeeSpSource {
  fn name(&self) -> &str { &self.conference.name }

  fn dir_name(&self) -> &str { &self.conference.dir_name }

  fn sessions(&self) -> &SessionFactory { &self.sessions }

  async fn list_papers(&self, year: u32) -> Result<Vec<PaperDescriptor>> {
    info!("Fetching paper list for {} {year}", self.conference.name);
    if i64::from(year) >= i64::from(chrono::Utc::now().year()) {
      warn!("Papers from {year} may still be behind paywall (1 year embargo)");
    }

    let punumber = self.conference.proceeding(year);
    if let (Some(solver), Some(punumber)) = (&self.flaresolverr, punumber) {
      info!("Initializing FlareSolverr for IEEE...");
      let sample = format!("{}/xpl/conhome/{punumber}/proceeding", self.xplore_base);
      if let Some(solved) = solver.get_cookies(&sample).await {
        self.sessions.update_cookies(&solved.cookies);
        self.sessions.update_user_agent(&solved.user_agent);
        info!("Got {} IEEE cookies via FlareSolverr", solved.cookies.len());
      }
    }

    let client = self.sessions.client()?;
    let papers = match punumber {
      Some(punumber) => self.fetch_proceeding(&client, punumber).await,
      None => {
        warn!("Unknown proceeding ID for {year}, trying search...");
        self.search_by_year(&client, year).await
      },
    };
    if papers.is_empty() {
      warn!("No papers found for {year}");
    } else {
      info!("Found {} papers for {year}", papers.len());
    }
    Ok(papers)
  }

  async fn pdf_candidate_urls(&self, paper: &PaperDescriptor) -> Vec<String> {
    let mut urls = Vec::new();
    if let (Some(article), Some(publication), Some(issue)) =
      (paper.extra_str("article_number"), paper.extra_str("publication_number"), paper.extra_str("is_number"))
    {
      urls.push(ielx_url(&self.xplore_base, "ielx7", publication, issue, article));
      urls.push(ielx_url(&self.xplore_base, "ielx8", publication, issue, article));
    }
    urls.push(paper.pdf_url.clone());

    match self.mirrors.semantic_scholar.find_open_access_pdf(paper.doi.as_deref(), Some(&paper.title)).await {
      Some(found) => {
        debug!("Found open access PDF via {}", found.provider);
        urls.push(found.url);
      },
      None =>
        if let Some(found) = self.mirrors.arxiv.find_paper(Some(&paper.title), None).await {
          debug!("Found arXiv PDF {}", found.id);
          urls.push(found.pdf_url);
        },
    }
    dedup_urls(urls)
  }
}

#[cfg(test)]
mod tests {
  use mockito::Matcher;

  use super::*;

  fn record(n: usize) -> Value {
    serde_json::json!({
      "articleTitle": format!("Paper Number {n} on Memory Safety"),
      "articleNumber": (10_000 + n).to_string(),
      "isNumber": 10179280,
      "doi": format!("10.1109/SP46215.2023.{n}"),
      "authors": [{"preferredName": "Ann Author"}, {"normalizedName": "B. Writer"}, {}],
      "isOpenAccess": n % 2 == 0,
    })
  }

  fn source(config: &Config, server: &mockito::Server) -> IeeeSpSource {
    let conference = config.conference("ieee_sp").unwrap().clone();
    IeeeSpSource::new(conference, config, &SourceOptions::default())
      .unwrap()
      .with_xplore_base(&server.url())
      .with_mirrors(Mirrors::new(&SessionFactory::new(config)).unwrap().with_endpoints(
        &format!("{}/s2", server.url()),
        &format!("{}/arxiv", server.url()),
      ))
  }

  #[test]
  fn test_record_conversion() {
    let record: XploreRecord = serde_json::from_value(record(7)).unwrap();
    let paper = record.into_paper(XPLORE_BASE, "10179215").unwrap();
    assert_eq!(paper.title, "Paper Number 7 on Memory Safety");
    assert_eq!(paper.authors, "Ann Author, B. Writer");
    assert_eq!(paper.source, "IEEE");
    assert_eq!(paper.doi.as_deref(), Some("10.1109/SP46215.2023.7"));
    assert_eq!(
      paper.pdf_url,
      "https://ieeexplore.ieee.org/ielx7/10179215/10179280/10007.pdf?tp=&arnumber=10007&isnumber=10179280&ref="
    );
    assert_eq!(paper.extra_str("is_number"), Some("10179280"));
    assert_eq!(paper.extra.get("is_open_access"), Some(&Value::Bool(false)));

    let untitled: XploreRecord = serde_json::from_value(serde_json::json!({"articleNumber": "1"})).unwrap();
    assert!(untitled.into_search_hit(XPLORE_BASE).is_none());
  }

  #[traced_test]
  #[tokio::test]
  async fn test_fetch_proceeding_pages() {
    let mut server = mockito::Server::new_async().await;
    let first: Vec<Value> = (0..100).map(record).collect();
    let page1 = server
      .mock("POST", "/rest/search")
      .match_body(Matcher::PartialJson(serde_json::json!({"punumber": "10179215", "pageNumber": 1})))
      .match_header("referer", Matcher::Regex("/xpl/conhome/10179215/proceeding$".into()))
      .with_body(serde_json::json!({"totalRecords": 101, "records": first}).to_string())
      .expect(1)
      .create_async()
      .await;
    let page2 = server
      .mock("POST", "/rest/search")
      .match_body(Matcher::PartialJson(serde_json::json!({"pageNumber": 2})))
      .with_body(serde_json::json!({"totalRecords": 101, "records": [record(100)]}).to_string())
      .expect(1)
      .create_async()
      .await;

    let config = Config::default().with_delay_secs(0.0);
    let papers = source(&config, &server).list_papers(2023).await.unwrap();
    assert_eq!(papers.len(), 101);
    page1.assert_async().await;
    page2.assert_async().await;
    assert!(logs_contain("IEEE Xplore API returned 101 papers"));
  }

  #[tokio::test]
  async fn test_unknown_year_searches_by_text() {
    let mut server = mockito::Server::new_async().await;
    let search = server
      .mock("POST", "/rest/search")
      .match_body(Matcher::PartialJson(serde_json::json!({
        "queryText": "\"IEEE Symposium on Security and Privacy\" AND year:2031"
      })))
      .with_body(serde_json::json!({"records": [record(1)]}).to_string())
      .create_async()
      .await;

    let config = Config::default();
    let papers = source(&config, &server).list_papers(2031).await.unwrap();
    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].pdf_url, format!("{}/stamp/stamp.jsp?tp=&arnumber=10001", server.url()));
    search.assert_async().await;
  }

  #[tokio::test]
  async fn test_api_error_yields_empty_list() {
    let mut server = mockito::Server::new_async().await;
    let _search = server.mock("POST", "/rest/search").with_status(418).create_async().await;
    let config = Config::default();
    assert!(source(&config, &server).list_papers(2022).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_candidate_order() {
    let mut server = mockito::Server::new_async().await;
    let _s2 = server
      .mock("GET", "/s2/paper/DOI:10.1109/SP46215.2023.3")
      .match_query(Matcher::Any)
      .with_body(r#"{"title":"x","openAccessPdf":{"url":"https://eprint.iacr.org/2023/3.pdf"}}"#)
      .create_async()
      .await;
    let arxiv = server.mock("GET", "/arxiv").match_query(Matcher::Any).expect(0).create_async().await;

    let config = Config::default();
    let source = source(&config, &server);
    let record: XploreRecord = serde_json::from_value(record(3)).unwrap();
    let paper = record.into_paper(&server.url(), "10179215").unwrap();

    let urls = source.pdf_candidate_urls(&paper).await;
    assert_eq!(urls.len(), 3);
    assert!(urls[0].contains("/ielx7/10179215/10179280/10003.pdf"));
    assert!(urls[1].contains("/ielx8/"));
    assert_eq!(urls[2], "https://eprint.iacr.org/2023/3.pdf");
    arxiv.assert_async().await;
  }

  #[tokio::test]
  async fn test_flaresolverr_cookies_are_applied() {
    let mut server = mockito::Server::new_async().await;
    let _health = server.mock("GET", "/health").create_async().await;
    let _solve = server
      .mock("POST", "/v1")
      .match_body(Matcher::Regex("/xpl/conhome/9833550/proceeding".into()))
      .with_body(
        r#"{"status":"ok","solution":{"cookies":[{"name":"TS01","value":"x","domain":"ieeexplore.ieee.org"}],
        "userAgent":"Solver/1.0","response":""}}"#,
      )
      .create_async()
      .await;
    let _search =
      server.mock("POST", "/rest/search").with_body(r#"{"totalRecords":0,"records":[]}"#).create_async().await;

    let config = Config::default().with_flaresolverr_url(&format!("{}/v1", server.url()));
    let conference = config.conference("ieee_sp").unwrap().clone();
    let source = IeeeSpSource::new(conference, &config, &SourceOptions::default().with_flaresolverr(true))
      .unwrap()
      .with_xplore_base(&server.url());

    assert!(source.list_papers(2022).await.unwrap().is_empty());
    assert!(source.sessions().has_cookies());
    assert_eq!(source.sessions().user_agent(), "Solver/1.0");
  }
}
