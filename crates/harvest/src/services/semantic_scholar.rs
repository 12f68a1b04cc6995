//! Open-access lookup through the Semantic Scholar Graph API.

use super::*;

/// Public Semantic Scholar Graph API.
pub const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1";

/// Hosts whose "open access" links still require an institutional login.
const PAYWALLED_HOSTS: [&str; 2] = ["dl.acm.org", "ieeexplore.ieee.org"];

/// An open-access PDF and who hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAccessPdf {
  /// Direct PDF link.
  pub url:      String,
  /// `arXiv`, `IACR` or `Semantic Scholar`.
  pub provider: String,
}

impl OpenAccessPdf {
  /// Classifies a link, rejecting paywalled hosts.
  fn from_url(url: &str) -> Option<Self> {
    if url.is_empty() {
      return None;
    }
    if PAYWALLED_HOSTS.iter().any(|host| url.contains(host)) {
      debug!("Skipping paywalled URL: {}", truncate(url, 50));
      return None;
    }
    let provider = if url.contains("arxiv.org") {
      "arXiv"
    } else if url.contains("eprint.iacr.org") {
      "IACR"
    } else {
      "Semantic Scholar"
    };
    Some(Self { url: url.to_string(), provider: provider.to_string() })
  }
}

/// A paper as returned by the Graph API.
#[derive(Debug, Deserialize)]
struct GraphPaper {
  /// Paper title.
  #[serde(default)]
  title:           Option<String>,
  /// Open-access location, if any.
  #[serde(rename = "openAccessPdf", default)]
  open_access_pdf: Option<GraphPdf>,
}

/// The `openAccessPdf` object.
#[derive(Debug, Deserialize)]
struct GraphPdf {
  /// PDF link; may be empty or null.
  #[serde(default)]
  url: Option<String>,
}

/// Response of the paper search endpoint.
#[derive(Debug, Deserialize)]
struct GraphSearch {
  /// Matching papers, best first.
  #[serde(default)]
  data: Vec<GraphPaper>,
}

impl GraphPaper {
  /// The usable open-access link of this paper.
  fn open_access(&self) -> Option<OpenAccessPdf> {
    self.open_access_pdf.as_ref().and_then(|pdf| pdf.url.as_deref()).and_then(OpenAccessPdf::from_url)
  }
}

/// Client for the Semantic Scholar Graph API.
#[derive(Debug, Clone)]
pub struct SemanticScholarClient {
  /// HTTP client.
  client:   Client,
  /// API root, overridable for tests.
  base_url: String,
}

impl SemanticScholarClient {
  /// Creates a client against the public API.
  pub fn new(client: Client) -> Self { Self { client, base_url: SEMANTIC_SCHOLAR_API.to_string() } }

  /// Points the client at another API root.
  pub fn with_base_url(mut self, base_url: &str) -> Self {
    self.base_url = base_url.trim_end_matches('/').to_string();
    self
  }

  /// Finds an open-access PDF, by DOI first and by title second.
  pub async fn find_open_access_pdf(
    &self,
    doi: Option<&str>,
    title: Option<&str>,
  ) -> Option<OpenAccessPdf> {
    if let Some(doi) = doi.filter(|d| !d.is_empty()) {
      match self.search_by_doi(doi).await {
        Ok(Some(found)) => return Some(found),
        Ok(None) => {},
        Err(e) => debug!("Semantic Scholar DOI lookup failed: {e}"),
      }
    }
    if let Some(title) = title.filter(|t| !t.is_empty()) {
      match self.search_by_title(title).await {
        Ok(found) => return found,
        Err(e) => debug!("Semantic Scholar title search failed: {e}"),
      }
    }
    None
  }

  /// Looks a paper up by DOI.
  async fn search_by_doi(&self, doi: &str) -> Result<Option<OpenAccessPdf>> {
    let url = format!("{}/paper/DOI:{doi}", self.base_url);
    let response = self
      .client
      .get(&url)
      .query(&[("fields", "title,openAccessPdf,externalIds")])
      .header(reqwest::header::ACCEPT, "application/json")
      .timeout(Duration::from_secs(15))
      .send()
      .await?;
    if !response.status().is_success() {
      trace!("Semantic Scholar returned {} for DOI {doi}", response.status());
      return Ok(None);
    }
    let paper: GraphPaper = response.json().await?;
    Ok(paper.open_access())
  }

  /// Searches by title and accepts only a normalized-title match.
  async fn search_by_title(&self, title: &str) -> Result<Option<OpenAccessPdf>> {
    let url = format!("{}/paper/search", self.base_url);
    let response = self
      .client
      .get(&url)
      .query(&[("query", title), ("fields", "title,openAccessPdf"), ("limit", "3")])
      .header(reqwest::header::ACCEPT, "application/json")
      .timeout(Duration::from_secs(15))
      .send()
      .await?;
    if !response.status().is_success() {
      trace!("Semantic Scholar search returned {}", response.status());
      return Ok(None);
    }
    let search: GraphSearch = response.json().await?;
    Ok(
      search
        .data
        .iter()
        .filter(|paper| paper.title.as_deref().is_some_and(|t| titles_match(title, t)))
        .find_map(GraphPaper::open_access),
    )
  }
}
