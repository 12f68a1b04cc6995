//! Preprint lookup through the arXiv Atom API.

use super::*;

/// Public arXiv query endpoint.
pub const ARXIV_API: &str = "http://export.arxiv.org/api/query";

lazy_static! {
  /// `arXiv:` prefix.
  static ref ARXIV_PREFIX: Regex = Regex::new(r"(?i)^arxiv:").unwrap();
  /// abs/pdf URL prefix.
  static ref ARXIV_URL: Regex = Regex::new(r"^https?://arxiv\.org/(abs|pdf)/").unwrap();
  /// New style identifier, `YYMM.NNNNN` with optional version.
  static ref NEW_ID: Regex = Regex::new(r"^\d{4}\.\d{4,5}(v\d+)?$").unwrap();
  /// Old style identifier, `category/YYMMNNN` with optional version.
  static ref OLD_ID: Regex = Regex::new(r"^[a-z-]+/\d{7}(v\d+)?$").unwrap();
  /// New style identifier anywhere in a string.
  static ref NEW_ID_ANYWHERE: Regex = Regex::new(r"(\d{4}\.\d{4,5})(v\d+)?").unwrap();
  /// Old style identifier anywhere in a string.
  static ref OLD_ID_ANYWHERE: Regex = Regex::new(r"([a-z-]+/\d{7})(v\d+)?").unwrap();
  /// Characters that break an arXiv title query.
  static ref QUERY_UNSAFE: Regex = Regex::new(r"[^\w\s-]").unwrap();
}

/// A paper found on arXiv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivMatch {
  /// Link to the PDF, always ending in `.pdf`.
  pub pdf_url: String,
  /// arXiv identifier, e.g. `2301.12345v2`.
  pub id:      String,
}

/// Atom feed root.
#[derive(Debug, Deserialize)]
struct Feed {
  /// Result entries.
  #[serde(rename = "entry", default)]
  entries: Vec<Entry>,
}

/// One Atom entry.
#[derive(Debug, Deserialize)]
struct Entry {
  /// Abstract page URL, which embeds the identifier.
  #[serde(default)]
  id:    String,
  /// Title, possibly wrapped over several lines.
  #[serde(default)]
  title: String,
  /// Alternate and PDF links.
  #[serde(rename = "link", default)]
  links: Vec<Link>,
}

/// An Atom link element.
#[derive(Debug, Deserialize)]
struct Link {
  /// Target URL.
  #[serde(rename = "@href", default)]
  href:  String,
  /// `pdf` for the PDF link.
  #[serde(rename = "@title", default)]
  title: Option<String>,
}

impl Entry {
  /// The PDF link of this entry, with a `.pdf` suffix.
  fn pdf_url(&self) -> Option<String> {
    self.links.iter().find(|link| link.title.as_deref() == Some("pdf")).and_then(|link| {
      if link.href.is_empty() {
        None
      } else if link.href.ends_with(".pdf") {
        Some(link.href.clone())
      } else {
        Some(format!("{}.pdf", link.href))
      }
    })
  }
}

/// Normalizes user-supplied identifiers: strips an `arXiv:` prefix, abs/pdf URLs and a `.pdf`
/// suffix, then accepts only well-formed new or old style identifiers.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
  let id = ARXIV_PREFIX.replace(raw.trim(), "");
  let id = ARXIV_URL.replace(&id, "");
  let id = id.strip_suffix(".pdf").unwrap_or(&id);
  (NEW_ID.is_match(id) || OLD_ID.is_match(id)).then(|| id.to_string())
}

/// Extracts an identifier from an entry id or URL.
pub fn extract_arxiv_id(text: &str) -> Option<String> {
  NEW_ID_ANYWHERE
    .captures(text)
    .or_else(|| OLD_ID_ANYWHERE.captures(text))
    .map(|caps| format!("{}{}", &caps[1], caps.get(2).map_or("", |v| v.as_str())))
}

/// Removes punctuation and extra whitespace so a title can be used in a `ti:` query.
pub fn clean_title_for_search(title: &str) -> String {
  QUERY_UNSAFE.replace_all(title, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Client for the arXiv API.
#[derive(Debug, Clone)]
pub struct ArxivClient {
  /// HTTP client.
  client:   Client,
  /// Query endpoint, overridable for tests.
  base_url: String,
}

impl ArxivClient {
  /// Creates a client against the public API.
  pub fn new(client: Client) -> Self { Self { client, base_url: ARXIV_API.to_string() } }

  /// Points the client at another endpoint.
  pub fn with_base_url(mut self, base_url: &str) -> Self {
    self.base_url = base_url.to_string();
    self
  }

  /// Finds a paper by identifier first and by title second.
  pub async fn find_paper(&self, title: Option<&str>, arxiv_id: Option<&str>) -> Option<ArxivMatch> {
    if let Some(id) = arxiv_id.and_then(normalize_arxiv_id) {
      match self.get_by_id(&id).await {
        Ok(Some(found)) => return Some(found),
        Ok(None) => {},
        Err(e) => debug!("arXiv ID lookup failed: {e}"),
      }
    }
    if let Some(title) = title.filter(|t| !t.is_empty()) {
      match self.search_by_title(title).await {
        Ok(found) => return found,
        Err(e) => debug!("arXiv title search failed: {e}"),
      }
    }
    None
  }

  /// Runs a query and parses the feed.
  async fn query(&self, params: &[(&str, &str)]) -> Result<Option<Feed>> {
    let response = self
      .client
      .get(&self.base_url)
      .query(params)
      .header(reqwest::header::ACCEPT, "application/atom+xml")
      .timeout(Duration::from_secs(15))
      .send()
      .await?;
    if !response.status().is_success() {
      trace!("arXiv returned {}", response.status());
      return Ok(None);
    }
    let body = response.text().await?;
    Ok(Some(quick_xml::de::from_str(&body)?))
  }

  /// Fetches one entry by identifier.
  async fn get_by_id(&self, id: &str) -> Result<Option<ArxivMatch>> {
    let Some(feed) = self.query(&[("id_list", id), ("max_results", "1")]).await? else {
      return Ok(None);
    };
    Ok(
      feed
        .entries
        .first()
        .and_then(Entry::pdf_url)
        .map(|pdf_url| ArxivMatch { pdf_url, id: id.to_string() }),
    )
  }

  /// Searches titles and accepts only a normalized-title match.
  async fn search_by_title(&self, title: &str) -> Result<Option<ArxivMatch>> {
    let query = format!("ti:\"{}\"", clean_title_for_search(title));
    let params = [("search_query", query.as_str()), ("max_results", "5"), ("sortBy", "relevance")];
    let Some(feed) = self.query(&params).await? else {
      return Ok(None);
    };
    Ok(feed.entries.iter().filter(|entry| titles_match(title, &entry.title)).find_map(|entry| {
      let id = extract_arxiv_id(&entry.id)?;
      entry.pdf_url().map(|pdf_url| ArxivMatch { pdf_url, id })
    }))
  }
}

#[cfg(test)]
mod tests {
  use mockito::Matcher;

  use super::*;

  const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2101.99999v1</id>
    <title>An Unrelated Paper</title>
    <link href="http://arxiv.org/abs/2101.99999v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2101.99999v1" rel="related" type="application/pdf"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2305.01234v2</id>
    <title>Speculative Execution
      Attacks, Revisited</title>
    <author><name>Jane Doe</name></author>
    <link href="http://arxiv.org/abs/2305.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2305.01234v2" rel="related" type="application/pdf"/>
  </entry>
</feed>"#;

  #[test]
  fn test_normalize_arxiv_id() {
    assert_eq!(normalize_arxiv_id("arXiv:2301.12345").as_deref(), Some("2301.12345"));
    assert_eq!(normalize_arxiv_id("https://arxiv.org/abs/2301.12345v3").as_deref(), Some("2301.12345v3"));
    assert_eq!(normalize_arxiv_id("https://arxiv.org/pdf/2301.1234.pdf").as_deref(), Some("2301.1234"));
    assert_eq!(normalize_arxiv_id("cs-cr/0701001").as_deref(), Some("cs-cr/0701001"));
    assert_eq!(normalize_arxiv_id("not an id"), None);
  }

  #[test]
  fn test_extract_and_clean() {
    assert_eq!(extract_arxiv_id("http://arxiv.org/abs/2305.01234v2").as_deref(), Some("2305.01234v2"));
    assert_eq!(extract_arxiv_id("http://arxiv.org/abs/hep-th/9901001").as_deref(), Some("hep-th/9901001"));
    assert_eq!(clean_title_for_search("SoK: (Un)safe \"Code\"?"), "SoK Un safe Code");
  }

  #[test]
  fn test_parse_feed() {
    let feed: Feed = quick_xml::de::from_str(FEED).unwrap();
    assert_eq!(feed.entries.len(), 2);
    assert_eq!(feed.entries[1].pdf_url().unwrap(), "http://arxiv.org/pdf/2305.01234v2.pdf");
  }

  #[traced_test]
  #[tokio::test]
  async fn test_title_search_matches_normalized_title() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/api/query")
      .match_query(Matcher::UrlEncoded(
        "search_query".into(),
        "ti:\"Speculative Execution Attacks Revisited\"".into(),
      ))
      .with_body(FEED)
      .expect(1)
      .create_async()
      .await;

    let client = ArxivClient::new(Client::new()).with_base_url(&format!("{}/api/query", server.url()));
    let found = client.find_paper(Some("Speculative Execution Attacks, Revisited"), None).await.unwrap();
    assert_eq!(found.id, "2305.01234v2");
    assert_eq!(found.pdf_url, "http://arxiv.org/pdf/2305.01234v2.pdf");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn test_no_match_returns_none() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/api/query").match_query(Matcher::Any).with_body(FEED).create_async().await;

    let client = ArxivClient::new(Client::new()).with_base_url(&format!("{}/api/query", server.url()));
    assert!(client.find_paper(Some("A Title Nobody Wrote"), None).await.is_none());
  }

  #[tokio::test]
  async fn test_lookup_by_id() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/api/query")
      .match_query(Matcher::UrlEncoded("id_list".into(), "2101.99999".into()))
      .with_body(FEED)
      .create_async()
      .await;

    let client = ArxivClient::new(Client::new()).with_base_url(&format!("{}/api/query", server.url()));
    let found = client.find_paper(None, Some("arXiv:2101.99999")).await.unwrap();
    assert_eq!(found.id, "2101.99999");
    assert_eq!(found.pdf_url, "http://arxiv.org/pdf/2101.99999v1.pdf");
  }
}
