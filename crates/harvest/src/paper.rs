//! The paper descriptor: what a source knows about one paper before any PDF bytes are fetched.
//!
//! A [`PaperDescriptor`] is created by a source adapter for every discovered paper and is not
//! modified afterwards. Candidate download URLs are deliberately *not* stored on it: they are
//! derived on demand by the adapter, since deriving them may depend on cookies fetched at runtime.
//!
//! # Examples
//!
//! ```
//! use harvest::paper::PaperDescriptor;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let paper = PaperDescriptor::new("Fuzzing the Kernel: A Retrospective", "IEEE")?
//!   .with_authors("Alice Researcher, Bob Scholar")
//!   .with_pdf_url("https://example.org/paper.pdf")
//!   .with_doi("10.1109/SP.2023.00001")
//!   .with_extra("article_number", "10179215");
//!
//! assert_eq!(paper.file_name(), "Fuzzing the Kernel A Retrospective.pdf");
//! assert_eq!(paper.extra_str("article_number"), Some("10179215"));
//! # Ok(())
//! # }
//! ```

use super::*;
use crate::format::{sanitize_filename, short_hash, DEFAULT_MAX_FILENAME_LEN};

/// Structured record of one discovered paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperDescriptor {
  /// Full title; the identity key of the paper within a year.
  pub title:         String,
  /// Free-text author list.
  #[serde(default)]
  pub authors:       String,
  /// Primary PDF URL candidate, empty when the listing did not expose one.
  #[serde(default)]
  pub pdf_url:       String,
  /// DOI, if known.
  #[serde(default)]
  pub doi:           Option<String>,
  /// Abstract, if known.
  #[serde(default, rename = "abstract")]
  pub abstract_text: Option<String>,
  /// Tag of the source that produced this descriptor (e.g. "USENIX").
  #[serde(default)]
  pub source:        String,
  /// Source-specific identifiers, such as the article number needed to rebuild a direct URL.
  #[serde(default)]
  pub extra:         BTreeMap<String, Value>,
}

impl PaperDescriptor {
  /// Creates a descriptor with the given title and source tag.
  ///
  /// The title is trimmed; an empty title is rejected with [`HarvestError::EmptyTitle`].
  pub fn new(title: &str, source: &str) -> Result<Self> {
    let title = title.trim();
    if title.is_empty() {
      return Err(HarvestError::EmptyTitle);
    }
    Ok(Self {
      title:         title.to_string(),
      authors:       String::new(),
      pdf_url:       String::new(),
      doi:           None,
      abstract_text: None,
      source:        source.to_string(),
      extra:         BTreeMap::new(),
    })
  }

  /// Sets the author list.
  pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
    self.authors = authors.into();
    self
  }

  /// Sets the primary PDF URL.
  pub fn with_pdf_url(mut self, pdf_url: impl Into<String>) -> Self {
    self.pdf_url = pdf_url.into();
    self
  }

  /// Sets the DOI; empty strings are ignored.
  pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
    let doi = doi.into();
    self.doi = (!doi.trim().is_empty()).then(|| doi.trim().to_string());
    self
  }

  /// Sets the abstract; empty strings are ignored.
  pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
    let abstract_text = abstract_text.into();
    self.abstract_text = (!abstract_text.trim().is_empty()).then_some(abstract_text);
    self
  }

  /// Adds a source-specific field.
  pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.extra.insert(key.to_string(), value.into());
    self
  }

  /// Returns a source-specific field as a non-empty string, if present.
  pub fn extra_str(&self, key: &str) -> Option<&str> {
    self.extra.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
  }

  /// The sanitized file name (without directory) under which this paper's PDF is stored.
  pub fn file_name(&self) -> String {
    format!("{}.pdf", sanitize_filename(&self.title, DEFAULT_MAX_FILENAME_LEN))
  }

  /// The file name used when another title of the same year already sanitizes to
  /// [`file_name`](Self::file_name): the stem followed by a hash of the raw title.
  pub fn disambiguated_file_name(&self) -> String {
    format!("{} {}.pdf", sanitize_filename(&self.title, DEFAULT_MAX_FILENAME_LEN), short_hash(&self.title))
  }

  /// Flattens this descriptor into a single-level record for the metadata store.
  ///
  /// The fixed fields come first; source-specific fields are merged in afterwards and never
  /// overwrite a fixed field.
  pub fn to_record(&self) -> BTreeMap<String, Value> {
    let mut record = BTreeMap::new();
    record.insert("title".to_string(), Value::String(self.title.clone()));
    record.insert("authors".to_string(), Value::String(self.authors.clone()));
    record.insert("pdf_url".to_string(), Value::String(self.pdf_url.clone()));
    record.insert("doi".to_string(), Value::String(self.doi.clone().unwrap_or_default()));
    record.insert(
      "abstract".to_string(),
      Value::String(self.abstract_text.clone().unwrap_or_default()),
    );
    record.insert("source".to_string(), Value::String(self.source.clone()));
    for (key, value) in &self.extra {
      record.entry(key.clone()).or_insert_with(|| value.clone());
    }
    record
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_disambiguated_file_name_keeps_stem() {
    let a = PaperDescriptor::new("Fuzzing: A Survey", "NDSS").unwrap();
    let b = PaperDescriptor::new("Fuzzing A Survey", "NDSS").unwrap();
    assert_eq!(a.file_name(), b.file_name());
    assert_ne!(a.disambiguated_file_name(), b.disambiguated_file_name());
    assert!(a.disambiguated_file_name().starts_with("Fuzzing A Survey "));
    assert!(a.disambiguated_file_name().ends_with(".pdf"));
  }

  #[test]
  fn test_empty_title_is_rejected() {
    assert!(matches!(PaperDescriptor::new("", "NDSS"), Err(HarvestError::EmptyTitle)));
    assert!(matches!(PaperDescriptor::new(" \n ", "NDSS"), Err(HarvestError::EmptyTitle)));
  }

  #[test]
  fn test_blank_optional_fields_are_none() {
    let paper = PaperDescriptor::new("Title of Paper", "ACM").unwrap().with_doi("  ").with_abstract("");
    assert_eq!(paper.doi, None);
    assert_eq!(paper.abstract_text, None);
  }

  #[test]
  fn test_record_contains_fixed_and_extra_fields() {
    let paper = PaperDescriptor::new("Title of Paper", "IEEE")
      .unwrap()
      .with_extra("is_number", "10179280")
      .with_extra("is_open_access", true)
      .with_extra("title", "must not override");
    let record = paper.to_record();
    assert_eq!(record["title"], Value::String("Title of Paper".into()));
    assert_eq!(record["doi"], Value::String(String::new()));
    assert_eq!(record["is_number"], Value::String("10179280".into()));
    assert_eq!(record["is_open_access"], Value::Bool(true));
  }

  #[test]
  fn test_extra_str_skips_empty_values() {
    let paper = PaperDescriptor::new("Title of Paper", "IEEE").unwrap().with_extra("is_number", "");
    assert_eq!(paper.extra_str("is_number"), None);
    assert_eq!(paper.extra_str("missing"), None);
  }
}
