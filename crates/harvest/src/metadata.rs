//! Durable per-year record of every discovered paper.
//!
//! After each year the crawler hands the complete descriptor list to a [`MetadataStore`], whether
//! or not the PDFs were downloaded. Files are rewritten from scratch every run and replaced
//! atomically, so an interrupted write never leaves a half-written metadata file behind.
//!
//! ```text
//! <base>/<conference>/<year>/metadata.csv
//! <base>/<conference>/<year>/metadata.json
//! <base>/<conference>/<year>/metadata.txt
//! ```

use std::io::Write;

use super::*;

/// Columns that lead every CSV file, in this order, when present.
const PRIORITY_FIELDS: [&str; 6] = ["title", "authors", "pdf_url", "doi", "abstract", "source"];

/// Which metadata files to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
  /// `metadata.csv`
  #[default]
  Csv,
  /// `metadata.json`
  Json,
  /// `metadata.txt`
  Txt,
  /// All three.
  All,
}

impl MetadataFormat {
  /// The concrete formats this selection stands for.
  pub fn expand(self) -> Vec<MetadataFormat> {
    match self {
      MetadataFormat::All => vec![MetadataFormat::Csv, MetadataFormat::Json, MetadataFormat::Txt],
      other => vec![other],
    }
  }

  /// File name for a concrete format.
  fn file_name(self) -> &'static str {
    match self {
      MetadataFormat::Csv => "metadata.csv",
      MetadataFormat::Json => "metadata.json",
      MetadataFormat::Txt | MetadataFormat::All => "metadata.txt",
    }
  }
}

impl FromStr for MetadataFormat {
  type Err = HarvestError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "csv" => Ok(MetadataFormat::Csv),
      "json" => Ok(MetadataFormat::Json),
      "txt" => Ok(MetadataFormat::Txt),
      "all" => Ok(MetadataFormat::All),
      other => Err(HarvestError::Config(format!(
        "Unknown metadata format `{other}` (expected csv, json, txt or all)"
      ))),
    }
  }
}

impl Display for MetadataFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      MetadataFormat::Csv => "csv",
      MetadataFormat::Json => "json",
      MetadataFormat::Txt => "txt",
      MetadataFormat::All => "all",
    };
    write!(f, "{name}")
  }
}

/// A flat metadata record: field name to value.
pub type Record = BTreeMap<String, Value>;

/// Reads and writes the metadata files of one conference.
#[derive(Debug, Clone)]
pub struct MetadataStore {
  /// Root data directory.
  base_dir: PathBuf,
  /// Conference directory name under the root.
  dir_name: String,
}

impl MetadataStore {
  /// Creates a store for the conference stored under `<base_dir>/<dir_name>`.
  pub fn new(base_dir: impl Into<PathBuf>, dir_name: &str) -> Self {
    Self { base_dir: base_dir.into(), dir_name: dir_name.to_string() }
  }

  /// Directory holding one year of this conference.
  pub fn year_dir(&self, year: u32) -> PathBuf {
    self.base_dir.join(&self.dir_name).join(year.to_string())
  }

  /// Writes `papers` in the requested format(s), replacing any previous files.
  ///
  /// Returns the paths that were written.
  pub fn save(
    &self,
    papers: &[PaperDescriptor],
    year: u32,
    format: MetadataFormat,
  ) -> Result<Vec<PathBuf>> {
    let year_dir = self.year_dir(year);
    std::fs::create_dir_all(&year_dir)?;

    let records: Vec<Record> = papers.iter().map(PaperDescriptor::to_record).collect();
    let mut written = Vec::new();
    for format in format.expand() {
      let path = year_dir.join(format.file_name());
      let content = match format {
        MetadataFormat::Csv => {
          if records.is_empty() {
            debug!("No records, skipping {}", path.display());
            continue;
          }
          render_csv(&records)?
        },
        MetadataFormat::Json => serde_json::to_vec_pretty(&records)?,
        _ => render_txt(&records).into_bytes(),
      };
      write_atomic(&path, &content)?;
      written.push(path);
    }

    info!("Metadata saved: {} ({} records)", format, records.len());
    Ok(written)
  }

  /// Loads the last saved records for `year`.
  ///
  /// JSON is preferred because it preserves value types; CSV is used otherwise. Returns `None`
  /// when neither file exists.
  pub fn load(&self, year: u32) -> Result<Option<Vec<Record>>> {
    let year_dir = self.year_dir(year);

    let json_path = year_dir.join(MetadataFormat::Json.file_name());
    if json_path.exists() {
      let content = std::fs::read_to_string(&json_path)?;
      return Ok(Some(serde_json::from_str(&content)?));
    }

    let csv_path = year_dir.join(MetadataFormat::Csv.file_name());
    if csv_path.exists() {
      let mut reader = csv::Reader::from_path(&csv_path)?;
      let headers = reader.headers()?.clone();
      let mut records = Vec::new();
      for row in reader.records() {
        let row = row?;
        let record = headers
          .iter()
          .zip(row.iter())
          .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
          .collect();
        records.push(record);
      }
      return Ok(Some(records));
    }

    Ok(None)
  }

  /// File stems of the PDFs already present for `year`, sorted.
  pub fn downloaded_papers(&self, year: u32) -> Result<Vec<String>> {
    let papers_dir = self.year_dir(year).join("papers");
    if !papers_dir.exists() {
      return Ok(Vec::new());
    }
    let mut stems = Vec::new();
    for entry in std::fs::read_dir(papers_dir)? {
      let path = entry?.path();
      if path.extension().is_some_and(|ext| ext == "pdf") {
        if let Some(stem) = path.file_stem() {
          stems.push(stem.to_string_lossy().into_owned());
        }
      }
    }
    stems.sort();
    Ok(stems)
  }
}

/// Renders a value as a CSV/TXT cell.
fn cell(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// CSV with the priority columns first and the rest alphabetically.
fn render_csv(records: &[Record]) -> Result<Vec<u8>> {
  let mut fields: Vec<&str> =
    PRIORITY_FIELDS.iter().copied().filter(|f| records.iter().any(|r| r.contains_key(*f))).collect();
  let mut rest: Vec<&str> = records
    .iter()
    .flat_map(|r| r.keys().map(String::as_str))
    .filter(|k| !PRIORITY_FIELDS.contains(k))
    .collect();
  rest.sort_unstable();
  rest.dedup();
  fields.extend(rest);

  let mut writer = csv::Writer::from_writer(Vec::new());
  writer.write_record(&fields)?;
  for record in records {
    writer.write_record(fields.iter().map(|f| record.get(*f).map(cell).unwrap_or_default()))?;
  }
  writer.into_inner().map_err(|e| HarvestError::Path(e.into_error()))
}

/// Human-readable listing.
fn render_txt(records: &[Record]) -> String {
  let mut out = String::new();
  for (i, record) in records.iter().enumerate() {
    let field = |key: &str| record.get(key).map(cell).filter(|s| !s.is_empty());
    out.push_str(&format!("[{}] {}\n", i + 1, field("title").unwrap_or_else(|| "Unknown".into())));
    if let Some(authors) = field("authors") {
      out.push_str(&format!("    Authors: {authors}\n"));
    }
    if let Some(pdf_url) = field("pdf_url") {
      out.push_str(&format!("    PDF: {pdf_url}\n"));
    }
    if let Some(doi) = field("doi") {
      out.push_str(&format!("    DOI: {doi}\n"));
    }
    out.push('\n');
  }
  out
}

/// Writes `content` next to `path` and renames it into place.
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);

  let result = (|| {
    let mut file = std::fs::File::create(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)
  })();
  if result.is_err() {
    let _ = std::fs::remove_file(&tmp);
  }
  Ok(result?)
}
