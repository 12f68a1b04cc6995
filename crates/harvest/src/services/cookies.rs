//! Browser cookies exchanged with challenge solvers and cookie files.
//!
//! The JSON shape is the one browsers and FlareSolverr export: a list of objects with at least
//! `name` and `value`, usually `domain` and `path`, and assorted attributes that are ignored here.

use std::net::IpAddr;

use super::*;

/// A single cookie as exported by a browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCookie {
  /// Cookie name.
  pub name:   String,
  /// Cookie value.
  pub value:  String,
  /// Domain, possibly with a leading dot.
  #[serde(default)]
  pub domain: String,
  /// Path scope.
  #[serde(default = "root_path")]
  pub path:   String,
}

/// Serde default for [`BrowserCookie::path`].
fn root_path() -> String { "/".to_string() }

impl BrowserCookie {
  /// Creates a cookie.
  pub fn new(name: &str, value: &str, domain: &str, path: &str) -> Self {
    Self {
      name:   name.to_string(),
      value:  value.to_string(),
      domain: domain.to_string(),
      path:   if path.is_empty() { root_path() } else { path.to_string() },
    }
  }

  /// Host the cookie belongs to, without a leading dot.
  fn host(&self) -> &str { self.domain.trim_start_matches('.') }

  /// A `Set-Cookie` header value for this cookie.
  ///
  /// IP addresses are stored as host-only cookies, since cookie jars refuse a `Domain` attribute
  /// that is not a domain name.
  pub fn to_set_cookie(&self) -> String {
    let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
    if !self.host().is_empty() && self.host().parse::<IpAddr>().is_err() {
      header.push_str(&format!("; Domain={}", self.host()));
    }
    header
  }

  /// URL whose origin the cookie is registered for.
  pub fn origin(&self) -> Option<Url> {
    if self.host().is_empty() {
      return None;
    }
    Url::parse(&format!("https://{}/", self.host())).ok()
  }
}

/// Reads a JSON cookie file.
pub fn load_cookie_file(path: impl AsRef<Path>) -> Result<Vec<BrowserCookie>> {
  let path = path.as_ref();
  let content = std::fs::read_to_string(path)?;
  let cookies: Vec<BrowserCookie> = serde_json::from_str(&content)?;
  info!("Loaded {} cookies from {}", cookies.len(), path.display());
  Ok(cookies)
}

/// Writes cookies as pretty JSON, creating parent directories.
pub fn save_cookie_file(path: impl AsRef<Path>, cookies: &[BrowserCookie]) -> Result<()> {
  let path = path.as_ref();
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(path, serde_json::to_string_pretty(cookies)?)?;
  info!("Cookies saved to {}", path.display());
  Ok(())
}
