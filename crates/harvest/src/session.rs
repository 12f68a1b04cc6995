//! HTTP session factory.
//!
//! Every download worker gets its own [`Client`] built from shared settings: browser-like default
//! headers, connect and read timeouts, and the cookies currently known to the factory. Cookies are
//! recorded on the factory (for instance after a FlareSolverr challenge was solved) and replayed
//! into each new client's jar, so no cookie store is ever shared between concurrent requests.

use reqwest::{
  cookie::Jar,
  header::{self, HeaderMap, HeaderValue},
};

use super::*;
use crate::services::cookies::BrowserCookie;

/// Builds configured HTTP clients.
#[derive(Debug)]
pub struct SessionFactory {
  /// User agent for new clients; replaced when a challenge solver reports its own.
  user_agent:      Mutex<String>,
  /// Cookies replayed into every new client.
  cookies:         Mutex<Vec<BrowserCookie>>,
  /// Connection timeout.
  connect_timeout: Duration,
  /// Maximum time between two reads of a response body.
  read_timeout:    Duration,
}

impl SessionFactory {
  /// Creates a factory from the retry and user agent settings of `config`.
  pub fn new(config: &Config) -> Self {
    Self {
      user_agent:      Mutex::new(config.user_agent.clone()),
      cookies:         Mutex::new(Vec::new()),
      connect_timeout: Duration::from_secs(config.retry.connect_timeout_secs),
      read_timeout:    Duration::from_secs(config.retry.read_timeout_secs),
    }
  }

  /// Builds a new client carrying the factory's headers and current cookies.
  pub fn client(&self) -> Result<Client> {
    let jar = Jar::default();
    for cookie in self.cookies() {
      match cookie.origin() {
        Some(origin) => jar.add_cookie_str(&cookie.to_set_cookie(), &origin),
        None => trace!("Skipping cookie {} without a usable domain", cookie.name),
      }
    }

    let mut headers = HeaderMap::new();
    headers.insert(
      header::ACCEPT,
      HeaderValue::from_static(
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
      ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    let client = Client::builder()
      .user_agent(self.user_agent())
      .default_headers(headers)
      .cookie_provider(Arc::new(jar))
      .connect_timeout(self.connect_timeout)
      .read_timeout(self.read_timeout)
      .build()?;
    Ok(client)
  }

  /// Builds a client for one download worker.
  ///
  /// Same as [`SessionFactory::client`]; the separate name marks call sites that run
  /// concurrently and must not share a client.
  pub fn worker_client(&self) -> Result<Client> { self.client() }

  /// Records cookies for all clients built from now on. Cookies with the same name, domain and
  /// path replace the previous value.
  pub fn update_cookies(&self, cookies: &[BrowserCookie]) {
    let mut known = self.cookies.lock().unwrap_or_else(|e| e.into_inner());
    for cookie in cookies {
      known.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
      known.push(cookie.clone());
    }
    debug!("Session now carries {} cookies", known.len());
  }

  /// Replaces the user agent for clients built from now on.
  pub fn update_user_agent(&self, user_agent: &str) {
    if !user_agent.is_empty() {
      *self.user_agent.lock().unwrap_or_else(|e| e.into_inner()) = user_agent.to_string();
    }
  }

  /// Snapshot of the recorded cookies.
  pub fn cookies(&self) -> Vec<BrowserCookie> {
    self.cookies.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  /// Whether any cookies have been recorded.
  pub fn has_cookies(&self) -> bool {
    !self.cookies.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
  }

  /// The current user agent.
  pub fn user_agent(&self) -> String {
    self.user_agent.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}
