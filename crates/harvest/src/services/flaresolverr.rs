//! Client for a FlareSolverr instance.
//!
//! FlareSolverr drives a real browser through anti-bot challenges. We use it to obtain cookies
//! (and the user agent they are bound to) that our own clients then replay, and occasionally to
//! fetch a page that refuses plain HTTP clients.

use super::*;

/// Default `maxTimeout` for cookie requests, in milliseconds.
const COOKIE_TIMEOUT_MS: u64 = 90_000;

/// Default `maxTimeout` for page fetches, in milliseconds.
const PAGE_TIMEOUT_MS: u64 = 60_000;

/// Cookies and user agent obtained by solving a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolvedChallenge {
  /// Cookies set by the target site.
  pub cookies:    Vec<BrowserCookie>,
  /// User agent of the browser that solved the challenge.
  pub user_agent: String,
}

/// Request body of the `/v1` endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolverRequest<'a> {
  /// Always `request.get`.
  cmd:         &'a str,
  /// Target URL.
  url:         &'a str,
  /// Browser timeout in milliseconds.
  max_timeout: u64,
}

/// Response of the `/v1` endpoint.
#[derive(Debug, Deserialize)]
struct SolverResponse {
  /// `ok` on success.
  #[serde(default)]
  status:   String,
  /// Error description otherwise.
  #[serde(default)]
  message:  String,
  /// Result of the browser visit.
  #[serde(default)]
  solution: Option<Solution>,
}

/// The `solution` object.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Solution {
  /// Cookies after the visit.
  #[serde(default)]
  cookies:    Vec<BrowserCookie>,
  /// Browser user agent.
  #[serde(default)]
  user_agent: String,
  /// Page HTML.
  #[serde(default)]
  response:   String,
}

/// FlareSolverr API client.
#[derive(Debug)]
pub struct FlareSolverrClient {
  /// HTTP client.
  client:    Client,
  /// The `/v1` endpoint.
  url:       String,
  /// Memoized availability probe.
  available: Mutex<Option<bool>>,
}

impl FlareSolverrClient {
  /// Creates a client for the `/v1` endpoint at `url`.
  pub fn new(client: Client, url: &str) -> Self {
    Self { client, url: url.to_string(), available: Mutex::new(None) }
  }

  /// The configured endpoint.
  pub fn url(&self) -> &str { &self.url }

  /// Probes `/health`, then the root, once; later calls return the cached answer.
  pub async fn check_available(&self) -> bool {
    if let Some(available) = *self.available.lock().unwrap_or_else(|e| e.into_inner()) {
      return available;
    }

    let health = self.url.replace("/v1", "/health");
    let root = self.url.replace("/v1", "/");
    let mut available = false;
    for probe in [health, root] {
      match self.client.get(&probe).timeout(Duration::from_secs(5)).send().await {
        Ok(response) => {
          available = response.status().is_success();
          break;
        },
        Err(e) => trace!("FlareSolverr probe {probe} failed: {e}"),
      }
    }

    if available {
      info!("FlareSolverr service available at {}", self.url);
    } else {
      warn!("FlareSolverr service not available at {}", self.url);
    }
    *self.available.lock().unwrap_or_else(|e| e.into_inner()) = Some(available);
    available
  }

  /// Sends one `request.get` command.
  async fn solve(&self, target: &str, max_timeout_ms: u64) -> Result<Solution> {
    let request = SolverRequest { cmd: "request.get", url: target, max_timeout: max_timeout_ms };
    let response = self
      .client
      .post(&self.url)
      .json(&request)
      .timeout(Duration::from_millis(max_timeout_ms) + Duration::from_secs(10))
      .send()
      .await?;
    if !response.status().is_success() {
      return Err(HarvestError::ApiError(format!("FlareSolverr returned {}", response.status())));
    }
    let body: SolverResponse = response.json().await?;
    if body.status != "ok" {
      return Err(HarvestError::ApiError(format!(
        "FlareSolverr status {}: {}",
        body.status, body.message
      )));
    }
    body.solution.ok_or_else(|| HarvestError::ApiError("FlareSolverr sent no solution".into()))
  }

  /// Visits `target` through the solver and returns the resulting cookies.
  pub async fn get_cookies(&self, target: &str) -> Option<SolvedChallenge> {
    if !self.check_available().await {
      return None;
    }
    info!("Getting cookies via FlareSolverr: {}", truncate(target, 60));
    match self.solve(target, COOKIE_TIMEOUT_MS).await {
      Ok(solution) if !solution.cookies.is_empty() => {
        info!("Got {} cookies from FlareSolverr", solution.cookies.len());
        Some(SolvedChallenge { cookies: solution.cookies, user_agent: solution.user_agent })
      },
      Ok(_) => {
        warn!("FlareSolverr returned no cookies");
        None
      },
      Err(e) => {
        warn!("FlareSolverr cookie request failed: {e}");
        None
      },
    }
  }

  /// Fetches the HTML of `target` through the solver.
  pub async fn fetch_page(&self, target: &str) -> Option<String> {
    if !self.check_available().await {
      return None;
    }
    match self.solve(target, PAGE_TIMEOUT_MS).await {
      Ok(solution) => Some(solution.response),
      Err(e) => {
        debug!("FlareSolverr fetch failed: {e}");
        None
      },
    }
  }
}
