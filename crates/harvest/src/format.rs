//! Title formatting helpers.
//!
//! Paper titles double as file names on disk and as fuzzy match keys when looking a paper up in
//! an external index. Both uses live here.

use super::*;

/// Default maximum length, in characters, of a sanitized file name.
pub const DEFAULT_MAX_FILENAME_LEN: usize = 200;

lazy_static! {
  /// Characters that are illegal in file names on at least one common platform.
  static ref ILLEGAL: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap();
  /// Runs of whitespace.
  static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Turns free text into a name that is safe to use as a single path component.
///
/// Illegal characters are removed, newlines become spaces, runs of whitespace collapse to a single
/// space, and the result is trimmed of surrounding dots and truncated to `max_len` characters. A
/// title with nothing usable left, such as `"???"`, becomes `untitled-<hash>`. The function is
/// pure, so the same title always maps to the same file name, which is what makes resuming a crawl
/// idempotent.
///
/// # Examples
///
/// ```
/// use harvest::format::sanitize_filename;
///
/// assert_eq!(sanitize_filename("What/Why: A \"Study\"?\n Part 2", 200), "WhatWhy A Study Part 2");
/// assert!(sanitize_filename("???", 200).starts_with("untitled-"));
/// ```
pub fn sanitize_filename(title: &str, max_len: usize) -> String {
  let cleaned = title.replace(['\n', '\r', '\t'], " ");
  let cleaned = ILLEGAL.replace_all(&cleaned, "");
  let cleaned = WHITESPACE.replace_all(&cleaned, " ");
  let cleaned = cleaned.trim().trim_matches('.').trim();
  let name: String = cleaned.chars().take(max_len).collect();
  let name = name.trim_end().trim_end_matches('.').trim_end();
  if name.is_empty() {
    format!("untitled-{}", short_hash(title))
  } else {
    name.to_string()
  }
}

/// Eight hex digits of the 64-bit FNV-1a hash of `text`.
///
/// Stable across runs and platforms, unlike the std hasher.
pub fn short_hash(text: &str) -> String {
  let hash = text.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
    (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
  });
  format!("{:08x}", hash >> 32)
}

/// Normalizes a title for comparison: lowercase, no punctuation, single spaces.
pub fn normalize_title(title: &str) -> String {
  let lowered = title.to_lowercase();
  let stripped: String = lowered.chars().filter(|c| !c.is_ascii_punctuation()).collect();
  stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns `true` if two titles are equal after [`normalize_title`].
pub fn titles_match(a: &str, b: &str) -> bool { normalize_title(a) == normalize_title(b) }

/// A short, char-boundary-safe prefix of `text` used in log lines.
pub fn truncate(text: &str, max: usize) -> String {
  if text.chars().count() <= max {
    text.to_string()
  } else {
    format!("{}…", text.chars().take(max).collect::<String>())
  }
}
