//! Collaborators that help sources find papers they cannot fetch directly.
//!
//! - [`semantic_scholar`] and [`arxiv`] look up open-access copies of paywalled papers by DOI or
//!   title.
//! - [`flaresolverr`] talks to a FlareSolverr instance to pass browser challenges and obtain
//!   session cookies.
//! - [`cookies`] defines the cookie shape shared by all of the above and cookie files on disk.
//!
//! Lookups here are best effort: any failure is logged at debug level and reported as "nothing
//! found", so a broken mirror never fails a download on its own.

use super::*;
use crate::format::{titles_match, truncate};

pub mod arxiv;
pub mod cookies;
pub mod flaresolverr;
pub mod semantic_scholar;

pub use arxiv::{ArxivClient, ArxivMatch};
pub use cookies::BrowserCookie;
pub use flaresolverr::{FlareSolverrClient, SolvedChallenge};
pub use semantic_scholar::{OpenAccessPdf, SemanticScholarClient};
