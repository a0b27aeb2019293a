//! Error taxonomy for the fetch → parse pipeline

use thiserror::Error;

/// Every failure a scrape run can surface.
///
/// Only [`ScrapeError::Configuration`] is fatal to a whole run; every other
/// variant is attached to a single URL's outcome.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("URL {url} rejected: {reason}")]
    UrlValidation { url: String, reason: String },

    #[error("navigation to {url} failed{}: {reason}", status_suffix(.status))]
    Navigation {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("timed out after {timeout_ms}ms loading {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("could not parse {url}: {reason}")]
    Parsing { url: String, reason: String },

    #[error("product at {url} failed validation: {reason}")]
    ProductValidation { url: String, reason: String },

    #[error("storage error for {target}: {reason}")]
    Storage { target: String, reason: String },
}

impl ScrapeError {
    /// Transient failures the fetcher retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Navigation { .. } | Self::Timeout { .. })
    }

    /// HTTP status attached to a navigation failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Navigation { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status() == Some(403)
    }

    pub(crate) fn navigation(url: &str, status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.to_string(),
            status,
            reason: reason.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with HTTP {s}")).unwrap_or_default()
}
