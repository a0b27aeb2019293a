//! Site adapters, selected by [`SiteKind`]

use std::sync::Arc;

use crate::error::ScrapeError;
use crate::traits::SiteAdapter;

pub mod farfetch;
pub mod generic;

pub use farfetch::FarfetchAdapter;
pub use generic::GenericAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Farfetch,
    /// Any host, derived from the configured base URL
    Generic,
}

impl SiteKind {
    pub fn adapter(self, base_url: &str) -> Result<Arc<dyn SiteAdapter>, ScrapeError> {
        Ok(match self {
            Self::Farfetch => Arc::new(FarfetchAdapter::new()),
            Self::Generic => Arc::new(GenericAdapter::from_base_url(base_url)?),
        })
    }
}

impl std::str::FromStr for SiteKind {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "farfetch" => Ok(Self::Farfetch),
            "generic" => Ok(Self::Generic),
            other => Err(ScrapeError::Configuration(format!("unknown site {other:?}"))),
        }
    }
}
