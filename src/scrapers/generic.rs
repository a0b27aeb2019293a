//! Adapter for any storefront that follows common product-page markup

use url::Url;

use crate::error::ScrapeError;
use crate::traits::{SiteAdapter, SiteSelectors, host_matches};

/// Owns every URL on the base URL's host and uses the common cascades.
#[derive(Debug, Clone)]
pub struct GenericAdapter {
    name: String,
    domain: String,
    type_tag: String,
    selectors: SiteSelectors,
}

impl GenericAdapter {
    pub fn from_base_url(base_url: &str) -> Result<Self, ScrapeError> {
        let domain = Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(ToString::to_string))
            .ok_or_else(|| {
                ScrapeError::Configuration(format!("base URL {base_url:?} has no host"))
            })?;

        Ok(Self {
            name: domain.trim_start_matches("www.").to_string(),
            domain,
            type_tag: "ProductGroup".to_string(),
            selectors: SiteSelectors::common(),
        })
    }

    /// Look for a different structured-data `@type` (e.g. `Product`).
    #[must_use]
    pub fn with_type_tag(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = tag.into();
        self
    }

    #[must_use]
    pub fn with_selectors(mut self, selectors: SiteSelectors) -> Self {
        self.selectors = selectors;
        self
    }
}

impl SiteAdapter for GenericAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn owns_url(&self, url: &Url) -> bool {
        host_matches(url, &self.domain)
    }

    fn structured_type_tag(&self) -> &str {
        &self.type_tag
    }

    fn selectors(&self) -> &SiteSelectors {
        &self.selectors
    }
}
