//! Farfetch.com specific site adapter

use url::Url;

use crate::traits::{SiteAdapter, SiteSelectors, host_matches};

const DOMAIN: &str = "farfetch.com";

/// Site adapter for Farfetch product pages
#[derive(Debug, Clone)]
pub struct FarfetchAdapter {
    selectors: SiteSelectors,
}

impl FarfetchAdapter {
    /// Create a Farfetch adapter with its selector cascades
    pub fn new() -> Self {
        let mut selectors = SiteSelectors::common();
        // Farfetch serves product shots from its own CDN; catch gallery
        // markup the generic cascades miss.
        selectors.images.push(r#"img[src*="farfetch"]"#.to_string());

        Self { selectors }
    }
}

impl Default for FarfetchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteAdapter for FarfetchAdapter {
    fn name(&self) -> &str {
        "farfetch"
    }

    fn owns_url(&self, url: &Url) -> bool {
        host_matches(url, DOMAIN)
    }

    fn selectors(&self) -> &SiteSelectors {
        &self.selectors
    }
}
