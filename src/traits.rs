//! Traits and interfaces for site-agnostic scraping and its collaborators

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::error::ScrapeError;
use crate::models::CanonicalProduct;

/// Ordered selector cascades for the markup fallback. Each list is tried
/// front to back; the first candidate yielding content wins.
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub title: Vec<String>,
    pub brand: Vec<String>,
    pub description: Vec<String>,
    /// Every candidate contributes, in order, until the image cap is reached
    pub images: Vec<String>,
    /// Attributes read from image elements, first non-empty wins
    pub image_attributes: Vec<String>,
    /// Every candidate contributes, in order
    pub sizes: Vec<String>,
}

impl SiteSelectors {
    /// Cascades that fit most storefront product pages.
    pub fn common() -> Self {
        Self {
            title: strings(&[
                r#"h1[data-testid="product-name"]"#,
                r#"h1[data-testid="product-title"]"#,
                "h1.product-name",
                r#"h1[class*="product"]"#,
                "h1",
                ".product-title",
                r#"[data-testid*="title"]"#,
            ]),
            brand: strings(&[
                r#"[data-testid="brand"]"#,
                ".brand",
                r#"[class*="brand"]"#,
                r#"[data-testid*="brand"]"#,
                ".product-brand",
                r#"h2[class*="brand"]"#,
            ]),
            description: strings(&[
                r#"[data-testid="description"]"#,
                ".product-description",
                r#"[class*="description"]"#,
                r#"[data-testid*="description"]"#,
                ".product-details",
                ".product-info",
            ]),
            images: strings(&[
                ".product-image img",
                r#"[data-testid*="image"] img"#,
                ".gallery img",
                ".product-gallery img",
                r#"[class*="gallery"] img"#,
            ]),
            image_attributes: strings(&["src", "data-src", "data-lazy"]),
            sizes: strings(&[
                r#"[data-testid*="size"]"#,
                ".size-selector button",
                ".size-option",
                r#"[class*="size"] button"#,
                ".product-sizes button",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// What distinguishes one storefront from another: which URLs it owns, how
/// its structured data is tagged and where its markup keeps product fields.
pub trait SiteAdapter: Send + Sync {
    /// Source name used for persistence and archive keys
    fn name(&self) -> &str;

    /// Whether a parsed URL belongs to this site
    fn owns_url(&self, url: &Url) -> bool;

    /// `@type` of the embedded structured-data block describing a product
    fn structured_type_tag(&self) -> &str {
        "ProductGroup"
    }

    fn selectors(&self) -> &SiteSelectors;

    /// Rejects URLs that are malformed, not http(s), or foreign to the site.
    fn validate_ownership(&self, raw: &str) -> Result<Url, ScrapeError> {
        let reject = |reason: String| ScrapeError::UrlValidation {
            url: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw.trim()).map_err(|e| reject(format!("malformed URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(reject(format!("unsupported scheme {:?}", url.scheme())));
        }
        if !self.owns_url(&url) {
            return Err(reject(format!("does not belong to {}", self.name())));
        }
        Ok(url)
    }
}

/// Hostname equals `domain` or is a subdomain of it.
pub fn host_matches(url: &Url, domain: &str) -> bool {
    let domain = domain.trim_start_matches("www.").to_ascii_lowercase();
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    Created,
    Updated,
}

/// Receives canonical products; the scraper never talks to a database itself.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn upsert(
        &self,
        source: &str,
        external_id: &str,
        product: &CanonicalProduct,
    ) -> Result<UpsertStatus>;
}

/// Keeps raw payloads (rendered markup) under a caller-chosen key.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Stores `bytes` and returns the key they were stored under.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_matching_accepts_subdomains_only() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(host_matches(&url("https://www.farfetch.com/shopping/x.aspx"), "farfetch.com"));
        assert!(host_matches(&url("https://farfetch.com/"), "www.farfetch.com"));
        assert!(host_matches(&url("https://m.FARFETCH.com/"), "farfetch.com"));
        assert!(!host_matches(&url("https://notfarfetch.com/"), "farfetch.com"));
        assert!(!host_matches(&url("https://farfetch.com.evil.test/"), "farfetch.com"));
    }

    #[test]
    fn common_cascades_are_ordered_specific_first() {
        let selectors = SiteSelectors::common();
        assert_eq!(selectors.title.first().unwrap(), r#"h1[data-testid="product-name"]"#);
        assert!(selectors.title.iter().position(|s| s == "h1").unwrap() > 0);
        assert_eq!(selectors.image_attributes, vec!["src", "data-src", "data-lazy"]);
    }
}
