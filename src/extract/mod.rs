//! Two-tier parsing: embedded structured data first, selector cascades second

pub mod selectors;
pub mod structured;
mod text;

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

pub use selectors::DomSelectorExtractor;
pub use structured::{StructuredDataExtractor, StructuredLookup, StructuredRecord};
pub use text::clean_text;

use crate::assembler::{Assembled, ProductAssembler};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::traits::SiteAdapter;

/// Everything needed to turn one page's markup into an [`Assembled`] result
/// for a given site.
#[derive(Debug)]
pub struct ProductParser {
    structured: StructuredDataExtractor,
    selectors: DomSelectorExtractor,
    assembler: ProductAssembler,
}

impl ProductParser {
    pub fn new(adapter: &dyn SiteAdapter, config: Arc<ScraperConfig>) -> Result<Self, ScrapeError> {
        Ok(Self {
            structured: StructuredDataExtractor::new(adapter.structured_type_tag()),
            selectors: DomSelectorExtractor::new(adapter.selectors())?,
            assembler: ProductAssembler::new(config),
        })
    }

    pub fn parse(&self, markup: &str, url: &str) -> Result<Assembled, ScrapeError> {
        if markup.trim().is_empty() {
            return Err(ScrapeError::Parsing {
                url: url.to_string(),
                reason: "page markup is empty".to_string(),
            });
        }
        let page_url = Url::parse(url).map_err(|e| ScrapeError::Parsing {
            url: url.to_string(),
            reason: format!("page URL is not absolute: {e}"),
        })?;

        let record = match self.structured.extract(markup) {
            StructuredLookup::Found(record) => Some(record),
            StructuredLookup::Missing { reason } => {
                info!(url, %reason, "no structured data, using selector fallback");
                None
            }
        };
        let selector_record = self.selectors.extract(markup, &page_url);
        debug!(
            url,
            title = %selector_record.title,
            images = selector_record.images.len(),
            sizes = selector_record.sizes.len(),
            "selector fields extracted"
        );

        self.assembler
            .assemble(record.as_deref(), &selector_record, url)
    }
}
