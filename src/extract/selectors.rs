//! Selector-cascade fallback for pages without usable structured data

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::text::collapse_whitespace;
use crate::error::ScrapeError;
use crate::models::SelectorRecord;
use crate::traits::SiteSelectors;

pub const MAX_IMAGES: usize = 10;

/// Compiled selector cascades for one site.
#[derive(Debug)]
pub struct DomSelectorExtractor {
    title: Vec<Selector>,
    brand: Vec<Selector>,
    description: Vec<Selector>,
    images: Vec<Selector>,
    image_attributes: Vec<String>,
    sizes: Vec<Selector>,
}

impl DomSelectorExtractor {
    pub fn new(selectors: &SiteSelectors) -> Result<Self, ScrapeError> {
        Ok(Self {
            title: compile(&selectors.title)?,
            brand: compile(&selectors.brand)?,
            description: compile(&selectors.description)?,
            images: compile(&selectors.images)?,
            image_attributes: selectors.image_attributes.clone(),
            sizes: compile(&selectors.sizes)?,
        })
    }

    /// Never fails; fields nothing matched are left empty. Image URLs are
    /// resolved against `page_url`.
    pub fn extract(&self, markup: &str, page_url: &Url) -> SelectorRecord {
        if markup.trim().is_empty() {
            return SelectorRecord::default();
        }
        let document = Html::parse_document(markup);

        SelectorRecord {
            title: first_text(&document, &self.title),
            brand: first_text(&document, &self.brand),
            description: first_text(&document, &self.description),
            images: self.images(&document, page_url),
            sizes: self.sizes(&document),
        }
    }

    fn images(&self, document: &Html, page_url: &Url) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        'cascade: for selector in &self.images {
            for element in document.select(selector) {
                let Some(src) = self
                    .image_attributes
                    .iter()
                    .filter_map(|attr| element.value().attr(attr))
                    .map(str::trim)
                    .find(|src| !src.is_empty() && !src.starts_with("data:"))
                else {
                    continue;
                };

                let Ok(resolved) = page_url.join(src) else {
                    continue;
                };
                let resolved = resolved.to_string();
                if !images.contains(&resolved) {
                    images.push(resolved);
                }
                if images.len() >= MAX_IMAGES {
                    break 'cascade;
                }
            }
        }
        images
    }

    fn sizes(&self, document: &Html) -> Vec<String> {
        let mut sizes: Vec<String> = Vec::new();
        for selector in &self.sizes {
            for size in document.select(selector).map(element_text) {
                if !size.is_empty() && !sizes.contains(&size) {
                    sizes.push(size);
                }
            }
        }
        sizes
    }
}

fn compile(cascade: &[String]) -> Result<Vec<Selector>, ScrapeError> {
    cascade
        .iter()
        .map(|css| {
            Selector::parse(css).map_err(|e| {
                ScrapeError::Configuration(format!("invalid selector {css:?}: {e:?}"))
            })
        })
        .collect()
}

fn first_text(document: &Html, cascade: &[Selector]) -> String {
    cascade
        .iter()
        .flat_map(|selector| document.select(selector))
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}
