//! Merges structured and selector-derived fields into a [`CanonicalProduct`]

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::extract::structured::{ImageRef, StructuredRecord, StructuredVariant};
use crate::models::{
    Availability, CanonicalProduct, ExtractionSource, Offer, PriceSpecification, ProductImage,
    ProductVariant, SelectorRecord, SkipReason,
};

/// Inclusive bounds for a believable price
pub const MAX_SANE_PRICE: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    Product(CanonicalProduct),
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct ProductAssembler {
    config: Arc<ScraperConfig>,
}

impl ProductAssembler {
    pub fn new(config: Arc<ScraperConfig>) -> Self {
        Self { config }
    }

    pub fn assemble(
        &self,
        structured: Option<&StructuredRecord>,
        selectors: &SelectorRecord,
        url: &str,
    ) -> Result<Assembled, ScrapeError> {
        let product = match structured {
            Some(record) => from_structured(record, selectors, url),
            None => from_selectors(selectors, url),
        };

        if !self.config.accepts_brand(&product.brand) {
            debug!(url, brand = %product.brand, "brand not in target list");
            return Ok(Assembled::Skipped(SkipReason::BrandFiltered {
                brand: product.brand,
            }));
        }

        if product.name.is_empty() {
            return Err(ScrapeError::ProductValidation {
                url: url.to_string(),
                reason: "no product name found".to_string(),
            });
        }

        Ok(Assembled::Product(product))
    }
}

fn prefer(primary: &str, fallback: &str) -> String {
    let primary = primary.trim();
    if primary.is_empty() {
        fallback.trim().to_string()
    } else {
        primary.to_string()
    }
}

fn from_structured(
    record: &StructuredRecord,
    selectors: &SelectorRecord,
    url: &str,
) -> CanonicalProduct {
    let name = prefer(&record.name, &selectors.title);
    let images: Vec<ProductImage> = record
        .image
        .as_slice()
        .iter()
        .filter(|image| !image.url().is_empty())
        .map(|image| ProductImage {
            content_url: image.url().to_string(),
            description: image.description().to_string(),
        })
        .collect();
    let first_image = images
        .first()
        .map(|image| image.content_url.clone())
        .unwrap_or_default();

    let variants = record
        .has_variant
        .iter()
        .filter_map(|variant| {
            let built = structured_variant(variant, &name, &first_image, url);
            if built.is_none() {
                warn!(url, sku = %variant.sku, "skipping variant without a sane price");
            }
            built
        })
        .collect();

    CanonicalProduct {
        name,
        brand: prefer(record.brand_name(), &selectors.brand),
        description: prefer(&record.description, &selectors.description),
        url: url.to_string(),
        color: record.color.trim().to_string(),
        product_group_id: record.product_group_id.trim().to_string(),
        images,
        variants,
        source: ExtractionSource::StructuredData,
    }
}

fn structured_variant(
    variant: &StructuredVariant,
    product_name: &str,
    fallback_image: &str,
    url: &str,
) -> Option<ProductVariant> {
    let offer = variant.offers.first()?;
    let spec = offer.price_specification.first()?;
    let price = sane_price(&spec.price)?;

    let size = variant.size.trim().to_string();
    let name = if variant.name.trim().is_empty() {
        format!("{product_name} | {size}")
    } else {
        variant.name.trim().to_string()
    };
    let currency = Some(spec.price_currency.trim().to_string()).filter(|c| !c.is_empty());

    Some(ProductVariant {
        sku: variant.sku.trim().to_string(),
        name,
        size,
        image: variant
            .image
            .first()
            .map(ImageRef::url)
            .filter(|u| !u.is_empty())
            .unwrap_or(fallback_image)
            .to_string(),
        offer: Offer {
            url: prefer(&offer.url, url),
            availability: Availability::parse(&offer.availability),
            price_specification: vec![PriceSpecification { price, currency }],
        },
        needs_revalidation: false,
    })
}

/// Numbers or numeric strings inside `[0, MAX_SANE_PRICE]`.
fn sane_price(raw: &Value) -> Option<f64> {
    let price = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && (0.0..=MAX_SANE_PRICE).contains(&price)).then_some(price)
}

fn from_selectors(selectors: &SelectorRecord, url: &str) -> CanonicalProduct {
    let name = selectors.title.trim().to_string();
    let first_image = selectors.images.first().cloned().unwrap_or_default();

    let placeholder = |sku: String, name: String, size: String| ProductVariant {
        sku,
        name,
        size,
        image: first_image.clone(),
        offer: Offer {
            url: url.to_string(),
            availability: Availability::InStock,
            price_specification: vec![PriceSpecification {
                price: 0.0,
                currency: None,
            }],
        },
        needs_revalidation: true,
    };

    let variants = if selectors.sizes.is_empty() {
        vec![placeholder("html-default".into(), name.clone(), String::new())]
    } else {
        selectors
            .sizes
            .iter()
            .map(|size| placeholder(format!("html-{size}"), format!("{name} | {size}"), size.clone()))
            .collect()
    };

    CanonicalProduct {
        name: name.clone(),
        brand: selectors.brand.trim().to_string(),
        description: selectors.description.trim().to_string(),
        url: url.to_string(),
        color: String::new(),
        product_group_id: String::new(),
        images: selectors
            .images
            .iter()
            .map(|content_url| ProductImage {
                content_url: content_url.clone(),
                description: String::new(),
            })
            .collect(),
        variants,
        source: ExtractionSource::Selectors,
    }
}
