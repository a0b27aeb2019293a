//! Data models for fetched pages, extracted records and canonical products

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Rendered markup captured from one product page
#[derive(Debug, Clone)]
pub struct RawPage {
    pub url: String,
    pub status: u16,
    pub markup: String,
    pub fetched_at: DateTime<Utc>,
}

/// Fields pulled out of the page through selector cascades. Every field is
/// empty when nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorRecord {
    pub title: String,
    pub brand: String,
    pub description: String,
    pub images: Vec<String>,
    pub sizes: Vec<String>,
}

/// Where a product's fields came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    StructuredData,
    Selectors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductImage {
    pub content_url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Availability {
    #[default]
    InStock,
    OutOfStock,
    PreOrder,
    LimitedAvailability,
    Discontinued,
    Unknown(String),
}

impl Availability {
    /// Accepts bare names (`InStock`) and schema.org URLs
    /// (`https://schema.org/InStock`).
    pub fn parse(raw: &str) -> Self {
        let name = raw.trim().rsplit('/').next().unwrap_or_default();
        match name.to_ascii_lowercase().as_str() {
            "" | "instock" | "instoreonly" | "onlineonly" => Self::InStock,
            "outofstock" | "soldout" => Self::OutOfStock,
            "preorder" | "presale" | "backorder" => Self::PreOrder,
            "limitedavailability" => Self::LimitedAvailability,
            "discontinued" => Self::Discontinued,
            _ => Self::Unknown(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSpecification {
    pub price: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub url: String,
    pub availability: Availability,
    pub price_specification: Vec<PriceSpecification>,
}

impl Offer {
    /// Price of the first specification entry
    pub fn price(&self) -> Option<f64> {
        self.price_specification.first().map(|spec| spec.price)
    }

    pub fn currency(&self) -> Option<&str> {
        self.price_specification
            .first()
            .and_then(|spec| spec.currency.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub sku: String,
    pub name: String,
    pub size: String,
    pub image: String,
    pub offer: Offer,
    /// Set on selector-derived variants whose price is a placeholder
    #[serde(default)]
    pub needs_revalidation: bool,
}

/// The record handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    pub name: String,
    pub brand: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub product_group_id: String,
    pub images: Vec<ProductImage>,
    pub variants: Vec<ProductVariant>,
    pub source: ExtractionSource,
}

impl CanonicalProduct {
    /// `(min, max)` over variant prices, computed on every call.
    ///
    /// Zero-valued placeholder prices are not counted, so a product whose
    /// variants carry no real price yields `(None, None)`.
    pub fn price_range(&self) -> (Option<f64>, Option<f64>) {
        let prices = self
            .variants
            .iter()
            .filter_map(|v| v.offer.price())
            .filter(|p| *p > 0.0);

        prices.fold((None, None), |(min, max), price| {
            (
                Some(min.map_or(price, |m: f64| m.min(price))),
                Some(max.map_or(price, |m: f64| m.max(price))),
            )
        })
    }

    /// Stable identifier for persistence: the product-group id when the page
    /// declared one, otherwise a digest of the URL.
    pub fn external_id(&self) -> String {
        if self.product_group_id.is_empty() {
            format!("{:x}", md5::compute(&self.url))
        } else {
            self.product_group_id.clone()
        }
    }
}

/// Why a URL produced no product without failing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    BrandFiltered { brand: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BrandFiltered { brand } => write!(f, "brand {brand:?} is not a target brand"),
        }
    }
}

/// Result for one input URL of a batch
#[derive(Debug)]
pub enum ScrapeOutcome {
    Success {
        url: String,
        product: CanonicalProduct,
    },
    Skipped {
        url: String,
        reason: SkipReason,
    },
    Failed {
        url: String,
        error: ScrapeError,
    },
}

impl ScrapeOutcome {
    /// The input URL this outcome belongs to
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Skipped { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    pub fn product(&self) -> Option<&CanonicalProduct> {
        match self {
            Self::Success { product, .. } => Some(product),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ScrapeError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(price: Option<f64>) -> ProductVariant {
        ProductVariant {
            sku: "sku".into(),
            name: "Sneaker | 42".into(),
            size: "42".into(),
            image: String::new(),
            offer: Offer {
                url: "https://shop.test/p".into(),
                availability: Availability::InStock,
                price_specification: price
                    .map(|price| PriceSpecification {
                        price,
                        currency: Some("USD".into()),
                    })
                    .into_iter()
                    .collect(),
            },
            needs_revalidation: false,
        }
    }

    fn product(variants: Vec<ProductVariant>) -> CanonicalProduct {
        CanonicalProduct {
            name: "Air Force 1".into(),
            brand: "Nike".into(),
            description: String::new(),
            url: "https://shop.test/p".into(),
            color: String::new(),
            product_group_id: String::new(),
            images: Vec::new(),
            variants,
            source: ExtractionSource::StructuredData,
        }
    }

    #[test]
    fn price_range_tracks_variant_list() {
        let mut p = product(vec![variant(Some(190.0)), variant(Some(120.0)), variant(None)]);
        assert_eq!(p.price_range(), (Some(120.0), Some(190.0)));

        p.variants.push(variant(Some(450.0)));
        assert_eq!(p.price_range(), (Some(120.0), Some(450.0)));

        p.variants.retain(|v| v.offer.price() != Some(120.0));
        assert_eq!(p.price_range(), (Some(190.0), Some(450.0)));
    }

    #[test]
    fn price_range_is_empty_without_real_prices() {
        assert_eq!(product(Vec::new()).price_range(), (None, None));
        assert_eq!(
            product(vec![variant(None), variant(Some(0.0))]).price_range(),
            (None, None)
        );
    }

    #[test]
    fn availability_accepts_urls_and_names() {
        assert_eq!(
            Availability::parse("https://schema.org/OutOfStock"),
            Availability::OutOfStock
        );
        assert_eq!(Availability::parse("InStock"), Availability::InStock);
        assert_eq!(Availability::parse("http://schema.org/PreOrder"), Availability::PreOrder);
        assert_eq!(
            Availability::parse("Reserved"),
            Availability::Unknown("Reserved".into())
        );
    }

    #[test]
    fn external_id_prefers_product_group() {
        let mut p = product(Vec::new());
        assert_eq!(p.external_id(), format!("{:x}", md5::compute("https://shop.test/p")));
        p.product_group_id = "15252505".into();
        assert_eq!(p.external_id(), "15252505");
    }
}
