//! Embedded structured-data (JSON-LD) extraction

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::text::clean_text;

static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[type]").expect("valid script selector"));

const JSON_LD_MIME: &str = "application/ld+json";

/// A product-group block parsed out of the page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub brand: Option<BrandRef>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub color: String,
    #[serde(default, rename = "productGroupID", deserialize_with = "lenient_string")]
    pub product_group_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub image: OneOrMany<ImageRef>,
    #[serde(default, deserialize_with = "nullable")]
    pub has_variant: Vec<StructuredVariant>,
}

impl StructuredRecord {
    pub fn brand_name(&self) -> &str {
        match &self.brand {
            Some(BrandRef::Name(name)) | Some(BrandRef::Object { name }) => name.trim(),
            None => "",
        }
    }

    fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.brand_name().is_empty() {
            missing.push("brand");
        }
        if self.description.trim().is_empty() {
            missing.push("description");
        }
        missing
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BrandRef {
    Name(String),
    Object {
        #[serde(default, deserialize_with = "lenient_string")]
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    Object {
        #[serde(default, rename = "contentUrl", alias = "url", deserialize_with = "lenient_string")]
        content_url: String,
        #[serde(default, deserialize_with = "lenient_string")]
        description: String,
    },
}

impl ImageRef {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Object { content_url: url, .. } => url.trim(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Url(_) => "",
            Self::Object { description, .. } => description,
        }
    }
}

/// JSON-LD allows a single value wherever a list is expected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Many(items) => items,
            Self::One(item) => std::slice::from_ref(item),
        }
    }

    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredVariant {
    #[serde(default, deserialize_with = "lenient_string")]
    pub sku: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: String,
    #[serde(default, deserialize_with = "nullable")]
    pub image: OneOrMany<ImageRef>,
    #[serde(default, deserialize_with = "nullable")]
    pub offers: OneOrMany<StructuredOffer>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredOffer {
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub availability: String,
    #[serde(default, deserialize_with = "nullable")]
    pub price_specification: OneOrMany<StructuredPrice>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPrice {
    /// Kept raw; numbers and numeric strings are both seen in the wild
    #[serde(default)]
    pub price: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub price_currency: String,
}

/// Outcome of looking for structured data. `Missing` is an expected,
/// frequent path that sends the caller to the selector fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredLookup {
    Found(Box<StructuredRecord>),
    Missing { reason: String },
}

impl StructuredLookup {
    pub fn found(self) -> Option<StructuredRecord> {
        match self {
            Self::Found(record) => Some(*record),
            Self::Missing { .. } => None,
        }
    }
}

/// Finds the first well-formed block whose `@type` matches `type_tag`.
#[derive(Debug, Clone)]
pub struct StructuredDataExtractor {
    type_tag: String,
}

impl StructuredDataExtractor {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
        }
    }

    pub fn extract(&self, markup: &str) -> StructuredLookup {
        let document = Html::parse_document(markup);
        let blocks: Vec<String> = document
            .select(&SCRIPT_SELECTOR)
            .filter(|script| {
                script
                    .value()
                    .attr("type")
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(JSON_LD_MIME))
            })
            .map(|script| script.text().collect::<String>())
            .collect();

        if blocks.is_empty() {
            return StructuredLookup::Missing {
                reason: "no JSON-LD blocks in markup".to_string(),
            };
        }

        let mut problems = Vec::new();
        for (index, raw) in blocks.iter().enumerate() {
            let value: Value = match serde_json::from_str(raw.trim()) {
                Ok(value) => value,
                Err(e) => {
                    warn!(block = index, error = %e, "JSON-LD block is not valid JSON");
                    problems.push(format!("block {index}: {e}"));
                    continue;
                }
            };

            for candidate in candidates(&value).filter(|v| has_type(v, &self.type_tag)) {
                match StructuredRecord::deserialize(candidate) {
                    Ok(mut record) => {
                        record.name = clean_text(&record.name);
                        record.description = clean_text(&record.description);
                        let missing = record.missing_required_fields();
                        if missing.is_empty() {
                            debug!(block = index, "structured product data found");
                            return StructuredLookup::Found(Box::new(record));
                        }
                        problems.push(format!(
                            "block {index}: missing {}",
                            missing.join(", ")
                        ));
                    }
                    Err(e) => problems.push(format!("block {index}: {e}")),
                }
            }
        }

        StructuredLookup::Missing {
            reason: if problems.is_empty() {
                format!("no {} block among {} JSON-LD blocks", self.type_tag, blocks.len())
            } else {
                problems.join("; ")
            },
        }
    }
}

/// Objects worth checking: the value itself, array members and `@graph`
/// members.
fn candidates(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter().flat_map(candidates)),
        Value::Object(map) => {
            let graph = map
                .get("@graph")
                .into_iter()
                .flat_map(candidates);
            Box::new(std::iter::once(value).chain(graph))
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn has_type(value: &Value, tag: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == tag,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(tag)),
        _ => false,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRODUCT_GROUP: &str = r#"
        <html><head>
        <script type="application/ld+json">{"@type": "BreadcrumbList", "itemListElement": []}</script>
        <script type="application/ld+json">
        {
            "@context": "https://schema.org",
            "@type": "ProductGroup",
            "name": "Nike Air Force 1 x Supreme",
            "brand": {"@type": "Brand", "name": "Nike"},
            "color": "white",
            "description": "Low-top   <b>leather</b> sneakers",
            "productGroupID": 15252505,
            "image": [{"contentUrl": "https://cdn.test/1.jpg", "description": "Front"}],
            "hasVariant": [{
                "sku": "test-123",
                "name": "Nike Air Force 1 | 6",
                "size": "6",
                "image": "https://cdn.test/1.jpg",
                "offers": {
                    "url": "https://shop.test/p?size=6",
                    "availability": "https://schema.org/InStock",
                    "priceSpecification": [{"price": 190, "priceCurrency": "USD"}]
                }
            }],
            "url": "https://www.farfetch.com/shopping/men/nike-item-15252505.aspx"
        }
        </script>
        </head><body><h1>Nike</h1></body></html>
    "#;

    fn extractor() -> StructuredDataExtractor {
        StructuredDataExtractor::new("ProductGroup")
    }

    #[test]
    fn finds_product_group_among_other_blocks() {
        let record = extractor().extract(PRODUCT_GROUP).found().expect("record");
        assert_eq!(record.name, "Nike Air Force 1 x Supreme");
        assert_eq!(record.brand_name(), "Nike");
        assert_eq!(record.description, "Low-top leather sneakers");
        assert_eq!(record.product_group_id, "15252505");
        assert_eq!(record.image.first().map(ImageRef::url), Some("https://cdn.test/1.jpg"));
        assert_eq!(record.has_variant.len(), 1);
        let offer = record.has_variant[0].offers.first().unwrap();
        assert_eq!(offer.price_specification.first().unwrap().price, serde_json::json!(190));
    }

    #[test]
    fn reports_missing_without_blocks() {
        let lookup = extractor().extract("<html><body><h1>Plain page</h1></body></html>");
        assert!(matches!(lookup, StructuredLookup::Missing { .. }));
    }

    #[test]
    fn skips_broken_json_and_wrong_types() {
        let markup = r#"
            <script type="application/ld+json">{ not json</script>
            <script type="application/ld+json">{"@type": "Organization", "name": "Shop"}</script>
        "#;
        let StructuredLookup::Missing { reason } = extractor().extract(markup) else {
            panic!("expected missing");
        };
        assert!(reason.contains("block 0"));
    }

    #[test]
    fn incomplete_product_group_is_not_well_formed() {
        let markup = r#"<script type="application/ld+json">
            {"@type": "ProductGroup", "name": "Nameless brand", "description": "x"}
        </script>"#;
        let StructuredLookup::Missing { reason } = extractor().extract(markup) else {
            panic!("expected missing");
        };
        assert!(reason.contains("brand"));
    }

    #[test]
    fn looks_inside_graph_and_arrays() {
        let markup = r#"<script type="application/ld+json">
            [{"@graph": [{"@type": ["ProductGroup"], "name": "Dunk Low",
              "brand": "Nike", "description": "Retro", "hasVariant": null}]}]
        </script>"#;
        let record = extractor().extract(markup).found().expect("record");
        assert_eq!(record.name, "Dunk Low");
        assert_eq!(record.brand_name(), "Nike");
        assert!(record.has_variant.is_empty());
    }
}
