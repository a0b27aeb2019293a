use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::assembler::Assembled;
use crate::browser::SurfaceLauncher;
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::extract::ProductParser;
use crate::fetcher::PageFetcher;
use crate::models::{RawPage, ScrapeOutcome};
use crate::storage::FsArchive;
use crate::traits::{ArchiveStore, PersistenceGateway, SiteAdapter, UpsertStatus};

/// Counts from handing a batch's products to a [`PersistenceGateway`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistSummary {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Runs one site's URL list through fetch, parse and assembly, one URL at a
/// time over a single browser session.
pub struct ScraperOrchestrator {
    adapter: Arc<dyn SiteAdapter>,
    launcher: Arc<dyn SurfaceLauncher>,
    config: Arc<ScraperConfig>,
    parser: ProductParser,
    archive: Option<Arc<dyn ArchiveStore>>,
}

impl ScraperOrchestrator {
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        launcher: Arc<dyn SurfaceLauncher>,
        config: Arc<ScraperConfig>,
    ) -> Result<Self, ScrapeError> {
        let parser = ProductParser::new(adapter.as_ref(), Arc::clone(&config))?;
        Ok(Self {
            adapter,
            launcher,
            config,
            parser,
            archive: None,
        })
    }

    /// Keep every fetched page's markup in `archive`.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn adapter(&self) -> &dyn SiteAdapter {
        self.adapter.as_ref()
    }

    /// One outcome per input URL, in input order. Never fails as a whole.
    pub async fn scrape_batch(&self, urls: &[String]) -> Vec<ScrapeOutcome> {
        if urls.is_empty() {
            return Vec::new();
        }
        info!(site = self.adapter.name(), urls = urls.len(), "starting batch");

        let mut fetcher =
            match PageFetcher::launch(self.launcher.as_ref(), Arc::clone(&self.config)).await {
                Ok(fetcher) => fetcher,
                Err(e) => {
                    error!(error = %e, "could not start browser session");
                    return urls
                        .iter()
                        .map(|url| ScrapeOutcome::Failed {
                            url: url.clone(),
                            error: ScrapeError::navigation(url, None, e.to_string()),
                        })
                        .collect();
                }
            };

        let outcomes = self.run(&mut fetcher, urls).await;

        if let Err(e) = fetcher.close().await {
            warn!(error = %e, "browser session did not close cleanly");
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            site = self.adapter.name(),
            total = outcomes.len(),
            succeeded,
            "batch finished"
        );
        outcomes
    }

    async fn run(&self, fetcher: &mut PageFetcher, urls: &[String]) -> Vec<ScrapeOutcome> {
        let deadline = self.config.run_deadline.map(|budget| Instant::now() + budget);
        let mut outcomes = Vec::with_capacity(urls.len());
        let mut consecutive_blocks = 0u32;

        for (index, url) in urls.iter().enumerate() {
            let (result, fetched) = if let Some(limit) = self
                .config
                .max_consecutive_blocks
                .filter(|limit| consecutive_blocks >= *limit)
            {
                let reason = format!("skipped after {limit} consecutive blocked pages");
                (Err(ScrapeError::navigation(url, Some(403), reason)), false)
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                (Err(self.deadline_error(url)), false)
            } else {
                let result = match deadline {
                    Some(d) => tokio::time::timeout_at(d, self.scrape_one(fetcher, url))
                        .await
                        .unwrap_or_else(|_| Err(self.deadline_error(url))),
                    None => self.scrape_one(fetcher, url).await,
                };
                (result, true)
            };

            let outcome = match result {
                Ok(Assembled::Product(product)) => {
                    info!(url = %url, name = %product.name, variants = product.variants.len(), "product scraped");
                    ScrapeOutcome::Success {
                        url: url.clone(),
                        product,
                    }
                }
                Ok(Assembled::Skipped(reason)) => {
                    info!(url = %url, %reason, "product skipped");
                    ScrapeOutcome::Skipped {
                        url: url.clone(),
                        reason,
                    }
                }
                Err(error) => {
                    warn!(url = %url, %error, "scrape failed");
                    ScrapeOutcome::Failed {
                        url: url.clone(),
                        error,
                    }
                }
            };

            if fetched {
                if outcome.error().is_some_and(ScrapeError::is_blocked) {
                    consecutive_blocks += 1;
                } else {
                    consecutive_blocks = 0;
                }
            }
            outcomes.push(outcome);

            if fetched && index + 1 < urls.len() && !self.config.item_delay.is_zero() {
                tokio::time::sleep(self.config.item_delay).await;
            }
        }

        outcomes
    }

    async fn scrape_one(&self, fetcher: &mut PageFetcher, url: &str) -> Result<Assembled, ScrapeError> {
        self.adapter.validate_ownership(url)?;
        let page = fetcher.fetch(url.trim()).await?;
        self.archive(&page).await;
        self.parser.parse(&page.markup, &page.url)
    }

    async fn archive(&self, page: &RawPage) {
        let Some(store) = &self.archive else {
            return;
        };
        let key = FsArchive::key_for(self.adapter.name(), &page.url, page.fetched_at);
        if let Err(e) = store.put(&key, page.markup.as_bytes()).await {
            warn!(url = %page.url, key = %key, error = %e, "archiving page failed");
        }
    }

    fn deadline_error(&self, url: &str) -> ScrapeError {
        ScrapeError::Timeout {
            url: url.to_string(),
            timeout_ms: self
                .config
                .run_deadline
                .unwrap_or(Duration::ZERO)
                .as_millis() as u64,
        }
    }

    /// Upserts every successful outcome under this orchestrator's site name.
    pub async fn persist(
        &self,
        gateway: &dyn PersistenceGateway,
        outcomes: &[ScrapeOutcome],
    ) -> PersistSummary {
        let mut summary = PersistSummary::default();
        for product in outcomes.iter().filter_map(ScrapeOutcome::product) {
            let external_id = product.external_id();
            match gateway
                .upsert(self.adapter.name(), &external_id, product)
                .await
            {
                Ok(UpsertStatus::Created) => {
                    info!(external_id = %external_id, name = %product.name, "new product stored");
                    summary.created += 1;
                }
                Ok(UpsertStatus::Updated) => summary.updated += 1,
                Err(e) => {
                    error!(external_id = %external_id, error = %e, "failed to store product");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::browser::fake::{Navigation, ScriptedBrowser};
    use crate::models::CanonicalProduct;
    use crate::scrapers::FarfetchAdapter;

    const BASE: &str = "https://www.farfetch.com";

    fn url(n: u32) -> String {
        format!("{BASE}/shopping/men/item-{n}.aspx")
    }

    fn markup(name: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type": "ProductGroup", "name": "{name}", "brand": "Nike",
              "description": "Sneakers", "hasVariant": [
                {{"sku": "{name}-9", "size": "9", "offers": {{"priceSpecification": [{{"price": 100}}]}}}}
            ]}}
            </script></head><body></body></html>"#
        )
    }

    fn config() -> ScraperConfig {
        ScraperConfig {
            base_url: BASE.into(),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(100),
            navigation_timeout: Duration::from_secs(5),
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            visit_warmup_page: false,
            ..ScraperConfig::default()
        }
    }

    fn orchestrator(browser: &ScriptedBrowser, config: ScraperConfig) -> ScraperOrchestrator {
        ScraperOrchestrator::new(
            Arc::new(FarfetchAdapter::new()),
            Arc::new(browser.clone()),
            Arc::new(config),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_url_does_not_affect_the_others() {
        let browser = ScriptedBrowser::new();
        browser.serve(&url(1), &markup("Dunk"));
        browser.serve(&url(3), &markup("Cortez"));
        browser.script(&url(2), [Navigation::Status(500), Navigation::Status(503)]);

        let started = Instant::now();
        let outcomes = orchestrator(&browser, config())
            .scrape_batch(&[url(1), url(2), url(3)])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].product().unwrap().name, "Dunk");
        assert_eq!(outcomes[1].error().unwrap().status(), Some(503));
        assert_eq!(outcomes[2].product().unwrap().name, "Cortez");
        assert_eq!(outcomes[1].url(), url(2));

        let log = browser.log.lock().unwrap();
        assert_eq!(log.launches, 1);
        assert_eq!(log.closed, 1);
        // two cool-downs between three URLs
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_urls_fail_validation_without_fetching() {
        let browser = ScriptedBrowser::new();
        let outcomes = orchestrator(&browser, config())
            .scrape_batch(&["https://evil.test/p".to_string(), "not a url".to_string()])
            .await;

        assert!(outcomes.iter().all(|o| matches!(
            o.error(),
            Some(ScrapeError::UrlValidation { .. })
        )));
        assert!(browser.log.lock().unwrap().navigations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn brand_filter_produces_skipped_outcome() {
        let browser = ScriptedBrowser::new();
        browser.serve(&url(1), &markup("Dunk"));
        let config = ScraperConfig {
            target_brands: vec!["Adidas".into()],
            ..config()
        };

        let outcomes = orchestrator(&browser, config).scrape_batch(&[url(1)]).await;
        assert!(matches!(outcomes[0], ScrapeOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn launch_failure_fails_every_url() {
        let browser = ScriptedBrowser {
            fail_launch: true,
            ..ScriptedBrowser::new()
        };
        let outcomes = orchestrator(&browser, config())
            .scrape_batch(&[url(1), url(2)])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.error().is_some()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_times_out_in_flight_and_remaining_urls() {
        let browser = ScriptedBrowser::new();
        browser.serve(&url(1), &markup("Dunk"));
        browser.script(&url(2), [Navigation::Hang]);
        let config = ScraperConfig {
            navigation_timeout: Duration::from_secs(600),
            run_deadline: Some(Duration::from_secs(120)),
            ..config()
        };

        let outcomes = orchestrator(&browser, config)
            .scrape_batch(&[url(1), url(2), url(3)])
            .await;

        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1].error(), Some(ScrapeError::Timeout { .. })));
        assert!(matches!(outcomes[2].error(), Some(ScrapeError::Timeout { .. })));
        assert_eq!(browser.navigations_to(&url(3)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_blocks_short_circuit_the_batch() {
        let browser = ScriptedBrowser::new();
        for n in 1..=2 {
            browser.script(&url(n), std::iter::repeat_n(Navigation::Status(403), 4));
        }
        let config = ScraperConfig {
            max_consecutive_blocks: Some(2),
            ..config()
        };

        let outcomes = orchestrator(&browser, config)
            .scrape_batch(&[url(1), url(2), url(3)])
            .await;

        assert!(outcomes.iter().all(|o| o.error().is_some_and(ScrapeError::is_blocked)));
        assert_eq!(browser.navigations_to(&url(3)), 0);
    }

    #[derive(Default)]
    struct MemoryArchive {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveStore for MemoryArchive {
        async fn put(&self, key: &str, _bytes: &[u8]) -> anyhow::Result<String> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(key.to_string())
        }
    }

    struct FailingArchive;

    #[async_trait]
    impl ArchiveStore for FailingArchive {
        async fn put(&self, _key: &str, _bytes: &[u8]) -> anyhow::Result<String> {
            Err(anyhow!("bucket unavailable"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pages_are_archived_and_archive_errors_are_ignored() {
        let browser = ScriptedBrowser::new();
        browser.serve(&url(1), &markup("Dunk"));

        let archive = Arc::new(MemoryArchive::default());
        let outcomes = orchestrator(&browser, config())
            .with_archive(archive.clone())
            .scrape_batch(&[url(1)])
            .await;
        assert!(outcomes[0].is_success());
        let keys = archive.keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("farfetch/"));

        let outcomes = orchestrator(&browser, config())
            .with_archive(Arc::new(FailingArchive))
            .scrape_batch(&[url(1)])
            .await;
        assert!(outcomes[0].is_success());
    }

    struct CountingGateway {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PersistenceGateway for CountingGateway {
        async fn upsert(
            &self,
            source: &str,
            external_id: &str,
            _product: &CanonicalProduct,
        ) -> anyhow::Result<UpsertStatus> {
            let mut seen = self.seen.lock().unwrap();
            let key = format!("{source}:{external_id}");
            if seen.contains(&key) {
                return Ok(UpsertStatus::Updated);
            }
            seen.push(key);
            Ok(UpsertStatus::Created)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persist_hands_products_to_gateway() {
        let browser = ScriptedBrowser::new();
        browser.serve(&url(1), &markup("Dunk"));
        let orchestrator = orchestrator(&browser, config());
        let gateway = CountingGateway {
            seen: Mutex::new(Vec::new()),
        };

        let outcomes = orchestrator.scrape_batch(&[url(1), url(1)]).await;
        let summary = orchestrator.persist(&gateway, &outcomes).await;
        assert_eq!(
            summary,
            PersistSummary {
                created: 1,
                updated: 1,
                failed: 0
            }
        );
        assert!(gateway.seen.lock().unwrap()[0].starts_with("farfetch:"));
    }
}
