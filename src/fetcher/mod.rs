//! Fetches rendered product pages through a disguised browser session

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::behavior::{HumanBehaviorSimulator, PageKind};
use crate::browser::stealth::{BROADENED_HEADERS, CONSENT_PROBES, POPUP_PROBES};
use crate::browser::{ClickProbe, FetchSession, LaunchProfile, SurfaceLauncher};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::RawPage;
use crate::retry::RetryPolicy;

const WARMUP_DWELL: Duration = Duration::from_secs(2);
const CONSENT_SETTLE: Duration = Duration::from_secs(1);
const POPUP_SETTLE: Duration = Duration::from_millis(500);
const USER_AGENT_DRAWS: usize = 8;

/// Owns one [`FetchSession`] for the length of a batch and turns URLs into
/// [`RawPage`]s, retrying transient failures.
pub struct PageFetcher {
    config: Arc<ScraperConfig>,
    policy: RetryPolicy,
    session: FetchSession,
    simulator: HumanBehaviorSimulator,
    rng: StdRng,
}

impl PageFetcher {
    /// Launches the browser with a user agent and proxy picked from the
    /// configuration.
    pub async fn launch(
        launcher: &dyn SurfaceLauncher,
        config: Arc<ScraperConfig>,
    ) -> Result<Self, ScrapeError> {
        let mut rng = StdRng::from_entropy();
        let profile = LaunchProfile {
            user_agent: config.pick_user_agent(&mut rng),
            viewport: config.viewport(),
            device: config.device_class(),
            proxy: config.next_proxy().cloned(),
        };
        info!(
            user_agent = %profile.user_agent,
            proxy = ?profile.proxy,
            "starting fetch session"
        );

        let session = FetchSession::launch(launcher, profile).await.map_err(|e| {
            ScrapeError::navigation(&config.base_url, None, format!("browser launch failed: {e:#}"))
        })?;

        Ok(Self {
            policy: RetryPolicy::from_config(&config),
            config,
            session,
            simulator: HumanBehaviorSimulator::new(),
            rng,
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_simulator(mut self, simulator: HumanBehaviorSimulator) -> Self {
        self.simulator = simulator;
        self
    }

    /// Fetches `url`, retrying per the policy. The last attempt's error is
    /// returned once attempts run out.
    pub async fn fetch(&mut self, url: &str) -> Result<RawPage, ScrapeError> {
        info!(url, "fetching page");
        let policy = self.policy;
        let target = url.to_string();
        policy
            .run(self, move |fetcher, attempt| {
                let target = target.clone();
                Box::pin(async move { fetcher.attempt(&target, attempt).await })
            })
            .await
    }

    /// Tears the session down.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("closing fetch session");
        self.session.close().await
    }

    async fn attempt(&mut self, url: &str, attempt: u32) -> Result<RawPage, ScrapeError> {
        debug!(url, attempt = attempt + 1, "starting attempt");

        self.session
            .configure()
            .await
            .map_err(|e| ScrapeError::navigation(url, None, format!("session setup failed: {e:#}")))?;

        if attempt == 0 && self.config.visit_warmup_page && !same_page(url, &self.config.base_url) {
            self.warm_up().await;
        }

        let base_url = self.config.base_url.clone();
        if let Err(e) = self.session.merge_headers([("Referer", base_url.as_str())]).await {
            warn!(url, error = %e, "could not set Referer");
        }

        let mut status = self.navigate(url).await?;
        if status == 403 {
            warn!(url, attempt = attempt + 1, "HTTP 403, trying alternate strategy");
            status = self.blocked_fallback(url).await?;
        }
        if status >= 400 {
            return Err(ScrapeError::navigation(
                url,
                Some(status),
                format!("server answered HTTP {status}"),
            ));
        }

        self.wait_for_idle(url).await;
        self.dismiss_overlays().await;
        self.simulator
            .simulate(&mut self.session, PageKind::Product)
            .await;

        let settle = self.config.random_delay(&mut self.rng);
        debug!(url, delay_ms = settle.as_millis() as u64, "settling before capture");
        tokio::time::sleep(settle).await;

        let markup = self
            .session
            .surface()
            .content()
            .await
            .map_err(|e| ScrapeError::navigation(url, Some(status), format!("reading content failed: {e:#}")))?;

        info!(url, status, bytes = markup.len(), "page fetched");
        Ok(RawPage {
            url: url.to_string(),
            status,
            markup,
            fetched_at: Utc::now(),
        })
    }

    /// Navigates under the configured timeout and returns the status.
    async fn navigate(&self, url: &str) -> Result<u16, ScrapeError> {
        let timeout = self.config.navigation_timeout;
        match tokio::time::timeout(timeout, self.session.surface().navigate(url)).await {
            Err(_) => Err(ScrapeError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(ScrapeError::navigation(url, None, format!("{e:#}"))),
            Ok(Ok(None)) => Err(ScrapeError::navigation(url, None, "no response received")),
            Ok(Ok(Some(status))) => {
                debug!(url, status, "navigation answered");
                Ok(status)
            }
        }
    }

    /// Visits the site root like a person arriving from the front page.
    /// Nothing here fails the fetch.
    async fn warm_up(&mut self) {
        let base_url = self.config.base_url.clone();
        debug!(url = %base_url, "warming up session");
        match self.navigate(&base_url).await {
            Ok(status) if status < 400 => {
                tokio::time::sleep(WARMUP_DWELL).await;
                self.simulator
                    .simulate(&mut self.session, PageKind::Landing)
                    .await;
            }
            Ok(status) => warn!(url = %base_url, status, "warm-up page refused"),
            Err(e) => warn!(url = %base_url, error = %e, "warm-up failed"),
        }
    }

    /// Rotates the user agent, broadens headers, pauses and navigates once
    /// more. Returns the second navigation's status.
    async fn blocked_fallback(&mut self, url: &str) -> Result<u16, ScrapeError> {
        let user_agent = self.fresh_user_agent();
        if let Err(e) = self.session.set_user_agent(&user_agent).await {
            warn!(url, error = %e, "user agent rotation failed");
        }
        if let Err(e) = self
            .session
            .merge_headers(BROADENED_HEADERS.iter().copied())
            .await
        {
            warn!(url, error = %e, "header update failed");
        }

        let pause = Duration::from_millis(self.rng.gen_range(3000..=6000));
        debug!(url, delay_ms = pause.as_millis() as u64, "pausing before retrying blocked page");
        tokio::time::sleep(pause).await;

        let status = self.navigate(url).await?;
        info!(url, status, "alternate strategy navigation finished");
        Ok(status)
    }

    /// A pool agent other than the current one, when the pool allows it.
    fn fresh_user_agent(&mut self) -> String {
        let current = self.session.user_agent().to_string();
        let mut candidate = self.config.pick_user_agent(&mut self.rng);
        for _ in 0..USER_AGENT_DRAWS {
            if candidate != current {
                break;
            }
            candidate = self.config.pick_user_agent(&mut self.rng);
        }
        candidate
    }

    async fn wait_for_idle(&self, url: &str) {
        let bound = self.config.network_idle_timeout;
        // The surface bounds itself too; this guards against it hanging.
        let waited = tokio::time::timeout(
            bound + Duration::from_secs(1),
            self.session.surface().wait_for_network_idle(bound),
        )
        .await;
        match waited {
            Ok(Ok(true)) => debug!(url, "network idle"),
            Ok(Ok(false)) | Err(_) => debug!(url, "network still busy, continuing"),
            Ok(Err(e)) => warn!(url, error = %e, "network idle wait failed"),
        }
    }

    async fn dismiss_overlays(&mut self) {
        self.dismiss("cookie banner", CONSENT_PROBES, CONSENT_SETTLE)
            .await;
        self.dismiss("popup", POPUP_PROBES, POPUP_SETTLE).await;
    }

    /// Clicks the first visible match of `probes` with the pointer, then
    /// lets the page settle. Failures are logged only.
    async fn dismiss(&mut self, what: &str, probes: &[ClickProbe], settle: Duration) {
        let found = match self.session.surface().locate_first_visible(probes).await {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "{what} check failed");
                return;
            }
        };
        let matched = probes.get(found.index);
        match self
            .simulator
            .click_element(&mut self.session, found.rect)
            .await
        {
            Ok(()) => {
                info!(?matched, "{what} dismissed");
                tokio::time::sleep(settle).await;
            }
            Err(e) => warn!(?matched, error = %e, "{what} click failed"),
        }
    }
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("policy", &self.policy)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn same_page(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Rect;
    use crate::browser::fake::{Navigation, ScriptedBrowser};

    const BASE: &str = "https://shop.test";
    const PRODUCT: &str = "https://shop.test/p/1";

    fn config(max_retries: u32) -> Arc<ScraperConfig> {
        Arc::new(ScraperConfig {
            base_url: BASE.into(),
            max_retries,
            navigation_timeout: Duration::from_secs(5),
            retry_base_delay: Duration::from_millis(100),
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..ScraperConfig::default()
        })
    }

    async fn fetcher(browser: &ScriptedBrowser, max_retries: u32) -> PageFetcher {
        PageFetcher::launch(browser, config(max_retries))
            .await
            .unwrap()
            .with_simulator(HumanBehaviorSimulator::with_seed(1))
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_markup_after_warm_up() {
        let browser = ScriptedBrowser::new();
        browser.serve(PRODUCT, "<html><h1>Dunk</h1></html>");
        let mut fetcher = fetcher(&browser, 3).await;

        let page = fetcher.fetch(PRODUCT).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.markup, "<html><h1>Dunk</h1></html>");

        let log = browser.log.lock().unwrap();
        assert_eq!(log.navigations, vec![BASE.to_string(), PRODUCT.to_string()]);
        assert_eq!(log.init_scripts.len(), 2);
        assert_eq!(log.header_sets.last().unwrap()["Referer"], BASE);
        assert!(!log.pointer_moves.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_response_triggers_alternate_strategy() {
        let browser = ScriptedBrowser::new();
        browser.script(PRODUCT, [Navigation::Status(403), Navigation::Status(200)]);
        let mut fetcher = fetcher(&browser, 3).await;

        let page = fetcher.fetch(PRODUCT).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(browser.navigations_to(PRODUCT), 2);

        let log = browser.log.lock().unwrap();
        // launch-time agent plus the rotated one
        assert_eq!(log.user_agents.len(), 2);
        assert_ne!(log.user_agents[0], log.user_agents[1]);
        assert_eq!(fetcher.session.user_agent(), log.user_agents[1]);
        assert_eq!(log.header_sets.last().unwrap()["Accept-Language"], "en-US,en;q=0.5");
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_block_exhausts_attempts() {
        let browser = ScriptedBrowser::new();
        browser.script(PRODUCT, std::iter::repeat_n(Navigation::Status(403), 6));
        let mut fetcher = fetcher(&browser, 3).await;

        let err = fetcher.fetch(PRODUCT).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(browser.navigations_to(PRODUCT), 6);
        // warm-up only on the first attempt
        assert_eq!(browser.navigations_to(BASE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_navigation_surfaces_timeout() {
        let browser = ScriptedBrowser::new();
        browser.script(PRODUCT, [Navigation::Hang, Navigation::Hang]);
        let mut fetcher = fetcher(&browser, 2).await;

        let err = fetcher.fetch(PRODUCT).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Timeout { timeout_ms: 5000, .. }));
        assert_eq!(browser.navigations_to(PRODUCT), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_transient_server_error() {
        let browser = ScriptedBrowser::new();
        browser.script(
            PRODUCT,
            [Navigation::Status(502), Navigation::Fail("net::ERR_CONNECTION_RESET")],
        );
        let mut fetcher = fetcher(&browser, 3).await;

        let page = fetcher.fetch(PRODUCT).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(browser.navigations_to(PRODUCT), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_visible_consent_banner_with_the_pointer() {
        let browser = ScriptedBrowser::new();
        let banner = Rect {
            x: 800.0,
            y: 980.0,
            width: 160.0,
            height: 48.0,
        };
        browser.log.lock().unwrap().visible_element = Some((0, banner));
        let mut fetcher = fetcher(&browser, 1).await;

        fetcher.fetch(PRODUCT).await.unwrap();

        let log = browser.log.lock().unwrap();
        // consent and popup probes both hit
        assert_eq!(log.clicks.len(), 2);
        for (at, moves_before) in &log.clicks {
            assert!(banner.contains(*at));
            assert!(*moves_before > 0);
            assert_eq!(log.pointer_moves[moves_before - 1], *at);
        }
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let browser = ScriptedBrowser {
            fail_launch: true,
            ..ScriptedBrowser::new()
        };
        let err = PageFetcher::launch(&browser, config(1)).await.unwrap_err();
        assert!(err.to_string().contains("browser launch failed"));
    }

    #[tokio::test]
    async fn close_tears_down_surface() {
        let browser = ScriptedBrowser::new();
        let fetcher = fetcher(&browser, 1).await;
        fetcher.close().await.unwrap();
        assert_eq!(browser.log.lock().unwrap().closed, 1);
    }
}
