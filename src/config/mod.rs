//! Per-run scraper configuration
//!
//! Values come from `SCRAPER_*` environment variables (a `.env` file is
//! honored through `dotenvy`). Everything except the proxy cursor is read-only
//! once the run starts; the cursor is atomic so an `Arc<ScraperConfig>` can be
//! shared between independently running batches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::ScrapeError;
use crate::trajectory::{DeviceClass, Viewport};

mod user_agents;

pub use user_agents::{DEFAULT_USER_AGENT, DESKTOP_USER_AGENTS, MOBILE_USER_AGENTS};

/// A proxy entry split into the address handed to the browser and any
/// inline credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub server: String,
    pub credentials: Option<(String, String)>,
}

impl ProxyEndpoint {
    /// Parses `scheme://[user:pass@]host:port`.
    pub fn parse(raw: &str) -> Result<Self, ScrapeError> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| ScrapeError::Configuration("proxy entry has no scheme".into()))?;

        let (credentials, host) = match rest.rsplit_once('@') {
            Some((auth, host)) => {
                let (user, pass) = auth.split_once(':').ok_or_else(|| {
                    ScrapeError::Configuration("proxy credentials must be user:pass".into())
                })?;
                (Some((user.to_string(), pass.to_string())), host)
            }
            None => (None, rest),
        };

        if host.is_empty() {
            return Err(ScrapeError::Configuration(format!(
                "proxy for scheme {scheme} has no host"
            )));
        }

        Ok(Self {
            server: format!("{scheme}://{host}"),
            credentials,
        })
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("server", &self.server)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

/// Round-robin position in the proxy list. Only ever moves forward.
#[derive(Debug, Default)]
pub struct ProxyCursor(AtomicUsize);

impl ProxyCursor {
    fn advance(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Clone for ProxyCursor {
    fn clone(&self) -> Self {
        Self(AtomicUsize::new(self.0.load(Ordering::Relaxed)))
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Site root, used for warm-up navigation and as the Referer
    pub base_url: String,
    pub navigation_timeout: Duration,
    /// Attempts per URL, including the first
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Bounds for the randomized settle delay before markup capture
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub visit_warmup_page: bool,
    pub rotate_user_agents: bool,
    pub use_mobile_ua: bool,
    pub user_agent: String,
    pub proxies: Vec<ProxyEndpoint>,
    pub proxy_cursor: ProxyCursor,
    /// Empty means every brand is accepted
    pub target_brands: Vec<String>,
    /// Cool-down between consecutive URLs of a batch
    pub item_delay: Duration,
    pub network_idle_timeout: Duration,
    pub run_deadline: Option<Duration>,
    /// Stop fetching after this many consecutive 403s
    pub max_consecutive_blocks: Option<u32>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.farfetch.com".to_string(),
            navigation_timeout: Duration::from_secs(90),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
            visit_warmup_page: true,
            rotate_user_agents: true,
            use_mobile_ua: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxies: Vec::new(),
            proxy_cursor: ProxyCursor::default(),
            target_brands: Vec::new(),
            item_delay: Duration::from_secs(2),
            network_idle_timeout: Duration::from_secs(30),
            run_deadline: None,
            max_consecutive_blocks: None,
        }
    }
}

impl ScraperConfig {
    /// Loads `.env` (if any) and reads `SCRAPER_*` variables.
    pub fn from_env() -> Result<Self, ScrapeError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScrapeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("SCRAPER_BASE_URL") {
            config.base_url = url;
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_NAVIGATION_TIMEOUT_MS")? {
            config.navigation_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&get, "SCRAPER_MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_RETRY_BASE_DELAY_MS")? {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_MIN_DELAY_MS")? {
            config.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_MAX_DELAY_MS")? {
            config.max_delay = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_flag(&get, "SCRAPER_VISIT_WARMUP_PAGE")? {
            config.visit_warmup_page = flag;
        }
        if let Some(flag) = parse_flag(&get, "SCRAPER_ROTATE_USER_AGENTS")? {
            config.rotate_user_agents = flag;
        }
        if let Some(flag) = parse_flag(&get, "SCRAPER_USE_MOBILE_UA")? {
            config.use_mobile_ua = flag;
        }
        if let Some(list) = get("SCRAPER_PROXIES") {
            config.proxies = split_list(&list)
                .iter()
                .map(|p| ProxyEndpoint::parse(p))
                .collect::<Result<_, _>>()?;
        }
        if let Some(list) = get("SCRAPER_TARGET_BRANDS") {
            config.target_brands = split_list(&list);
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_ITEM_DELAY_MS")? {
            config.item_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&get, "SCRAPER_NETWORK_IDLE_TIMEOUT_MS")? {
            config.network_idle_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&get, "SCRAPER_RUN_DEADLINE_SECS")? {
            config.run_deadline = Some(Duration::from_secs(secs));
        }
        if let Some(n) = parse_var::<u32>(&get, "SCRAPER_MAX_CONSECUTIVE_BLOCKS")? {
            config.max_consecutive_blocks = Some(n);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_retries == 0 {
            return Err(ScrapeError::Configuration(
                "SCRAPER_MAX_RETRIES must be at least 1".into(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(ScrapeError::Configuration(format!(
                "min delay {:?} exceeds max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            ScrapeError::Configuration(format!("base URL {:?} is invalid: {e}", self.base_url))
        })?;
        if parsed.host_str().is_none() {
            return Err(ScrapeError::Configuration(format!(
                "base URL {:?} has no host",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn device_class(&self) -> DeviceClass {
        if self.use_mobile_ua {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn viewport(&self) -> Viewport {
        match self.device_class() {
            DeviceClass::Mobile => Viewport::MOBILE,
            DeviceClass::Desktop => Viewport::DESKTOP,
        }
    }

    /// Picks a user agent from the pool matching the device class, or the
    /// fixed one when rotation is off.
    pub fn pick_user_agent<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        if !self.rotate_user_agents {
            return self.user_agent.clone();
        }
        let pool = if self.use_mobile_ua {
            MOBILE_USER_AGENTS
        } else {
            DESKTOP_USER_AGENTS
        };
        pool.choose(rng)
            .map_or_else(|| self.user_agent.clone(), |ua| (*ua).to_string())
    }

    /// Next proxy in round-robin order. The cursor only moves forward.
    pub fn next_proxy(&self) -> Option<&ProxyEndpoint> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.proxy_cursor.advance();
        self.proxies.get(index % self.proxies.len())
    }

    /// Uniform delay in `[min_delay, max_delay]`.
    pub fn random_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let low = self.min_delay.as_millis() as u64;
        let high = self.max_delay.as_millis() as u64;
        Duration::from_millis(rng.gen_range(low..=high))
    }

    /// Trimmed, case-insensitive allow-list check. An empty list or an empty
    /// brand always passes.
    pub fn accepts_brand(&self, brand: &str) -> bool {
        let brand = brand.trim();
        self.target_brands.is_empty()
            || brand.is_empty()
            || self
                .target_brands
                .iter()
                .any(|target| target.trim().eq_ignore_ascii_case(brand))
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ScrapeError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ScrapeError::Configuration(format!("{key}={raw:?}: {e}")))
        })
        .transpose()
}

fn parse_flag(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, ScrapeError> {
    get(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ScrapeError::Configuration(format!(
                "{key}={raw:?} is not a boolean"
            ))),
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
