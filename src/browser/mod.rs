//! The navigable page a fetch session drives, and the session around it

pub mod chrome;
pub mod stealth;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use chrome::ChromeLauncher;
pub use stealth::{ClickProbe, NavigatorIdentity};

use crate::config::ProxyEndpoint;
use crate::trajectory::{DeviceClass, Point, Viewport};

/// One live, navigable page. Implementations only move bytes; retry,
/// timing and anti-detection policy live with the callers.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Script evaluated in every new document before page scripts run
    async fn add_init_script(&self, script: &str) -> Result<()>;

    /// Requests whose URL matches any wildcard pattern are dropped
    async fn block_urls(&self, patterns: &[String]) -> Result<()>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    /// Replaces the full set of extra request headers
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    /// Loads `url` and returns the main document's HTTP status, if any
    /// response arrived.
    async fn navigate(&self, url: &str) -> Result<Option<u16>>;

    /// Waits until the network looks quiet; `false` when `timeout` elapsed
    /// first.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool>;

    /// Finds the first visible element matched by `probes`, in order,
    /// scrolled into view. Nothing is clicked.
    async fn locate_first_visible(&self, probes: &[ClickProbe]) -> Result<Option<ProbeMatch>>;

    async fn move_pointer(&self, to: Point) -> Result<()>;

    /// Left-button press and release at `at`, as trusted input events.
    async fn click(&self, at: Point) -> Result<()>;

    /// Wheel scroll with the pointer at `at`; positive `delta_y` scrolls down.
    async fn scroll(&self, at: Point, delta_y: f64) -> Result<()>;

    /// Rendered markup of the current document
    async fn content(&self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// Element bounds in viewport CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, point: Point) -> bool {
        (self.x..=self.x + self.width).contains(&point.x)
            && (self.y..=self.y + self.height).contains(&point.y)
    }
}

/// The element one of several probes found
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeMatch {
    /// Position of the matching entry in the list
    pub index: usize,
    pub rect: Rect,
}

/// Everything a launcher needs to bring up a surface.
#[derive(Debug, Clone)]
pub struct LaunchProfile {
    pub user_agent: String,
    pub viewport: Viewport,
    pub device: DeviceClass,
    pub proxy: Option<ProxyEndpoint>,
}

#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn PageSurface>>;
}

/// One browser process and page plus the state a human visitor would carry
/// between requests. Owned by exactly one fetcher.
pub struct FetchSession {
    surface: Box<dyn PageSurface>,
    pointer: Point,
    user_agent: String,
    device: DeviceClass,
    viewport: Viewport,
    headers: BTreeMap<String, String>,
    configured: bool,
}

impl FetchSession {
    pub async fn launch(launcher: &dyn SurfaceLauncher, profile: LaunchProfile) -> Result<Self> {
        let surface = launcher.launch(&profile).await?;
        Ok(Self::new(surface, profile))
    }

    pub fn new(surface: Box<dyn PageSurface>, profile: LaunchProfile) -> Self {
        Self {
            surface,
            pointer: profile.viewport.center(),
            user_agent: profile.user_agent,
            device: profile.device,
            viewport: profile.viewport,
            headers: BTreeMap::new(),
            configured: false,
        }
    }

    pub fn surface(&self) -> &dyn PageSurface {
        self.surface.as_ref()
    }

    pub fn pointer(&self) -> Point {
        self.pointer
    }

    pub fn set_pointer(&mut self, pointer: Point) {
        self.pointer = pointer;
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Installs the stealth scripts, tracker blocking, the user agent and
    /// the baseline headers. Runs once per session.
    pub async fn configure(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }
        self.surface.add_init_script(stealth::STEALTH_SCRIPT).await?;
        let identity = NavigatorIdentity::for_user_agent(&self.user_agent);
        self.surface.add_init_script(&identity.init_script()).await?;
        self.surface
            .block_urls(&stealth::blocked_url_patterns())
            .await?;
        self.surface.set_user_agent(&self.user_agent).await?;
        self.merge_headers(stealth::BASELINE_HEADERS.iter().copied())
            .await?;
        self.configured = true;
        Ok(())
    }

    /// Switches the user agent along with the navigator properties that
    /// have to agree with it.
    pub async fn set_user_agent(&mut self, user_agent: &str) -> Result<()> {
        self.surface.set_user_agent(user_agent).await?;
        let identity = NavigatorIdentity::for_user_agent(user_agent);
        self.surface.add_init_script(&identity.init_script()).await?;
        self.user_agent = user_agent.to_string();
        Ok(())
    }

    /// Adds or overrides headers and pushes the merged set to the page.
    pub async fn merge_headers<'h>(
        &mut self,
        headers: impl IntoIterator<Item = (&'h str, &'h str)>,
    ) -> Result<()> {
        for (name, value) in headers {
            self.headers.insert(name.to_string(), value.to_string());
        }
        self.surface.set_extra_headers(&self.headers).await
    }

    pub async fn close(mut self) -> Result<()> {
        self.surface.close().await
    }
}

impl std::fmt::Debug for FetchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("pointer", &self.pointer)
            .field("user_agent", &self.user_agent)
            .field("device", &self.device)
            .field("viewport", &self.viewport)
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedBrowser;
    use super::*;
    use crate::config::{DESKTOP_USER_AGENTS, MOBILE_USER_AGENTS};

    fn profile() -> LaunchProfile {
        LaunchProfile {
            user_agent: "UA-1".into(),
            viewport: Viewport::DESKTOP,
            device: DeviceClass::Desktop,
            proxy: None,
        }
    }

    #[tokio::test]
    async fn configure_runs_once_and_installs_countermeasures() {
        let browser = ScriptedBrowser::new();
        let mut session = FetchSession::launch(&browser, profile()).await.unwrap();
        assert_eq!(session.pointer(), Viewport::DESKTOP.center());

        session.configure().await.unwrap();
        session.configure().await.unwrap();

        let log = browser.log.lock().unwrap();
        // stealth script plus the navigator identity
        assert_eq!(log.init_scripts.len(), 2);
        assert_eq!(log.user_agents, vec!["UA-1"]);
        assert!(log.blocked.iter().any(|p| p.contains("doubleclick")));
        assert_eq!(log.header_sets.len(), 1);
        assert_eq!(log.header_sets[0]["DNT"], "1");
    }

    #[tokio::test]
    async fn navigator_identity_matches_each_user_agent() {
        let browser = ScriptedBrowser::new();
        let windows = DESKTOP_USER_AGENTS[1];
        let profile = LaunchProfile {
            user_agent: windows.into(),
            ..profile()
        };
        let mut session = FetchSession::launch(&browser, profile).await.unwrap();
        session.configure().await.unwrap();
        session.set_user_agent(MOBILE_USER_AGENTS[3]).await.unwrap();

        assert_eq!(session.user_agent(), MOBILE_USER_AGENTS[3]);
        let log = browser.log.lock().unwrap();
        assert!(log.init_scripts.iter().all(|s| !s.contains("MacIntel")));
        assert!(log.init_scripts[1].contains(r#""Win32""#));
        // the rotated agent's identity is installed last
        assert!(log.init_scripts.last().unwrap().contains(r#""Linux armv8l""#));
    }

    #[tokio::test]
    async fn header_merges_keep_earlier_values() {
        let browser = ScriptedBrowser::new();
        let mut session = FetchSession::launch(&browser, profile()).await.unwrap();
        session.configure().await.unwrap();
        session
            .merge_headers([("Referer", "https://shop.test")])
            .await
            .unwrap();

        assert_eq!(session.headers()["Referer"], "https://shop.test");
        assert_eq!(session.headers()["Sec-Fetch-Mode"], "navigate");

        session.close().await.unwrap();
        assert_eq!(browser.log.lock().unwrap().closed, 1);
    }
}
