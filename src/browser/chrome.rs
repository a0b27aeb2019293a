//! Chrome DevTools Protocol surface on top of `chromiumoxide`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ClickProbe, LaunchProfile, PageSurface, ProbeMatch, Rect, SurfaceLauncher};
use crate::trajectory::Point;

/// Launches a local Chrome/Chromium per session.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    /// Upper bound for a single DevTools command, navigation included
    pub request_timeout: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl SurfaceLauncher for ChromeLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn PageSurface>> {
        let mut builder = BrowserConfig::builder()
            .window_size(profile.viewport.width, profile.viewport.height)
            .request_timeout(self.request_timeout)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--lang=en-US")
            .arg(format!("--user-agent={}", profile.user_agent));

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(proxy) = &profile.proxy {
            if proxy.credentials.is_some() {
                warn!(
                    server = %proxy.server,
                    "proxy credentials are not forwarded to Chrome; use an IP-allowlisted proxy"
                );
            }
            builder = builder.arg(format!("--proxy-server={}", proxy.server));
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("browser config error: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(e).context("failed to open page");
            }
        };

        info!(
            width = profile.viewport.width,
            height = profile.viewport.height,
            device = ?profile.device,
            "browser launched"
        );

        Ok(Box::new(ChromeSurface {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
        }))
    }
}

/// Shape of the element lookup's result; `index` is -1 when nothing matched
#[derive(Debug, Deserialize)]
struct LocatedElement {
    index: i64,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub struct ChromeSurface {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeSurface {
    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let value = self.page.evaluate(script).await?.into_value::<T>()?;
        Ok(value)
    }

    async fn mouse(&self, event: DispatchMouseEventParams) -> Result<()> {
        self.page.execute(event).await?;
        Ok(())
    }
}

#[async_trait]
impl PageSurface for ChromeSurface {
    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await?;
        Ok(())
    }

    async fn block_urls(&self, patterns: &[String]) -> Result<()> {
        self.page
            .execute(SetBlockedUrLsParams::new(patterns.to_vec()))
            .await?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await?;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(json!(headers))))
            .await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<Option<u16>> {
        self.page.goto(url).await?;
        // Status of the main document as the page itself saw it
        let status: i64 = self
            .evaluate(
                r#"(() => {
                    const nav = performance.getEntriesByType('navigation')[0];
                    return nav && nav.responseStatus ? nav.responseStatus : 0;
                })()"#
                    .to_string(),
            )
            .await?;
        debug!(url, status, "navigation finished");
        Ok(u16::try_from(status).ok().filter(|s| *s > 0))
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool> {
        let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let script = format!(
            r#"(async () => {{
                const timeoutMs = {timeout_ms};
                const idleMs = 500;
                const interval = 100;
                const start = Date.now();
                const count = () => {{
                    try {{ return performance.getEntriesByType('resource').length; }} catch (_) {{ return 0; }}
                }};
                let last = count();
                let stable = 0;
                while (Date.now() - start < timeoutMs) {{
                    await new Promise(r => setTimeout(r, interval));
                    const now = count();
                    if (document.readyState === 'complete' && now === last) {{
                        stable += interval;
                        if (stable >= idleMs) return true;
                    }} else {{
                        stable = 0;
                    }}
                    last = now;
                }}
                return false;
            }})()"#
        );
        self.evaluate(script).await
    }

    async fn locate_first_visible(&self, probes: &[ClickProbe]) -> Result<Option<ProbeMatch>> {
        let probes: Vec<_> = probes
            .iter()
            .map(|probe| match probe {
                ClickProbe::Css(css) => json!({ "css": css }),
                ClickProbe::ButtonText(text) => json!({ "text": text.to_lowercase() }),
            })
            .collect();
        let script = format!(
            r#"(() => {{
                const probes = {probes};
                const visible = (el) => {{
                    const rect = el.getBoundingClientRect();
                    const style = window.getComputedStyle(el);
                    return rect.width > 0 && rect.height > 0
                        && style.visibility !== 'hidden' && style.display !== 'none';
                }};
                const inView = (rect) => rect.top >= 0 && rect.left >= 0
                    && rect.bottom <= window.innerHeight && rect.right <= window.innerWidth;
                for (let i = 0; i < probes.length; i++) {{
                    const probe = probes[i];
                    let candidates = [];
                    try {{
                        candidates = probe.css
                            ? Array.from(document.querySelectorAll(probe.css))
                            : Array.from(document.querySelectorAll('button, [role="button"]'))
                                .filter(b => (b.innerText || '').trim().toLowerCase() === probe.text);
                    }} catch (_) {{
                        continue;
                    }}
                    const hit = candidates.find(visible);
                    if (hit) {{
                        if (!inView(hit.getBoundingClientRect())) {{
                            hit.scrollIntoView({{ block: 'center', inline: 'center' }});
                        }}
                        const rect = hit.getBoundingClientRect();
                        return {{ index: i, x: rect.x, y: rect.y, width: rect.width, height: rect.height }};
                    }}
                }}
                return {{ index: -1, x: 0, y: 0, width: 0, height: 0 }};
            }})()"#,
            probes = serde_json::Value::Array(probes)
        );
        let found: LocatedElement = self.evaluate(script).await?;
        Ok(usize::try_from(found.index).ok().map(|index| ProbeMatch {
            index,
            rect: Rect {
                x: found.x,
                y: found.y,
                width: found.width,
                height: found.height,
            },
        }))
    }

    async fn move_pointer(&self, to: Point) -> Result<()> {
        self.mouse(DispatchMouseEventParams::new(
            DispatchMouseEventType::MouseMoved,
            to.x,
            to.y,
        ))
        .await
    }

    async fn click(&self, at: Point) -> Result<()> {
        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let event = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(at.x)
                .y(at.y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(|e| anyhow!("invalid click event: {e}"))?;
            self.mouse(event).await?;
        }
        Ok(())
    }

    async fn scroll(&self, at: Point, delta_y: f64) -> Result<()> {
        let event = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(at.x)
            .y(at.y)
            .delta_x(0.0)
            .delta_y(delta_y)
            .build()
            .map_err(|e| anyhow!("invalid wheel event: {e}"))?;
        self.mouse(event).await
    }

    async fn content(&self) -> Result<String> {
        Ok(self.page.content().await?)
    }

    async fn close(&mut self) -> Result<()> {
        let result = match self.browser.lock().await.take() {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                if let Err(e) = browser.wait().await {
                    debug!(error = %e, "browser process did not exit cleanly");
                }
                closed.context("failed to close browser")
            }
            None => Ok(()),
        };
        self.handler.abort();
        result
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
