//! Anti-detection material applied to every fetch session

/// Installed before any page script runs.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
    try { delete Object.getPrototypeOf(navigator).webdriver; } catch (_) {}

    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5], configurable: true });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });

    window.chrome = window.chrome || {};
    window.chrome.runtime = window.chrome.runtime || {};

    const permissions = window.navigator.permissions;
    if (permissions && permissions.query) {
        const originalQuery = permissions.query.bind(permissions);
        permissions.query = (parameters) => (
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }

    const spoof = (proto) => {
        if (!proto) return;
        const getParameter = proto.getParameter;
        proto.getParameter = function (parameter) {
            if (parameter === 37445) return 'Intel Inc.';
            if (parameter === 37446) return 'Intel Iris OpenGL Engine';
            return getParameter.apply(this, arguments);
        };
    };
    spoof(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
    spoof(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);
})();
"#;

/// What `navigator.platform` and `navigator.vendor` report in a real browser
/// sending a given user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigatorIdentity {
    pub platform: &'static str,
    pub vendor: &'static str,
}

impl NavigatorIdentity {
    pub fn for_user_agent(user_agent: &str) -> Self {
        // iOS and Android agents also mention "Mac OS X" and "Linux"
        let platform = if user_agent.contains("iPhone") {
            "iPhone"
        } else if user_agent.contains("iPad") {
            "iPad"
        } else if user_agent.contains("Android") {
            "Linux armv8l"
        } else if user_agent.contains("Windows") {
            "Win32"
        } else if user_agent.contains("Macintosh") {
            "MacIntel"
        } else if user_agent.contains("Linux") || user_agent.contains("X11") {
            "Linux x86_64"
        } else {
            "Win32"
        };

        // Every iOS browser is WebKit underneath
        let webkit_only = matches!(platform, "iPhone" | "iPad");
        let vendor = if webkit_only {
            "Apple Computer, Inc."
        } else if user_agent.contains("Firefox/") {
            ""
        } else if user_agent.contains("Chrome/") || user_agent.contains("Chromium/") {
            "Google Inc."
        } else if user_agent.contains("Safari/") {
            "Apple Computer, Inc."
        } else {
            "Google Inc."
        };

        Self { platform, vendor }
    }

    /// Init script overriding both properties. Installed again whenever the
    /// user agent changes; the newest definition wins.
    pub fn init_script(&self) -> String {
        let quote = |value: &str| serde_json::Value::from(value).to_string();
        format!(
            r#"(() => {{
    Object.defineProperty(navigator, 'platform', {{ get: () => {platform}, configurable: true }});
    Object.defineProperty(navigator, 'vendor', {{ get: () => {vendor}, configurable: true }});
}})();
"#,
            platform = quote(self.platform),
            vendor = quote(self.vendor),
        )
    }
}

/// Substrings of analytics and ad requests that are dropped. Everything else
/// loads normally.
pub const BLOCKED_URL_FRAGMENTS: &[&str] = &[
    "google-analytics",
    "googletagmanager",
    "facebook.com/tr",
    "doubleclick",
    "googlesyndication",
    "hotjar",
    "mixpanel",
    "segment.io",
    "segment.com",
    "amplitude",
    "adservice",
];

/// URL patterns in the wildcard form the browser expects.
pub fn blocked_url_patterns() -> Vec<String> {
    BLOCKED_URL_FRAGMENTS
        .iter()
        .map(|fragment| format!("*{fragment}*"))
        .collect()
}

pub const BASELINE_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Cache-Control", "max-age=0"),
    ("Pragma", "no-cache"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Upgrade-Insecure-Requests", "1"),
    ("DNT", "1"),
];

/// Sent after a 403, on top of the baseline set.
pub const BROADENED_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.5"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("Connection", "keep-alive"),
    ("Sec-Fetch-Site", "same-origin"),
];

/// One way of locating a clickable overlay control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickProbe {
    Css(&'static str),
    /// A button whose visible label equals this text, ignoring case
    ButtonText(&'static str),
}

pub const CONSENT_PROBES: &[ClickProbe] = &[
    ClickProbe::Css(r#"button[data-testid="accept-cookies"]"#),
    ClickProbe::Css(r#"button[data-testid="cookie-accept"]"#),
    ClickProbe::Css("#onetrust-accept-btn-handler"),
    ClickProbe::Css(r#"button[id*="accept"]"#),
    ClickProbe::Css(r#"button[class*="accept"]"#),
    ClickProbe::Css(r#"button[class*="cookie"]"#),
    ClickProbe::ButtonText("Accept"),
    ClickProbe::ButtonText("Accept All"),
    ClickProbe::ButtonText("I Accept"),
    ClickProbe::ButtonText("Agree"),
    ClickProbe::ButtonText("OK"),
    ClickProbe::Css(r#"[data-testid*="cookie"] button"#),
    ClickProbe::Css(".cookie-banner button"),
    ClickProbe::Css(".cookie-consent button"),
    ClickProbe::Css("#cookie-accept"),
    ClickProbe::Css("#accept-cookies"),
];

pub const POPUP_PROBES: &[ClickProbe] = &[
    ClickProbe::Css(r#"[data-testid*="modal"] button[aria-label*="lose"]"#),
    ClickProbe::Css(r#"button[aria-label*="close"]"#),
    ClickProbe::Css(r#"button[aria-label*="Close"]"#),
    ClickProbe::Css(".modal button.close"),
    ClickProbe::Css(".popup button"),
    ClickProbe::Css(".close-button"),
    ClickProbe::Css(r#"[class*="close"]"#),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DESKTOP_USER_AGENTS, MOBILE_USER_AGENTS};

    #[test]
    fn patterns_wrap_fragments_in_wildcards() {
        let patterns = blocked_url_patterns();
        assert_eq!(patterns.len(), BLOCKED_URL_FRAGMENTS.len());
        assert!(patterns.contains(&"*google-analytics*".to_string()));
    }

    #[test]
    fn stealth_script_spoofs_gpu_strings() {
        assert!(STEALTH_SCRIPT.contains("'Intel Inc.'"));
        assert!(STEALTH_SCRIPT.contains("'Intel Iris OpenGL Engine'"));
        assert!(STEALTH_SCRIPT.contains("webdriver"));
        assert!(!STEALTH_SCRIPT.contains("'platform'"));
    }

    #[test]
    fn navigator_identity_follows_user_agent() {
        let windows = NavigatorIdentity::for_user_agent(DESKTOP_USER_AGENTS[1]);
        assert_eq!(windows, NavigatorIdentity { platform: "Win32", vendor: "Google Inc." });

        let safari = NavigatorIdentity::for_user_agent(DESKTOP_USER_AGENTS[5]);
        assert_eq!(safari.platform, "MacIntel");
        assert_eq!(safari.vendor, "Apple Computer, Inc.");

        let firefox = NavigatorIdentity::for_user_agent(DESKTOP_USER_AGENTS[9]);
        assert_eq!(firefox, NavigatorIdentity { platform: "Linux x86_64", vendor: "" });

        let android = NavigatorIdentity::for_user_agent(MOBILE_USER_AGENTS[3]);
        assert_eq!(android.platform, "Linux armv8l");

        // Chrome on iOS still reports WebKit's vendor
        let ios_chrome = NavigatorIdentity::for_user_agent(MOBILE_USER_AGENTS[6]);
        assert_eq!(ios_chrome, NavigatorIdentity { platform: "iPhone", vendor: "Apple Computer, Inc." });
    }

    #[test]
    fn identity_script_quotes_values() {
        let script = NavigatorIdentity::for_user_agent(DESKTOP_USER_AGENTS[1]).init_script();
        assert!(script.contains(r#"get: () => "Win32""#));
        assert!(script.contains(r#"get: () => "Google Inc.""#));
    }
}
