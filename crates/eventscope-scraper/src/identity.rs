//! Renderer identities and stealth countermeasures.

use eventscope_core::{IdentityConfig, Viewport};
use rand::seq::IndexedRandom;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

const VIEWPORTS: &[Viewport] = &[
    Viewport { width: 1920, height: 1080 },
    Viewport { width: 1366, height: 768 },
    Viewport { width: 1536, height: 864 },
    Viewport { width: 1440, height: 900 },
    Viewport { width: 1280, height: 720 },
];

const LOCALES: &[&str] = &["en-US", "en-GB", "en-CA"];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Denver",
    "America/Los_Angeles",
];

/// Hides the usual automation tells from page scripts.
pub const STEALTH_INIT_SCRIPT: &str = r"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
";

/// Identity one renderer context presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
}

impl Identity {
    /// A random identity from the built-in pools when rotation is enabled,
    /// otherwise the configured one.
    #[must_use]
    pub fn pick(config: &IdentityConfig) -> Self {
        if !config.rotate {
            return Self::fixed(config);
        }
        let mut rng = rand::rng();
        Self {
            user_agent: USER_AGENTS
                .choose(&mut rng)
                .map_or_else(|| config.user_agent.clone(), |ua| (*ua).to_string()),
            viewport: VIEWPORTS.choose(&mut rng).copied().unwrap_or(config.viewport),
            locale: LOCALES
                .choose(&mut rng)
                .map_or_else(|| config.locale.clone(), |l| (*l).to_string()),
            timezone: TIMEZONES
                .choose(&mut rng)
                .map_or_else(|| config.timezone.clone(), |tz| (*tz).to_string()),
        }
    }

    #[must_use]
    pub fn fixed(config: &IdentityConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            viewport: config.viewport,
            locale: config.locale.clone(),
            timezone: config.timezone.clone(),
        }
    }

    /// `Accept-Language` value matching the locale, e.g. `en-GB,en;q=0.9`.
    #[must_use]
    pub fn accept_language(&self) -> String {
        match self.locale.split_once('-') {
            Some((lang, _)) => format!("{},{lang};q=0.9", self.locale),
            None => self.locale.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rotate: bool) -> IdentityConfig {
        IdentityConfig {
            user_agent: "fixed-agent/1.0".to_string(),
            viewport: Viewport {
                width: 800,
                height: 600,
            },
            locale: "de-DE".to_string(),
            timezone: "Europe/Berlin".to_string(),
            rotate,
        }
    }

    #[test]
    fn fixed_identity_uses_config() {
        let id = Identity::pick(&config(false));
        assert_eq!(id.user_agent, "fixed-agent/1.0");
        assert_eq!(id.viewport.width, 800);
        assert_eq!(id.locale, "de-DE");
        assert_eq!(id.accept_language(), "de-DE,de;q=0.9");
    }

    #[test]
    fn rotated_identity_comes_from_pools() {
        for _ in 0..20 {
            let id = Identity::pick(&config(true));
            assert!(USER_AGENTS.contains(&id.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&id.viewport));
            assert!(LOCALES.contains(&id.locale.as_str()));
            assert!(TIMEZONES.contains(&id.timezone.as_str()));
        }
    }

    #[test]
    fn stealth_script_hides_webdriver() {
        assert!(STEALTH_INIT_SCRIPT.contains("webdriver"));
        assert!(STEALTH_INIT_SCRIPT.contains("window.chrome"));
    }
}
