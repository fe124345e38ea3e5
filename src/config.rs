use std::time::Duration;

use anyhow::Context;

const DEFAULT_PORTAL_BASE: &str = "https://upskill.us.qwasar.io";
const DEFAULT_CAS_BASE: &str = "https://casapp.us.qwasar.io";

/// Everything the scraper needs, constructed once and passed to the client.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Service-provider origin hosting the student profiles.
    pub portal_base: String,
    /// Identity-provider origin handling the CAS login.
    pub cas_base: String,
    pub username: String,
    pub password: String,
    /// Politeness throttle between per-student requests.
    pub delay: Duration,
}

impl ScrapeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let username = std::env::var("SCRAPER_USERNAME")
            .context("SCRAPER_USERNAME must be set to a portal account")?;
        let password = std::env::var("SCRAPER_PASSWORD")
            .context("SCRAPER_PASSWORD must be set to a portal account")?;

        Ok(Self {
            portal_base: std::env::var("PORTAL_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PORTAL_BASE.to_string()),
            cas_base: std::env::var("CAS_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_CAS_BASE.to_string()),
            username,
            password,
            delay: Duration::from_millis(500),
        })
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay = Duration::from_millis(delay_ms);
        self
    }

    pub fn service_url(&self) -> String {
        format!("{}/users/service", self.portal_base)
    }

    pub fn profile_url(&self, username: &str) -> String {
        format!("{}/users/{}", self.portal_base, username)
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.portal_base)
    }

    pub fn cas_login_url(&self) -> String {
        format!("{}/login", self.cas_base)
    }
}
