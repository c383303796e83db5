//! Auth state and configuration.

use std::sync::Arc;
use url::Url;

use crate::envelope::RootKey;
use crate::keyhash::KeyedHasher;

use super::rate_limit::RateLimiter;

const DEFAULT_LINK_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_SESSION_ABSOLUTE_HOURS: i64 = 24 * 7;
const DEFAULT_SESSION_IDLE_MINUTES: i64 = 60;
const DEFAULT_VERIFY_IP_LIMIT: i64 = 10;
const DEFAULT_VERIFY_TOKEN_LIMIT: i64 = 5;
const DEFAULT_VERIFY_WINDOW_SECONDS: i64 = 10 * 60;
const DEFAULT_LANDING_PATH: &str = "/rsvp";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    landing_path: String,
    link_ttl_seconds: i64,
    session_absolute_hours: i64,
    session_idle_minutes: i64,
    verify_ip_limit: i64,
    verify_token_limit: i64,
    verify_window_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            link_ttl_seconds: DEFAULT_LINK_TTL_SECONDS,
            session_absolute_hours: DEFAULT_SESSION_ABSOLUTE_HOURS,
            session_idle_minutes: DEFAULT_SESSION_IDLE_MINUTES,
            verify_ip_limit: DEFAULT_VERIFY_IP_LIMIT,
            verify_token_limit: DEFAULT_VERIFY_TOKEN_LIMIT,
            verify_window_seconds: DEFAULT_VERIFY_WINDOW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_landing_path(mut self, path: String) -> Self {
        self.landing_path = path;
        self
    }

    #[must_use]
    pub fn with_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_absolute_hours(mut self, hours: i64) -> Self {
        self.session_absolute_hours = hours;
        self
    }

    #[must_use]
    pub fn with_session_idle_minutes(mut self, minutes: i64) -> Self {
        self.session_idle_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_verify_ip_limit(mut self, limit: i64) -> Self {
        self.verify_ip_limit = limit;
        self
    }

    #[must_use]
    pub fn with_verify_token_limit(mut self, limit: i64) -> Self {
        self.verify_token_limit = limit;
        self
    }

    #[must_use]
    pub fn with_verify_window_seconds(mut self, seconds: i64) -> Self {
        self.verify_window_seconds = seconds;
        self
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL guests land on after a successful redemption.
    pub(super) fn landing_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.landing_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    pub(super) fn link_ttl_seconds(&self) -> i64 {
        self.link_ttl_seconds
    }

    pub(super) fn session_absolute_seconds(&self) -> i64 {
        self.session_absolute_hours * 3600
    }

    pub(super) fn session_idle_seconds(&self) -> i64 {
        self.session_idle_minutes * 60
    }

    pub(super) fn verify_ip_limit(&self) -> i64 {
        self.verify_ip_limit
    }

    pub(super) fn verify_token_limit(&self) -> i64 {
        self.verify_token_limit
    }

    pub(super) fn verify_window_seconds(&self) -> i64 {
        self.verify_window_seconds
    }

    /// Cookies are only marked `Secure` when the public origin is HTTPS.
    pub(super) fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// Origin for CORS, derived from the public base URL.
    pub(crate) fn origin(&self) -> Option<String> {
        let parsed = Url::parse(&self.base_url).ok()?;
        let host = parsed.host_str()?;
        let port = parsed
            .port()
            .map_or_else(String::new, |port| format!(":{port}"));
        Some(format!("{}://{}{}", parsed.scheme(), host, port))
    }
}

/// Shared state for the auth handlers: configuration, the keyed hasher, the
/// deployment root key, and the rate limiter.
pub struct AuthState {
    config: AuthConfig,
    hasher: KeyedHasher,
    root_key: RootKey,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        hasher: KeyedHasher,
        root_key: RootKey,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            hasher,
            root_key,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn hasher(&self) -> &KeyedHasher {
        &self.hasher
    }

    /// Root key for envelope encryption of guest records. Read-only for the
    /// whole process lifetime.
    #[must_use]
    pub fn root_key(&self) -> &RootKey {
        &self.root_key
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
