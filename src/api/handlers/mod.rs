//! API handlers and shared utilities for Inviti.
//!
//! This module organizes the service's route handlers and owns the cached
//! access-assertion verifier used by the administrative surface.

pub mod admin;
pub mod auth;
pub mod health;

use crate::assertion::{self, AssertionClaims, Error as AssertionError, Jwks};
use anyhow::{Context, Result, anyhow};
use axum::http::{HeaderMap, StatusCode};
use reqwest::{
    Client,
    header::{ETAG, IF_NONE_MATCH},
};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant, SystemTime},
};
use tokio::sync::RwLock;
use tracing::{Instrument, error, info, info_span, warn};
use url::Url;

// JWKS caching: keep the last fetched key set in memory with a TTL; refresh
// on a stale cache or an unknown kid. If a refresh fails, the last known key
// set keeps serving so verification continues working.
const JWKS_CACHE_TTL_SECONDS: u64 = 300;
const JWKS_REFRESH_COOLDOWN_SECONDS: u64 = 30;

/// Header carrying the identity provider's signed assertion.
pub const ASSERTION_HEADER: &str = "x-access-assertion";

#[derive(Debug)]
enum JwksSource {
    /// Key set loaded from a local file or inline JSON and never refreshed.
    Static,
    /// Key set fetched from the identity provider and refreshed as needed.
    Remote { url: String, client: Client },
}

#[derive(Debug, Clone)]
struct JwksCache {
    /// Last known key set for assertion verification.
    jwks: Jwks,
    /// When the key set was last successfully fetched.
    fetched_at: Instant,
    /// `ETag` from the last successful fetch, if the provider sent one.
    etag: Option<String>,
}

impl JwksCache {
    /// A fresh key set is served as-is; a stale one triggers a refresh attempt.
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < Duration::from_secs(JWKS_CACHE_TTL_SECONDS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencyStatus {
    /// Provider endpoint is reachable and the key set fetch succeeded.
    Ok,
    /// Provider endpoint is unreachable or the fetch failed.
    Error,
    /// Static key set means no external dependency.
    Static,
}

impl DependencyStatus {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Static => "static",
        }
    }

    pub(crate) const fn is_healthy(self) -> bool {
        !matches!(self, Self::Error)
    }
}

/// Verifies access assertions using a cached JWKS.
///
/// Process-wide singleton, injected into handlers: the cache can be seeded
/// (static source), expired, or forced to miss in tests. Admin-facing
/// handlers call [`require_assertion`]; `/health` reports dependency status
/// when the key set is fetched remotely.
#[derive(Debug)]
pub struct AssertionVerifier {
    /// Where the JWKS comes from (static or remote provider URL).
    jwks_source: JwksSource,
    /// In-memory cached key set and last fetch timestamp.
    jwks_cache: RwLock<JwksCache>,
    /// Expected assertion issuer.
    issuer: String,
    /// Expected assertion audience.
    audience: String,
    /// Timestamp to throttle refresh attempts on unknown kid.
    last_refresh_unix: AtomicU64,
}

impl AssertionVerifier {
    /// Build from a static key set (file/inline), no remote refresh.
    #[must_use]
    pub fn new(jwks: Jwks, issuer: String, audience: String) -> Self {
        Self {
            jwks_source: JwksSource::Static,
            jwks_cache: RwLock::new(JwksCache {
                jwks,
                fetched_at: Instant::now(),
                etag: None,
            }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(0),
        }
    }

    /// Build a verifier that fetches the key set from the provider's
    /// published endpoint.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub async fn new_remote(url: String, issuer: String, audience: String) -> Result<Self> {
        let parsed = Url::parse(&url).context("Invalid assertion JWKS URL")?;
        if parsed.scheme() != "https" {
            return Err(anyhow!("Assertion JWKS URL must use https: {url}"));
        }

        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("Failed to build JWKS HTTP client")?;

        // Startup fetch is best-effort: if the provider isn't reachable yet,
        // start with an empty, stale cache so /health stays red and
        // verification fails closed until a refresh succeeds.
        let (jwks, fetched_at, last_refresh_unix, etag) =
            match fetch_jwks(&client, &url, None).await {
                Ok(FetchOutcome::Updated { jwks, etag }) => {
                    jwks.validate().context("Invalid assertion JWKS")?;
                    (jwks, Instant::now(), now_unix_seconds_u64(), etag)
                }
                Ok(FetchOutcome::NotModified) => {
                    warn!("assertion JWKS fetch returned not-modified during startup");
                    (empty_jwks(), stale_instant(), 0, None)
                }
                Err(err) => {
                    warn!(
                        url = %url,
                        error = %err,
                        "assertion JWKS fetch failed during startup; continuing with empty key set"
                    );
                    (empty_jwks(), stale_instant(), 0, None)
                }
            };

        Ok(Self {
            jwks_source: JwksSource::Remote { url, client },
            jwks_cache: RwLock::new(JwksCache {
                jwks,
                fetched_at,
                etag,
            }),
            issuer,
            audience,
            last_refresh_unix: AtomicU64::new(last_refresh_unix),
        })
    }

    /// Return the remote JWKS URL when configured, otherwise `None`.
    pub fn jwks_url(&self) -> Option<&str> {
        match &self.jwks_source {
            JwksSource::Static => None,
            JwksSource::Remote { url, .. } => Some(url.as_str()),
        }
    }

    /// Return the configured issuer for assertion verification.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Return the configured audience for assertion verification.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Return a key-set snapshot; refresh if stale, keep the cache if the
    /// refresh fails.
    async fn jwks_snapshot(&self) -> Result<Jwks> {
        let (cached, fresh) = {
            let cache = self.jwks_cache.read().await;
            (cache.jwks.clone(), cache.is_fresh())
        };

        if fresh {
            return Ok(cached);
        }

        if let JwksSource::Remote { url, .. } = &self.jwks_source {
            if let Err(err) = self.refresh_jwks().await {
                // A failed refresh shouldn't break verification; keep using
                // the last cached key set.
                warn!(
                    error = %err,
                    url = %url,
                    "failed to refresh assertion JWKS cache"
                );
                return Ok(cached);
            }
        }

        let cache = self.jwks_cache.read().await;
        Ok(cache.jwks.clone())
    }

    /// Fetch the key set from the provider and update the in-memory cache.
    async fn refresh_jwks(&self) -> Result<()> {
        let (url, client, etag) = match &self.jwks_source {
            JwksSource::Static => return Ok(()),
            JwksSource::Remote { url, client } => {
                let etag = self.jwks_cache.read().await.etag.clone();
                (url.clone(), client.clone(), etag)
            }
        };

        match fetch_jwks(&client, &url, etag.as_deref()).await? {
            FetchOutcome::NotModified => {
                let mut cache = self.jwks_cache.write().await;
                cache.fetched_at = Instant::now();
            }
            FetchOutcome::Updated { jwks, etag } => {
                jwks.validate().context("Invalid assertion JWKS")?;
                let mut cache = self.jwks_cache.write().await;
                cache.jwks = jwks;
                cache.fetched_at = Instant::now();
                cache.etag = etag;
                info!(jwks_keys = cache.jwks.keys.len(), "assertion JWKS cache refreshed");
            }
        }
        Ok(())
    }

    /// Report dependency status for `/health` by attempting a refresh.
    pub(crate) async fn dependency_status(&self) -> DependencyStatus {
        match &self.jwks_source {
            JwksSource::Static => DependencyStatus::Static,
            JwksSource::Remote { url, .. } => match self.refresh_jwks().await {
                Ok(()) => DependencyStatus::Ok,
                Err(err) => {
                    warn!(
                        error = %err,
                        url = %url,
                        "assertion JWKS fetch failed during health check"
                    );
                    DependencyStatus::Error
                }
            },
        }
    }

    /// Refresh if an assertion's `kid` is unknown, with a cooldown so a flood
    /// of unknown-kid tokens cannot be used to hammer the provider.
    async fn refresh_on_unknown_kid(&self) -> Result<bool> {
        if matches!(&self.jwks_source, JwksSource::Static) {
            return Ok(false);
        }
        let now = now_unix_seconds_u64();
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if now.saturating_sub(last) < JWKS_REFRESH_COOLDOWN_SECONDS {
            return Ok(false);
        }
        self.last_refresh_unix.store(now, Ordering::Relaxed);
        self.refresh_jwks().await?;
        Ok(true)
    }
}

/// Unix seconds for claim validation.
pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Convenience for cooldown tracking (unsigned).
fn now_unix_seconds_u64() -> u64 {
    u64::try_from(now_unix_seconds()).unwrap_or(0)
}

/// Empty key set used when the startup fetch fails; forces verification to
/// fail closed.
fn empty_jwks() -> Jwks {
    Jwks { keys: Vec::new() }
}

/// Produce an Instant that is already stale to trigger an early refresh.
fn stale_instant() -> Instant {
    Instant::now()
        .checked_sub(Duration::from_secs(JWKS_CACHE_TTL_SECONDS + 1))
        .unwrap_or_else(Instant::now)
}

enum FetchOutcome {
    NotModified,
    Updated { jwks: Jwks, etag: Option<String> },
}

/// Fetch the published key set and parse its JSON response.
async fn fetch_jwks(client: &Client, url: &str, etag: Option<&str>) -> Result<FetchOutcome> {
    let span = info_span!(
        "assertion.jwks.fetch",
        http.method = "GET",
        url = %url
    );
    async {
        let mut request = client.get(url);
        if let Some(etag_value) = etag {
            request = request.header(IF_NONE_MATCH, etag_value);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 304 {
            return Ok(FetchOutcome::NotModified);
        }
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("assertion JWKS fetch failed: {status}"));
        }

        let jwks = Jwks::from_json(&body).context("Invalid assertion JWKS JSON")?;
        Ok(FetchOutcome::Updated { jwks, etag })
    }
    .instrument(span)
    .await
}

/// Verify an assertion and return its claims if valid.
///
/// Flow: use the cached key set; on unknown `kid`, refresh (with cooldown)
/// and retry once. Every failure collapses into `None`; the specific cause
/// only reaches the internal log.
pub async fn verify_assertion(
    verifier: &AssertionVerifier,
    token: &str,
) -> Option<AssertionClaims> {
    let jwks = match verifier.jwks_snapshot().await {
        Ok(jwks) => jwks,
        Err(err) => {
            error!("Assertion JWKS snapshot failed: {err}");
            return None;
        }
    };

    match assertion::verify_rs256(
        token,
        &jwks,
        &verifier.issuer,
        &verifier.audience,
        now_unix_seconds(),
    ) {
        Ok(claims) => Some(claims),
        Err(AssertionError::UnknownKid(kid)) => match verifier.refresh_on_unknown_kid().await {
            Ok(true) => {
                let jwks = match verifier.jwks_snapshot().await {
                    Ok(jwks) => jwks,
                    Err(err) => {
                        error!("Assertion JWKS refresh failed: {err}");
                        return None;
                    }
                };
                match assertion::verify_rs256(
                    token,
                    &jwks,
                    &verifier.issuer,
                    &verifier.audience,
                    now_unix_seconds(),
                ) {
                    Ok(claims) => Some(claims),
                    Err(err) => {
                        error!("Assertion verification failed after refresh: {err}");
                        None
                    }
                }
            }
            Ok(false) => {
                warn!(kid = %kid, "Assertion kid not found and refresh suppressed");
                None
            }
            Err(err) => {
                error!("Assertion JWKS refresh failed: {err}");
                None
            }
        },
        Err(err) => {
            error!("Assertion verification failed: {err}");
            None
        }
    }
}

/// Require a valid assertion on an administrative request.
///
/// Absence, malformed tokens, bad signatures, expired or mistargeted claims
/// all yield the same `401 Unauthorized` with no body detail.
///
/// # Errors
/// Returns `StatusCode::UNAUTHORIZED` on any verification failure.
pub async fn require_assertion(
    headers: &HeaderMap,
    verifier: &AssertionVerifier,
) -> Result<AssertionClaims, StatusCode> {
    let token = headers
        .get(ASSERTION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    verify_assertion(verifier, token)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::jwt::tests::{
        AUDIENCE, ISSUER, TEST_PRIVATE_KEY_PEM, test_claims,
    };
    use crate::assertion::sign_rs256;
    use axum::http::HeaderValue;

    fn static_verifier() -> Result<AssertionVerifier, crate::assertion::Error> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        Ok(AssertionVerifier::new(
            jwks,
            ISSUER.to_string(),
            AUDIENCE.to_string(),
        ))
    }

    fn fresh_token() -> Result<String, crate::assertion::Error> {
        let mut claims = test_claims();
        let now = now_unix_seconds();
        claims.exp = now + 300;
        claims.nbf = Some(now - 5);
        claims.iat = Some(now);
        sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1", &claims)
    }

    #[tokio::test]
    async fn accepts_valid_assertion() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        let token = fresh_token()?;
        let claims = verify_assertion(&verifier, &token).await;
        assert_eq!(
            claims.and_then(|claims| claims.email),
            Some("admin@example.test".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_kid_on_static_source() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        let mut claims = test_claims();
        claims.exp = now_unix_seconds() + 300;
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), "rotated", &claims)?;
        assert!(verify_assertion(&verifier, &token).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn refresh_on_unknown_kid_skips_static_source() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        assert!(!verifier.refresh_on_unknown_kid().await?);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_on_unknown_kid_suppressed_within_cooldown() -> anyhow::Result<()> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let verifier = AssertionVerifier {
            jwks_source: JwksSource::Remote {
                url: "https://id.example.test/jwks.json".to_string(),
                client: Client::builder().build()?,
            },
            jwks_cache: RwLock::new(JwksCache {
                jwks,
                fetched_at: Instant::now(),
                etag: None,
            }),
            issuer: ISSUER.to_string(),
            audience: AUDIENCE.to_string(),
            last_refresh_unix: AtomicU64::new(now_unix_seconds_u64()),
        };
        assert!(!verifier.refresh_on_unknown_kid().await?);
        Ok(())
    }

    #[tokio::test]
    async fn require_assertion_missing_header_is_unauthorized() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        let result = require_assertion(&HeaderMap::new(), &verifier).await;
        assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
        Ok(())
    }

    #[tokio::test]
    async fn require_assertion_garbage_header_is_unauthorized() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        let mut headers = HeaderMap::new();
        headers.insert(ASSERTION_HEADER, HeaderValue::from_static("not-a-jwt"));
        let result = require_assertion(&headers, &verifier).await;
        assert_eq!(result.err(), Some(StatusCode::UNAUTHORIZED));
        Ok(())
    }

    #[tokio::test]
    async fn require_assertion_returns_claims() -> anyhow::Result<()> {
        let verifier = static_verifier()?;
        let token = fresh_token()?;
        let mut headers = HeaderMap::new();
        headers.insert(ASSERTION_HEADER, HeaderValue::from_str(&token)?);
        let claims = require_assertion(&headers, &verifier)
            .await
            .map_err(|status| anyhow::anyhow!("unexpected status {status}"))?;
        assert_eq!(claims.sub.as_deref(), Some("operator-1"));
        Ok(())
    }
}
