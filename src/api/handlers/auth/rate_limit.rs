//! Rate limiting for the magic-link verification surface.
//!
//! Buckets live in the `rate_limit_buckets` table so limits hold across
//! service instances. Each check is a single atomic upsert: either the
//! window has elapsed and the bucket resets to one, or the counter
//! increments. Every attempt counts, including denied ones. A restart may
//! reset buckets; that is an accepted limitation of the fixed window, not a
//! security boundary on its own.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{Instrument, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count an attempt against `key` and decide whether it is still within
    /// `limit` per `window_seconds`.
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> RateLimitDecision;
}

/// Limiter for handler tests; never denies.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn allow(&self, _key: &str, _limit: i64, _window_seconds: i64) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Postgres-backed fixed-window limiter shared across instances.
#[derive(Clone, Debug)]
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> RateLimitDecision {
        // One statement, no read-modify-write: concurrent attempts for the
        // same key serialize on the bucket row.
        let query = r"
            INSERT INTO rate_limit_buckets (key, window_start, count)
            VALUES ($1, NOW(), 1)
            ON CONFLICT (key) DO UPDATE
            SET count = CASE
                    WHEN rate_limit_buckets.window_start <= NOW() - ($2 * INTERVAL '1 second')
                        THEN 1
                    ELSE rate_limit_buckets.count + 1
                END,
                window_start = CASE
                    WHEN rate_limit_buckets.window_start <= NOW() - ($2 * INTERVAL '1 second')
                        THEN NOW()
                    ELSE rate_limit_buckets.window_start
                END
            RETURNING count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT"
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(window_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => {
                let count: i64 = row.get("count");
                if count <= limit {
                    RateLimitDecision::Allowed
                } else {
                    RateLimitDecision::Limited
                }
            }
            Err(err) => {
                // Fail closed: a broken store must not disable the limiter.
                error!("Failed to update rate limit bucket for {key}: {err}");
                RateLimitDecision::Limited
            }
        }
    }
}

/// Bucket key for the client-address window.
pub(super) fn ip_key(ip: &str) -> String {
    format!("verify:ip:{ip}")
}

/// Bucket key for the token window (keyed by digest, never the raw token).
pub(super) fn token_key(token_hash: &str) -> String {
    format!("verify:token:{token_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.allow("verify:ip:1.2.3.4", 5, 600).await,
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn bucket_keys_are_scoped() {
        assert_eq!(ip_key("1.2.3.4"), "verify:ip:1.2.3.4");
        assert_eq!(token_key("abc"), "verify:token:abc");
        assert_ne!(ip_key("x"), token_key("x"));
    }
}
