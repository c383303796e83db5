//! Database helpers for magic links, sessions, and the audit trail.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::keyhash::{KeyedHasher, generate_token};

/// Security decisions recorded in the append-only audit trail.
///
/// The core only ever writes these; nothing in this crate reads them back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AuditEvent {
    LinkIssued,
    LinkClicked,
    VerifyOk,
    VerifyFail,
    SessionCreated,
}

impl AuditEvent {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::LinkIssued => "link_issued",
            Self::LinkClicked => "link_clicked",
            Self::VerifyOk => "verify_ok",
            Self::VerifyFail => "verify_fail",
            Self::SessionCreated => "session_created",
        }
    }
}

/// Append one audit event. `guest_id` is `None` for events that could not be
/// tied to a guest (e.g. clicks on unknown tokens), which still matter for
/// abuse detection.
pub(super) async fn record_audit_event(
    pool: &PgPool,
    guest_id: Option<Uuid>,
    event: AuditEvent,
) -> Result<()> {
    let query = "INSERT INTO audit_events (guest_id, event_type) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(guest_id)
        .bind(event.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record audit event")?;
    Ok(())
}

/// Resolve a guest by hashed email (the only lookup key this core supports).
pub(super) async fn lookup_guest_by_email_hash(
    pool: &PgPool,
    email_hash: &str,
) -> Result<Option<Uuid>> {
    let query = "SELECT id FROM guests WHERE email_hash = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup guest by email hash")?;
    Ok(row.map(|row| row.get("id")))
}

/// Store a new magic link hash for a guest and return the link's expiry.
pub(super) async fn insert_magic_link(
    pool: &PgPool,
    guest_id: Uuid,
    token_hash: &str,
    ttl_seconds: i64,
) -> Result<DateTime<Utc>> {
    let query = r"
        INSERT INTO magic_links (guest_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(guest_id)
        .bind(token_hash)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert magic link")?;
    Ok(row.get("expires_at"))
}

/// State of a stored magic link, used to pick the user-facing denial message.
pub(crate) struct MagicLinkRecord {
    pub(crate) guest_id: Uuid,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) used_at: Option<DateTime<Utc>>,
}

pub(super) async fn lookup_magic_link(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<MagicLinkRecord>> {
    let query = r"
        SELECT guest_id, expires_at, used_at
        FROM magic_links
        WHERE token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup magic link")?;

    Ok(row.map(|row| MagicLinkRecord {
        guest_id: row.get("guest_id"),
        expires_at: row.get("expires_at"),
        used_at: row.get("used_at"),
    }))
}

/// Consume a magic link exactly once.
///
/// The update is conditioned on `used_at IS NULL`, so of two racing
/// redemptions of the same link only one can observe `true`; the write is a
/// single statement, never a read-then-write pair.
pub(super) async fn consume_magic_link(pool: &PgPool, token_hash: &str) -> Result<bool> {
    let query = r"
        UPDATE magic_links
        SET used_at = NOW()
        WHERE token_hash = $1
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING guest_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume magic link")?;
    Ok(row.is_some())
}

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) guest_id: Uuid,
}

/// Create a session row and return the raw identifier for the cookie.
///
/// Only the keyed hash is persisted. Retries a few times on the
/// astronomically unlikely hash collision.
pub(super) async fn insert_session(
    pool: &PgPool,
    hasher: &KeyedHasher,
    guest_id: Uuid,
    absolute_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO guest_sessions (guest_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hasher.hash_token(&token);
        let result = sqlx::query(query)
            .bind(guest_id)
            .bind(&token_hash)
            .bind(absolute_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session identifier"))
}

/// Resolve a session hash into an active session.
///
/// A session is active while the absolute expiry has not passed AND the idle
/// window has not elapsed since `last_seen_at`. Idle rows are deleted on
/// sight (one atomic delete); surviving rows get `last_seen_at` refreshed.
pub(super) async fn validate_session(
    pool: &PgPool,
    token_hash: &str,
    idle_seconds: i64,
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT guest_id, last_seen_at
        FROM guest_sessions
        WHERE session_hash = $1
          AND expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let last_seen_at: DateTime<Utc> = row.get("last_seen_at");
    if (Utc::now() - last_seen_at).num_seconds() > idle_seconds {
        // Idle timeout applies even though the absolute expiry hasn't passed.
        delete_session(pool, token_hash).await?;
        return Ok(None);
    }

    let query = r"
        UPDATE guest_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to refresh session last_seen_at")?;

    Ok(Some(SessionRecord {
        guest_id: row.get("guest_id"),
    }))
}

/// Delete a session row. Idempotent; logout and idle expiry both land here.
pub(super) async fn delete_session(pool: &PgPool, token_hash: &str) -> Result<()> {
    let query = "DELETE FROM guest_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn audit_event_wire_names() {
        assert_eq!(AuditEvent::LinkIssued.as_str(), "link_issued");
        assert_eq!(AuditEvent::LinkClicked.as_str(), "link_clicked");
        assert_eq!(AuditEvent::VerifyOk.as_str(), "verify_ok");
        assert_eq!(AuditEvent::VerifyFail.as_str(), "verify_fail");
        assert_eq!(AuditEvent::SessionCreated.as_str(), "session_created");
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
