//! Magic-link issuing and redemption.

use axum::{
    Json,
    extract::{Extension, Query},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::api::handlers::{AssertionVerifier, require_assertion};

use super::rate_limit::{RateLimitDecision, ip_key, token_key};
use super::session::session_cookie;
use super::state::AuthState;
use super::storage::{
    AuditEvent, consume_magic_link, insert_magic_link, insert_session, lookup_guest_by_email_hash,
    lookup_magic_link, record_audit_event,
};
use super::types::{IssueLinkRequest, IssueLinkResponse, VerifyQuery};
use super::utils::{build_verify_url, extract_client_ip, normalize_email, valid_email};

fn no_store() -> HeaderValue {
    HeaderValue::from_static("no-store")
}

/// Issue a single-use login link for a guest (admin surface).
///
/// The raw token only appears in the response for the outbound mailer; the
/// database keeps its keyed hash.
#[utoipa::path(
    post,
    path = "/v1/auth/links",
    request_body = IssueLinkRequest,
    params(
        ("x-access-assertion" = String, Header, description = "Identity provider assertion")
    ),
    responses(
        (status = 201, description = "Link issued", body = IssueLinkResponse),
        (status = 400, description = "Invalid request", body = String),
        (status = 401, description = "Missing or invalid assertion"),
        (status = 404, description = "Unknown guest", body = String)
    ),
    tag = "auth"
)]
pub async fn issue_link(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    verifier: Extension<Arc<AssertionVerifier>>,
    payload: Option<Json<IssueLinkRequest>>,
) -> impl IntoResponse {
    if let Err(status) = require_assertion(&headers, &verifier).await {
        return status.into_response();
    }

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let email_hash = auth_state.hasher().hash_email(&email);
    let guest_id = match lookup_guest_by_email_hash(&pool, &email_hash).await {
        Ok(Some(guest_id)) => guest_id,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "Unknown guest".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to lookup guest for link issue: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Issue failed".to_string(),
            )
                .into_response();
        }
    };

    let token = match crate::keyhash::generate_token() {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to generate magic link token: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Issue failed".to_string(),
            )
                .into_response();
        }
    };
    let token_hash = auth_state.hasher().hash_token(&token);

    let ttl_seconds = auth_state.config().link_ttl_seconds();
    let expires_at = match insert_magic_link(&pool, guest_id, &token_hash, ttl_seconds).await {
        Ok(expires_at) => expires_at,
        Err(err) => {
            error!("Failed to insert magic link: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Issue failed".to_string(),
            )
                .into_response();
        }
    };

    audit(&pool, Some(guest_id), AuditEvent::LinkIssued).await;

    let response = IssueLinkResponse {
        verify_url: build_verify_url(auth_state.config().base_url(), &token),
        expires_at: expires_at.to_rfc3339(),
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

/// Redeem a magic link and start a guest session.
///
/// Every response carries `Cache-Control: no-store`. The three denial paths
/// (unknown, already used, expired) perform the same work and differ only in
/// message text, so timing does not help enumeration.
#[utoipa::path(
    get,
    path = "/auth/verify",
    params(
        ("token" = Option<String>, Query, description = "Raw magic link token")
    ),
    responses(
        (status = 303, description = "Link redeemed; session cookie set"),
        (status = 400, description = "Invalid, used, or expired link", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_link(
    headers: HeaderMap,
    Query(query): Query<VerifyQuery>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let token = query.token.as_deref().map(str::trim).unwrap_or_default();
    if token.is_empty() {
        return denial(StatusCode::BAD_REQUEST, "Invalid link");
    }

    let config = auth_state.config();
    let limiter = auth_state.rate_limiter();
    let window = config.verify_window_seconds();

    // Two independent windows: the caller's address and the token itself.
    // Exceeding either denies without revealing which.
    let client_ip = extract_client_ip(&headers);
    let ip_bucket = ip_key(client_ip.as_deref().unwrap_or("unknown"));
    if limiter.allow(&ip_bucket, config.verify_ip_limit(), window).await
        == RateLimitDecision::Limited
    {
        return denial(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    // Hash before lookup; raw tokens never touch the database.
    let token_hash = auth_state.hasher().hash_token(token);
    if limiter
        .allow(&token_key(&token_hash), config.verify_token_limit(), window)
        .await
        == RateLimitDecision::Limited
    {
        return denial(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    let link = match lookup_magic_link(&pool, &token_hash).await {
        Ok(link) => link,
        Err(err) => {
            error!("Failed to lookup magic link: {err}");
            return denial(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    };

    // Clicks are recorded regardless of outcome; unknown tokens get a null
    // subject so abuse stands out in the trail.
    audit(&pool, link.as_ref().map(|link| link.guest_id), AuditEvent::LinkClicked).await;

    let Some(link) = link else {
        audit(&pool, None, AuditEvent::VerifyFail).await;
        return denial(StatusCode::BAD_REQUEST, "Invalid link");
    };

    if link.used_at.is_some() {
        audit(&pool, Some(link.guest_id), AuditEvent::VerifyFail).await;
        return denial(StatusCode::BAD_REQUEST, "Link already used");
    }

    if link.expires_at <= chrono::Utc::now() {
        audit(&pool, Some(link.guest_id), AuditEvent::VerifyFail).await;
        return denial(StatusCode::BAD_REQUEST, "Link expired");
    }

    // Single-use enforcement: the conditional update decides the race.
    match consume_magic_link(&pool, &token_hash).await {
        Ok(true) => {}
        Ok(false) => {
            audit(&pool, Some(link.guest_id), AuditEvent::VerifyFail).await;
            return denial(StatusCode::BAD_REQUEST, "Link already used");
        }
        Err(err) => {
            error!("Failed to consume magic link: {err}");
            return denial(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    }

    start_session(&pool, &auth_state, link.guest_id).await
}

/// Create the session row and build the redirect carrying the cookie.
async fn start_session(pool: &PgPool, auth_state: &AuthState, guest_id: Uuid) -> Response {
    let absolute_seconds = auth_state.config().session_absolute_seconds();
    let token = match insert_session(pool, auth_state.hasher(), guest_id, absolute_seconds).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return denial(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    };

    audit(pool, Some(guest_id), AuditEvent::SessionCreated).await;
    audit(pool, Some(guest_id), AuditEvent::VerifyOk).await;

    let Ok(cookie) = session_cookie(auth_state, &token) else {
        error!("Failed to build session cookie");
        return denial(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
    };

    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, no_store());
    headers.insert(SET_COOKIE, cookie);
    match HeaderValue::from_str(&auth_state.config().landing_url()) {
        Ok(location) => {
            headers.insert(LOCATION, location);
        }
        Err(err) => {
            error!("Invalid landing URL: {err}");
            return denial(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    }
    response
}

/// Denial page with caching disabled; message text is the only variation.
fn denial(status: StatusCode, message: &str) -> Response {
    let mut response = (status, message.to_string()).into_response();
    response.headers_mut().insert(CACHE_CONTROL, no_store());
    response
}

async fn audit(pool: &PgPool, guest_id: Option<Uuid>, event: AuditEvent) {
    // The audit trail must not block the security decision itself.
    if let Err(err) = record_audit_event(pool, guest_id, event).await {
        error!("Failed to record audit event {}: {err}", event.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use crate::api::handlers::ASSERTION_HEADER;
    use crate::assertion::jwt::tests::{AUDIENCE, ISSUER, TEST_PRIVATE_KEY_PEM, test_claims};
    use crate::assertion::{Jwks, sign_rs256};
    use crate::envelope::RootKey;
    use crate::keyhash::KeyedHasher;
    use anyhow::Result;
    use axum::http::HeaderValue;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("https://rsvp.example.com".to_string()),
            KeyedHasher::from_bytes([1u8; 32]),
            RootKey::from_bytes([2u8; 32]),
            Arc::new(NoopRateLimiter),
        ))
    }

    fn assertion_verifier() -> Result<Arc<AssertionVerifier>> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        Ok(Arc::new(AssertionVerifier::new(
            jwks,
            ISSUER.to_string(),
            AUDIENCE.to_string(),
        )))
    }

    fn admin_headers() -> Result<HeaderMap> {
        let mut claims = test_claims();
        let now = crate::api::handlers::now_unix_seconds();
        claims.exp = now + 300;
        claims.nbf = Some(now - 5);
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1", &claims)?;
        let mut headers = HeaderMap::new();
        headers.insert(ASSERTION_HEADER, HeaderValue::from_str(&token)?);
        Ok(headers)
    }

    fn lazy_pool() -> Result<sqlx::PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
    }

    #[tokio::test]
    async fn verify_link_missing_token() -> Result<()> {
        let response = verify_link(
            HeaderMap::new(),
            Query(VerifyQuery { token: None }),
            Extension(lazy_pool()?),
            Extension(auth_state()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn verify_link_blank_token() -> Result<()> {
        let response = verify_link(
            HeaderMap::new(),
            Query(VerifyQuery {
                token: Some("   ".to_string()),
            }),
            Extension(lazy_pool()?),
            Extension(auth_state()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn issue_link_requires_assertion() -> Result<()> {
        let response = issue_link(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Extension(assertion_verifier()?),
            Some(Json(IssueLinkRequest {
                email: "guest@example.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn issue_link_missing_payload() -> Result<()> {
        let response = issue_link(
            admin_headers()?,
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Extension(assertion_verifier()?),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn issue_link_invalid_email() -> Result<()> {
        let response = issue_link(
            admin_headers()?,
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Extension(assertion_verifier()?),
            Some(Json(IssueLinkRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
