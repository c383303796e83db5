//! Administrative endpoints guarded by the access assertion.

use axum::{
    Json,
    extract::Extension,
    http::HeaderMap,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{AssertionVerifier, require_assertion};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminIdentityResponse {
    /// Operator email from the verified assertion, if present.
    pub email: Option<String>,
    /// Operator subject from the verified assertion, if present.
    pub subject: Option<String>,
}

/// Return the verified operator identity.
///
/// The verifier establishes identity only; what the operator may do with it
/// is decided by the consuming admin application.
#[utoipa::path(
    get,
    path = "/v1/admin/identity",
    params(
        ("x-access-assertion" = String, Header, description = "Identity provider assertion")
    ),
    responses(
        (status = 200, description = "Assertion verified", body = AdminIdentityResponse),
        (status = 401, description = "Missing or invalid assertion")
    ),
    tag = "admin"
)]
pub async fn identity(
    headers: HeaderMap,
    verifier: Extension<Arc<AssertionVerifier>>,
) -> impl IntoResponse {
    match require_assertion(&headers, &verifier).await {
        Ok(claims) => Json(AdminIdentityResponse {
            email: claims.email,
            subject: claims.sub,
        })
        .into_response(),
        Err(status) => status.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::{ASSERTION_HEADER, now_unix_seconds};
    use crate::assertion::jwt::tests::{AUDIENCE, ISSUER, TEST_PRIVATE_KEY_PEM, test_claims};
    use crate::assertion::{Jwks, sign_rs256};
    use anyhow::Result;
    use axum::http::{HeaderValue, StatusCode};

    fn verifier() -> Result<Arc<AssertionVerifier>> {
        let jwks = Jwks::from_rsa_private_key_pem_or_der(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        Ok(Arc::new(AssertionVerifier::new(
            jwks,
            ISSUER.to_string(),
            AUDIENCE.to_string(),
        )))
    }

    #[tokio::test]
    async fn identity_without_assertion_is_unauthorized() -> Result<()> {
        let response = identity(HeaderMap::new(), Extension(verifier()?))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn identity_with_valid_assertion() -> Result<()> {
        let mut claims = test_claims();
        let now = now_unix_seconds();
        claims.exp = now + 300;
        claims.nbf = Some(now - 5);
        let token = sign_rs256(TEST_PRIVATE_KEY_PEM.as_bytes(), "k1", &claims)?;

        let mut headers = HeaderMap::new();
        headers.insert(ASSERTION_HEADER, HeaderValue::from_str(&token)?);
        let response = identity(headers, Extension(verifier()?))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
