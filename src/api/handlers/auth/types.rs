//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IssueLinkRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct IssueLinkResponse {
    /// Full verification URL for the outbound invitation email.
    pub verify_url: String,
    /// RFC 3339 expiry of the link.
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub guest_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyQuery {
    pub token: Option<String>,
}
