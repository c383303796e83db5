//! Access assertion verification.
//!
//! Administrative requests carry a compact RS256 JWT issued by the external
//! identity provider. This module owns the token format ([`jwt`]) and the
//! published key-set model ([`jwks`]); the process-wide cached verifier that
//! fetches and refreshes the key set lives with the API handlers.

mod jwks;
pub(crate) mod jwt;

pub use jwks::{Jwk, Jwks};
pub use jwt::{
    AssertionClaims, AssertionHeader, Audience, Error, sign_rs256, verify_rs256,
};
