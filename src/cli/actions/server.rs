use crate::api;
use crate::assertion::Jwks;
use crate::envelope::RootKey;
use crate::keyhash::KeyedHasher;
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{fs, sync::Arc};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub landing_path: String,
    pub link_ttl_seconds: i64,
    pub session_absolute_hours: i64,
    pub session_idle_minutes: i64,
    pub verify_ip_limit: i64,
    pub verify_token_limit: i64,
    pub verify_window_seconds: i64,
    pub assertion_jwks_url: Option<String>,
    pub assertion_jwks_path: Option<String>,
    pub assertion_issuer: String,
    pub assertion_audience: String,
    pub root_key: SecretString,
    pub hash_secret: SecretString,
}

/// Execute the server action.
///
/// Key material is validated here, once, before anything listens: a
/// malformed root key or hash secret refuses to boot instead of failing per
/// request.
///
/// # Errors
/// Returns an error if key material is invalid, the JWKS source cannot be
/// set up, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let root_key =
        RootKey::from_base64(args.root_key.expose_secret()).context("Invalid INVITI_ROOT_KEY")?;
    let hasher = KeyedHasher::from_base64(args.hash_secret.expose_secret())
        .context("Invalid INVITI_HASH_SECRET")?;

    let verifier = if let Some(url) = args.assertion_jwks_url {
        Arc::new(
            api::handlers::AssertionVerifier::new_remote(
                url,
                args.assertion_issuer,
                args.assertion_audience,
            )
            .await?,
        )
    } else {
        let path = args
            .assertion_jwks_path
            .context("Assertion JWKS source is required")?;
        let jwks_json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read JWKS file: {path}"))?;
        let jwks = Jwks::from_json(&jwks_json).context("Invalid assertion JWKS JSON")?;
        jwks.validate().context("Invalid assertion JWKS")?;
        Arc::new(api::handlers::AssertionVerifier::new(
            jwks,
            args.assertion_issuer,
            args.assertion_audience,
        ))
    };

    let auth_config = api::handlers::auth::AuthConfig::new(args.base_url)
        .with_landing_path(args.landing_path)
        .with_link_ttl_seconds(args.link_ttl_seconds)
        .with_session_absolute_hours(args.session_absolute_hours)
        .with_session_idle_minutes(args.session_idle_minutes)
        .with_verify_ip_limit(args.verify_ip_limit)
        .with_verify_token_limit(args.verify_token_limit)
        .with_verify_window_seconds(args.verify_window_seconds);

    api::new(args.port, args.dsn, auth_config, hasher, root_key, verifier).await
}
