//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{assertion, auth, crypto};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let assertion_opts = assertion::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;
    let crypto_opts = crypto::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        base_url: auth_opts.base_url,
        landing_path: auth_opts.landing_path,
        link_ttl_seconds: auth_opts.link_ttl_seconds,
        session_absolute_hours: auth_opts.session_absolute_hours,
        session_idle_minutes: auth_opts.session_idle_minutes,
        verify_ip_limit: auth_opts.verify_ip_limit,
        verify_token_limit: auth_opts.verify_token_limit,
        verify_window_seconds: auth_opts.verify_window_seconds,
        assertion_jwks_url: assertion_opts.jwks_url,
        assertion_jwks_path: assertion_opts.jwks_path,
        assertion_issuer: assertion_opts.issuer,
        assertion_audience: assertion_opts.audience,
        root_key: crypto_opts.root_key,
        hash_secret: crypto_opts.hash_secret,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_jwks_required() {
        temp_env::with_vars(
            [
                ("INVITI_ASSERTION_JWKS_URL", None::<&str>),
                ("INVITI_ASSERTION_JWKS_PATH", None),
                ("INVITI_ASSERTION_ISS", Some("https://id.example.com")),
                ("INVITI_ASSERTION_AUD", Some("inviti-admin")),
                ("INVITI_BASE_URL", Some("https://rsvp.example.com")),
                ("INVITI_DSN", Some("postgres://localhost:5432/inviti")),
                ("INVITI_ROOT_KEY", Some("cm9vdA==")),
                ("INVITI_HASH_SECRET", Some("aGFzaA==")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["inviti"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--assertion-jwks-url"));
                }
            },
        );
    }

    #[test]
    fn base_url_required() {
        temp_env::with_vars(
            [
                (
                    "INVITI_ASSERTION_JWKS_URL",
                    Some("https://id.example.com/jwks.json"),
                ),
                ("INVITI_ASSERTION_ISS", Some("https://id.example.com")),
                ("INVITI_ASSERTION_AUD", Some("inviti-admin")),
                ("INVITI_BASE_URL", None),
                ("INVITI_DSN", Some("postgres://localhost:5432/inviti")),
                ("INVITI_ROOT_KEY", Some("cm9vdA==")),
                ("INVITI_HASH_SECRET", Some("aGFzaA==")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["inviti"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--base-url"));
                }
            },
        );
    }

    #[test]
    fn builds_server_action() {
        temp_env::with_vars(
            [
                (
                    "INVITI_ASSERTION_JWKS_URL",
                    Some("https://id.example.com/jwks.json"),
                ),
                ("INVITI_ASSERTION_ISS", Some("https://id.example.com")),
                ("INVITI_ASSERTION_AUD", Some("inviti-admin")),
                ("INVITI_BASE_URL", Some("https://rsvp.example.com")),
                ("INVITI_DSN", Some("postgres://localhost:5432/inviti")),
                ("INVITI_ROOT_KEY", Some("cm9vdA==")),
                ("INVITI_HASH_SECRET", Some("aGFzaA==")),
                ("INVITI_PORT", Some("9090")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["inviti"]);
                let action = handler(&matches).expect("action builds");
                let Action::Server(args) = action;
                assert_eq!(args.port, 9090);
                assert_eq!(args.base_url, "https://rsvp.example.com");
                assert_eq!(args.assertion_audience, "inviti-admin");
                assert_eq!(args.verify_token_limit, 5);
            },
        );
    }
}
