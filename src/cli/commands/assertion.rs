use clap::{Arg, ArgMatches, Command};

pub const ARG_ASSERTION_JWKS_URL: &str = "assertion-jwks-url";
pub const ARG_ASSERTION_JWKS_PATH: &str = "assertion-jwks-path";
pub const ARG_ASSERTION_ISSUER: &str = "assertion-issuer";
pub const ARG_ASSERTION_AUDIENCE: &str = "assertion-audience";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwks_url: Option<String>,
    pub jwks_path: Option<String>,
    pub issuer: String,
    pub audience: String,
}

impl Options {
    /// Parse assertion-verifier arguments from matches.
    ///
    /// # Errors
    /// Returns an error if neither a JWKS URL nor a JWKS file is configured,
    /// or if issuer/audience are missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // Helper to filter empty strings which clap might pass through if env
        // vars are set to "".
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|value| !value.trim().is_empty())
        };

        let jwks_url = get_non_empty(ARG_ASSERTION_JWKS_URL);
        let jwks_path = get_non_empty(ARG_ASSERTION_JWKS_PATH);
        if jwks_url.is_none() && jwks_path.is_none() {
            anyhow::bail!(
                "missing required argument: --{ARG_ASSERTION_JWKS_URL} or --{ARG_ASSERTION_JWKS_PATH}"
            );
        }

        let issuer = get_non_empty(ARG_ASSERTION_ISSUER)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_ASSERTION_ISSUER}"))?;
        let audience = get_non_empty(ARG_ASSERTION_AUDIENCE).ok_or_else(|| {
            anyhow::anyhow!("missing required argument: --{ARG_ASSERTION_AUDIENCE}")
        })?;

        Ok(Self {
            jwks_url,
            jwks_path,
            issuer,
            audience,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ASSERTION_JWKS_URL)
                .long(ARG_ASSERTION_JWKS_URL)
                .help("JWKS URL used to verify access assertions")
                .long_help(
                    "Identity provider JWKS URL used to verify access assertions.\n\nThe key set is cached (TTL ~5 minutes) and refreshed on unknown `kid` with a cooldown.\nVerification itself is local and does not call the provider per request.",
                )
                .env("INVITI_ASSERTION_JWKS_URL"),
        )
        .arg(
            Arg::new(ARG_ASSERTION_JWKS_PATH)
                .long(ARG_ASSERTION_JWKS_PATH)
                .help("Path to a static JWKS file (alternative to the URL)")
                .env("INVITI_ASSERTION_JWKS_PATH")
                .conflicts_with(ARG_ASSERTION_JWKS_URL),
        )
        .arg(
            Arg::new(ARG_ASSERTION_ISSUER)
                .long(ARG_ASSERTION_ISSUER)
                .help("Expected assertion issuer (iss)")
                .env("INVITI_ASSERTION_ISS"),
        )
        .arg(
            Arg::new(ARG_ASSERTION_AUDIENCE)
                .long(ARG_ASSERTION_AUDIENCE)
                .help("Expected assertion audience (aud)")
                .env("INVITI_ASSERTION_AUD"),
        )
}
