use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ROOT_KEY: &str = "root-key";
pub const ARG_HASH_SECRET: &str = "hash-secret";

#[derive(Debug, Clone)]
pub struct Options {
    pub root_key: SecretString,
    pub hash_secret: SecretString,
}

impl Options {
    /// Parse key-material arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_secret = |id: &str| -> anyhow::Result<SecretString> {
            matches
                .get_one::<String>(id)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(SecretString::from)
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            root_key: get_secret(ARG_ROOT_KEY)?,
            hash_secret: get_secret(ARG_HASH_SECRET)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ROOT_KEY)
                .long(ARG_ROOT_KEY)
                .help("Base64 256-bit root key (KEK) for guest record encryption")
                .long_help(
                    "Base64 256-bit root key (KEK). Used only to wrap and unwrap per-record data keys;\nnever persisted. Prefer setting this via environment, not the command line.",
                )
                .env("INVITI_ROOT_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_HASH_SECRET)
                .long(ARG_HASH_SECRET)
                .help("Base64 256-bit secret for keyed hashing of emails and tokens")
                .env("INVITI_HASH_SECRET")
                .hide_env_values(true),
        )
}
