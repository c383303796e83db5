use clap::{Arg, ArgMatches, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_LANDING_PATH: &str = "landing-path";
pub const ARG_LINK_TTL_SECONDS: &str = "link-ttl-seconds";
pub const ARG_SESSION_ABSOLUTE_HOURS: &str = "session-absolute-hours";
pub const ARG_SESSION_IDLE_MINUTES: &str = "session-idle-minutes";
pub const ARG_VERIFY_IP_LIMIT: &str = "verify-ip-limit";
pub const ARG_VERIFY_TOKEN_LIMIT: &str = "verify-token-limit";
pub const ARG_VERIFY_WINDOW_SECONDS: &str = "verify-window-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: String,
    pub landing_path: String,
    pub link_ttl_seconds: i64,
    pub session_absolute_hours: i64,
    pub session_idle_minutes: i64,
    pub verify_ip_limit: i64,
    pub verify_token_limit: i64,
    pub verify_window_seconds: i64,
}

impl Options {
    /// Parse auth lifecycle arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the base URL is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let base_url = matches
            .get_one::<String>(ARG_BASE_URL)
            .cloned()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_BASE_URL}"))?;

        let get_i64 =
            |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        Ok(Self {
            base_url,
            landing_path: matches
                .get_one::<String>(ARG_LANDING_PATH)
                .cloned()
                .unwrap_or_else(|| "/rsvp".to_string()),
            link_ttl_seconds: get_i64(ARG_LINK_TTL_SECONDS, 30 * 60),
            session_absolute_hours: get_i64(ARG_SESSION_ABSOLUTE_HOURS, 24 * 7),
            session_idle_minutes: get_i64(ARG_SESSION_IDLE_MINUTES, 60),
            verify_ip_limit: get_i64(ARG_VERIFY_IP_LIMIT, 10),
            verify_token_limit: get_i64(ARG_VERIFY_TOKEN_LIMIT, 5),
            verify_window_seconds: get_i64(ARG_VERIFY_WINDOW_SECONDS, 10 * 60),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public origin for magic links, cookies, and CORS")
                .env("INVITI_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_LANDING_PATH)
                .long(ARG_LANDING_PATH)
                .help("Path guests land on after redeeming a link")
                .default_value("/rsvp")
                .env("INVITI_LANDING_PATH"),
        )
        .arg(
            Arg::new(ARG_LINK_TTL_SECONDS)
                .long(ARG_LINK_TTL_SECONDS)
                .help("Magic link lifetime in seconds")
                .default_value("1800")
                .env("INVITI_LINK_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SESSION_ABSOLUTE_HOURS)
                .long(ARG_SESSION_ABSOLUTE_HOURS)
                .help("Absolute session lifetime in hours")
                .default_value("168")
                .env("INVITI_SESSION_ABSOLUTE_HOURS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_MINUTES)
                .long(ARG_SESSION_IDLE_MINUTES)
                .help("Idle session timeout in minutes")
                .default_value("60")
                .env("INVITI_SESSION_IDLE_MINUTES")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_IP_LIMIT)
                .long(ARG_VERIFY_IP_LIMIT)
                .help("Verification attempts allowed per client address per window")
                .default_value("10")
                .env("INVITI_VERIFY_IP_LIMIT")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_TOKEN_LIMIT)
                .long(ARG_VERIFY_TOKEN_LIMIT)
                .help("Verification attempts allowed per token per window")
                .default_value("5")
                .env("INVITI_VERIFY_TOKEN_LIMIT")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_VERIFY_WINDOW_SECONDS)
                .long(ARG_VERIFY_WINDOW_SECONDS)
                .help("Rate limit window in seconds")
                .default_value("600")
                .env("INVITI_VERIFY_WINDOW_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
}
