//! # Inviti (Guest Access & Data Protection Core)
//!
//! `inviti` is the security core of a guest-invitation and RSVP system. The
//! surrounding application (guest/event editing, mail rendering, payments,
//! admin UI) is ordinary CRUD glue; this crate owns the parts with real
//! invariants:
//!
//! - **Envelope encryption** of guest PII: every record is sealed under a
//!   fresh data key, the data key is wrapped under the deployment root key,
//!   and the ciphertext is bound to its `(table, record_id, purpose)` context
//!   so it is meaningless anywhere else.
//! - **Keyed hashing** of emails and tokens, so lookups work without storing
//!   plaintext identifiers or raw credentials.
//! - **Magic links**: single-use, time-boxed login URLs. Consumption is a
//!   single conditional store update, so two racing redemptions of the same
//!   link cannot both succeed.
//! - **Guest sessions** with dual expiry: an idle window bounds abandoned
//!   browsers, an absolute cap bounds total lifetime regardless of activity.
//! - **Access assertions**: administrative requests carry an RS256 JWT from
//!   the identity provider, verified against a cached JWKS.
//! - **Rate limiting** of the verification surface, keyed by client address
//!   and by token, backed by atomic counter upserts shared across instances.
//!
//! Every security decision (link click, verification outcome, session
//! creation) is recorded in an append-only audit table that this crate never
//! reads back.

pub mod api;
pub mod assertion;
pub mod cli;
pub mod envelope;
pub mod keyhash;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
