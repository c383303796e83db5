//! Auth handlers and supporting modules.
//!
//! This module coordinates the guest login lifecycle: magic-link issuing and
//! redemption, session creation/validation, rate limiting, and the audit
//! trail behind each decision.
//!
//! ## Magic links
//!
//! Links are single-use and time-boxed. Only the keyed hash of a token is
//! stored; consumption is one conditional update so concurrent redemptions
//! of the same link cannot both succeed.
//!
//! ## Sessions
//!
//! Sessions expire on whichever comes first: the absolute lifetime set at
//! creation, or the idle window since the last successful validation. Both
//! bounds are configurable per deployment.
//!
//! ## Rate limiting
//!
//! `GET /auth/verify` is limited per client address and per token hash, in
//! two independent windows backed by shared counter rows, so limits hold
//! across service instances.

pub(crate) mod magic_link;
mod rate_limit;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use rate_limit::{NoopRateLimiter, PgRateLimiter, RateLimitDecision, RateLimiter};
pub use state::{AuthConfig, AuthState};
