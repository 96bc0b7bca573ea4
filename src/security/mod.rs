//! Security boundary: input validation, output sanitisation, rate limiting.

pub mod guard;
pub mod rate_limit;

pub use guard::{redact_identifiers, PatternGuard, SecurityGuard, Validation};
pub use rate_limit::RateLimiter;
