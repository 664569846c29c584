//! Threshold counters
//!
//! One engine ([`ThresholdEngine`]) with three policies over a shared
//! [`CounterRecord`]:
//!
//! - **Login**: lock an account for a fixed duration after `max_attempts`
//!   failures; a success clears the state
//! - **Verify**: count failed MFA verifications per factor; attempts decay
//!   after a quiet period
//! - **RateLimit**: `limit` events per window, with a fixed-window or
//!   proportional refill
//!
//! The facades ([`LoginAttempts`], [`VerifyAttempts`], [`RateLimiter`])
//! resolve per-domain settings and report audit events.

mod engine;
mod login;
mod policy;
mod rate_limit;
mod record;
mod verify;

#[cfg(feature = "http")]
pub mod middleware;

pub use engine::{ThresholdEngine, MAX_WRITE_ATTEMPTS};
pub use login::{LoginAttempts, UnlockReason};
pub use policy::{LoginPolicy, Policy, RateLimitPolicy, RefillStrategy, VerifyPolicy};
pub use rate_limit::RateLimiter;
pub use record::{CounterRecord, Decision};
pub use verify::VerifyAttempts;

#[cfg(feature = "http")]
pub use middleware::ThrottleMiddleware;

pub(crate) use policy::{after, seconds};
