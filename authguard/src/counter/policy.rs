//! Counter policies
//!
//! One [`Policy`] value parameterizes the [`ThresholdEngine`](super::ThresholdEngine).
//! Every function here is pure: given the stored record and `now`, it decides
//! whether the state is still live, what the next record looks like after a
//! failure event, and what decision to report.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::record::{secs_until, CounterRecord, Decision};
use crate::criteria::{CounterKey, CounterKind};

/// Failed-login lockout
///
/// Soft window: every failure below the threshold pushes `expire_at` to
/// `now + reset_window`; a quiet period lets the counter lapse. Hard lock:
/// the `max_attempts`-th failure denies until `now + lockout_duration`,
/// and further failures during the lock do not extend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPolicy {
    /// Failures that trigger the lock
    pub max_attempts: u32,
    /// How long the lock lasts
    pub lockout_duration: TimeDelta,
    /// Quiet period after which failures are forgotten
    pub reset_window: TimeDelta,
}

/// MFA challenge verification attempts
///
/// Decay is measured from the last update, not from an absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyPolicy {
    /// Failures that deny further verification
    pub max_attempts: u32,
    /// Idle time after which attempts reset
    pub reset_window: TimeDelta,
}

/// How a rate-limit allowance is restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillStrategy {
    /// All tokens return at once when the window elapses
    #[default]
    FixedWindow,
    /// One token returns every `window / limit`
    Proportional,
}

/// Rate limit: `limit` events per `window`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Allowed events per window
    pub limit: i64,
    /// Window length
    pub window: TimeDelta,
    /// Refill discipline
    pub refill: RefillStrategy,
}

impl RateLimitPolicy {
    /// `limit <= 0` or a non-positive window cannot be evaluated
    pub fn is_misconfigured(&self) -> bool {
        self.limit <= 0 || self.window <= TimeDelta::zero()
    }

    fn token_interval(&self) -> TimeDelta {
        let millis = (self.window.num_milliseconds() / self.limit.max(1)).max(1);
        TimeDelta::milliseconds(millis)
    }

    fn window_end(&self, record: &CounterRecord) -> DateTime<Utc> {
        match self.refill {
            RefillStrategy::FixedWindow => after(record.window_start, self.window),
            RefillStrategy::Proportional => {
                let missing = self.limit - record.tokens_left.max(0);
                after(record.window_start, self.token_interval() * missing.clamp(0, i64::from(i32::MAX)) as i32)
            }
        }
    }

    fn next_token_at(&self, record: &CounterRecord) -> DateTime<Utc> {
        match self.refill {
            RefillStrategy::FixedWindow => after(record.window_start, self.window),
            RefillStrategy::Proportional => after(record.window_start, self.token_interval()),
        }
    }
}

/// Tagged policy selecting the engine semantics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Failed-login lockout
    Login(LoginPolicy),
    /// MFA verification attempts
    Verify(VerifyPolicy),
    /// Rate limit
    RateLimit(RateLimitPolicy),
}

impl Policy {
    /// Counter namespace of this policy
    pub fn kind(&self) -> CounterKind {
        match self {
            Self::Login(_) => CounterKind::Login,
            Self::Verify(_) => CounterKind::Verify,
            Self::RateLimit(_) => CounterKind::RateLimit,
        }
    }

    /// Configured threshold (attempts, or the rate limit)
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Login(p) => p.max_attempts,
            Self::Verify(p) => p.max_attempts,
            Self::RateLimit(p) => u32::try_from(p.limit.max(0)).unwrap_or(u32::MAX),
        }
    }

    /// Misconfigured policies deny without touching the store
    pub fn is_misconfigured(&self) -> bool {
        match self {
            Self::RateLimit(p) => p.is_misconfigured(),
            _ => false,
        }
    }

    /// Whether a success event deletes the record
    pub fn resets_on_success(&self) -> bool {
        !matches!(self, Self::Verify(_))
    }

    /// Recompute stored state against `now`
    ///
    /// Returns `None` when the stored state has lapsed and the key must be
    /// treated as fresh.
    pub fn refresh(&self, record: CounterRecord, now: DateTime<Utc>) -> Option<CounterRecord> {
        match self {
            Self::Login(_) => (!record.is_expired(now)).then_some(record),
            Self::Verify(p) => (now <= after(record.updated_at, p.reset_window)).then_some(record),
            Self::RateLimit(p) => match p.refill {
                RefillStrategy::FixedWindow => (now < after(record.window_start, p.window)).then_some(record),
                RefillStrategy::Proportional => refill(p, record, now),
            },
        }
    }

    /// Next state after one failure (or one consumed event) at `now`
    ///
    /// `live` is the refreshed state; `None` starts a new window.
    pub fn apply_failure(
        &self,
        live: Option<CounterRecord>,
        key: &CounterKey,
        now: DateTime<Utc>,
    ) -> CounterRecord {
        match self {
            Self::Login(p) => {
                let mut record = live.unwrap_or_else(|| CounterRecord::fresh(key.clone(), now));
                record.attempts = record.attempts.saturating_add(1);
                record.updated_at = now;
                if !record.allow_request {
                    // Locked: the lock runs to its original expiry
                    return record;
                }
                if record.attempts >= p.max_attempts {
                    record.allow_request = false;
                    record.expire_at = after(now, p.lockout_duration);
                } else {
                    record.expire_at = after(now, p.reset_window);
                }
                record
            }
            Self::Verify(p) => {
                let mut record = live.unwrap_or_else(|| CounterRecord::fresh(key.clone(), now));
                record.attempts = record.attempts.saturating_add(1);
                record.allow_request = record.attempts < p.max_attempts;
                record.updated_at = now;
                record.expire_at = after(now, p.reset_window);
                record
            }
            Self::RateLimit(p) => {
                let mut record = match live {
                    Some(mut record) => {
                        record.tokens_left = (record.tokens_left - 1).max(-1);
                        record
                    }
                    None => {
                        let mut record = CounterRecord::fresh(key.clone(), now);
                        record.tokens_left = p.limit - 1;
                        record
                    }
                };
                record.allow_request = record.tokens_left >= 0;
                record.attempts = record.attempts.saturating_add(1);
                record.updated_at = now;
                record.expire_at = p.window_end(&record);
                record
            }
        }
    }

    /// Decision reported for the (refreshed) state
    pub fn decide(&self, live: Option<&CounterRecord>, now: DateTime<Utc>) -> Decision {
        let max_attempts = self.max_attempts();
        let Some(record) = live else {
            let mut decision = Decision::fresh(max_attempts);
            if let Self::RateLimit(p) = self {
                decision.tokens_left = Some(p.limit);
            }
            return decision;
        };

        let retry_after_secs = if record.allow_request {
            0
        } else {
            let until = match self {
                Self::Login(_) => record.expire_at,
                Self::Verify(p) => after(record.updated_at, p.reset_window),
                Self::RateLimit(p) => p.next_token_at(record),
            };
            secs_until(until, now)
        };

        Decision {
            allowed: record.allow_request,
            attempts: record.attempts,
            max_attempts,
            tokens_left: matches!(self, Self::RateLimit(_)).then_some(record.tokens_left),
            retry_after_secs,
            record: Some(record.clone()),
        }
    }
}

fn refill(policy: &RateLimitPolicy, mut record: CounterRecord, now: DateTime<Utc>) -> Option<CounterRecord> {
    let interval = policy.token_interval().num_milliseconds();
    let elapsed = (now - record.window_start).num_milliseconds().max(0);
    let added = elapsed / interval;
    if added == 0 {
        return Some(record);
    }
    let tokens = record.tokens_left.max(0).saturating_add(added);
    if tokens >= policy.limit {
        return None;
    }
    record.tokens_left = tokens;
    record.allow_request = true;
    record.window_start = after(record.window_start, TimeDelta::milliseconds(added * interval));
    Some(record)
}

/// `instant + delta`, saturating at the representable bounds
pub(crate) fn after(instant: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    instant
        .checked_add_signed(delta)
        .unwrap_or(if delta < TimeDelta::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Whole seconds as a `TimeDelta`, saturating on overflow
pub(crate) fn seconds(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}
