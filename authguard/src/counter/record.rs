//! Counter records and decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::CounterKey;
use crate::error::{Error, Result};

/// Persisted state of one counter
///
/// Backs all three policies. `attempts` is used by Login and Verify,
/// `tokens_left` and `window_start` by RateLimit. At most one record exists
/// per [`CounterKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Unique key
    pub key: CounterKey,
    /// Failed attempts in the current window
    pub attempts: u32,
    /// Remaining rate-limit tokens; `-1` once the window is exhausted
    pub tokens_left: i64,
    /// Last computed decision
    pub allow_request: bool,
    /// Start of the current rate-limit window (or refill anchor)
    pub window_start: DateTime<Utc>,
    /// First event for this key
    pub created_at: DateTime<Utc>,
    /// Last event for this key
    pub updated_at: DateTime<Utc>,
    /// When the current window or lockout lapses
    pub expire_at: DateTime<Utc>,
}

impl CounterRecord {
    /// Fresh record for a key, as of `now`, before any event is applied
    pub fn fresh(key: CounterKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            attempts: 0,
            tokens_left: 0,
            allow_request: true,
            window_start: now,
            created_at: now,
            updated_at: now,
            expire_at: now,
        }
    }

    /// Whether `expire_at` has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Lock expiry for a denied record
    ///
    /// A record that denies requests is locked until `expire_at`; a record
    /// that allows requests uses `expire_at` only as its rolling reset.
    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        (!self.allow_request).then_some(self.expire_at)
    }
}

/// Outcome of evaluating or recording an event
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Attempts counted in the live window (Login, Verify)
    pub attempts: u32,
    /// Configured maximum attempts, or the rate limit
    pub max_attempts: u32,
    /// Remaining tokens (RateLimit only)
    pub tokens_left: Option<i64>,
    /// Seconds until a denied request may be retried (0 if allowed)
    pub retry_after_secs: u64,
    /// Live record, `None` when the key is absent or its state lapsed
    pub record: Option<CounterRecord>,
}

impl Decision {
    /// Decision for a key with no live state
    pub fn fresh(max_attempts: u32) -> Self {
        Self {
            allowed: true,
            attempts: 0,
            max_attempts,
            tokens_left: None,
            retry_after_secs: 0,
            record: None,
        }
    }

    /// Decision used when a policy is disabled
    pub fn unrestricted() -> Self {
        Self::fresh(0)
    }

    /// Decision used when a policy is misconfigured
    pub fn misconfigured() -> Self {
        Self {
            allowed: false,
            ..Self::fresh(0)
        }
    }

    /// Convert a denial into [`Error::AttemptLimitReached`]
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(Error::AttemptLimitReached {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
                retry_after_secs: self.retry_after_secs,
            })
        }
    }
}

pub(crate) fn secs_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        // Round up so a client never retries a moment too early
        ((millis + 999) / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::{CounterCriteria, CounterKind, Reference};
    use chrono::TimeDelta;

    fn key() -> CounterKey {
        CounterKey::new(
            CounterKind::Login,
            CounterCriteria::new(Reference::domain("d"), "u"),
        )
    }

    #[test]
    fn test_locked_until_only_when_denied() {
        let now = Utc::now();
        let mut record = CounterRecord::fresh(key(), now);
        record.expire_at = now + TimeDelta::seconds(60);
        assert_eq!(record.locked_until(), None);
        record.allow_request = false;
        assert_eq!(record.locked_until(), Some(now + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_secs_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(secs_until(now + TimeDelta::milliseconds(1500), now), 2);
        assert_eq!(secs_until(now + TimeDelta::seconds(60), now), 60);
        assert_eq!(secs_until(now - TimeDelta::seconds(1), now), 0);
    }

    #[test]
    fn test_into_result_denied() {
        let decision = Decision {
            allowed: false,
            attempts: 5,
            max_attempts: 5,
            tokens_left: None,
            retry_after_secs: 30,
            record: None,
        };
        match decision.into_result() {
            Err(Error::AttemptLimitReached {
                attempts,
                max_attempts,
                retry_after_secs,
            }) => {
                assert_eq!(attempts, 5);
                assert_eq!(max_attempts, 5);
                assert_eq!(retry_after_secs, 30);
            }
            other => panic!("Expected AttemptLimitReached, got {:?}", other),
        }
    }

    #[test]
    fn test_misconfigured_denies() {
        assert!(!Decision::misconfigured().allowed);
        assert!(Decision::unrestricted().allowed);
    }
}
