//! Rate limiting for throttled operations
//!
//! [`RateLimiter`] consumes one token per guarded event (sending an MFA
//! challenge, requesting a password reset, ...). The default discipline is
//! a fixed window: the first event opens a window with `limit - 1` tokens
//! left and the full allowance returns once the window elapses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::engine::ThresholdEngine;
use super::policy::Policy;
use super::record::Decision;
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventKind};
use crate::config::{RateLimitSettings, SettingsProvider};
use crate::criteria::{CounterCriteria, CounterKey, CounterKind, Reference};
use crate::error::{Error, Result};
use crate::store::CounterStore;

/// Rate limiter over the threshold engine
pub struct RateLimiter<S> {
    engine: ThresholdEngine<S>,
    settings: Arc<dyn SettingsProvider>,
    audit: AuditDispatcher,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            settings: Arc::clone(&self.settings),
            audit: self.audit.clone(),
        }
    }
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter
    pub fn new(engine: ThresholdEngine<S>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            engine,
            settings,
            audit: AuditDispatcher::disabled(),
        }
    }

    /// Report denials to an audit dispatcher
    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    /// Whether a rate limit applies to a domain or application
    pub fn is_rate_limit_enabled(&self, reference: &Reference, client: Option<&str>) -> bool {
        self.settings.settings_for(reference, client).rate_limit.enabled
    }

    /// Consume one token; `false` when the request must be refused
    pub async fn try_consume(&self, criteria: &CounterCriteria) -> Result<bool> {
        Ok(self.try_consume_detailed(criteria, Utc::now()).await?.allowed)
    }

    /// Consume one token as of `now`, reporting tokens left and retry-after
    ///
    /// Disabled limits allow without touching the store; a misconfigured
    /// limit (`limit <= 0` or an empty period) denies.
    pub async fn try_consume_detailed(
        &self,
        criteria: &CounterCriteria,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.rate_limit_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }

        let policy = Policy::RateLimit(settings.policy());
        let decision = self.engine.on_failure(&key(criteria), &policy, now).await?;
        debug!(
            subject = %criteria.subject,
            allowed = decision.allowed,
            tokens_left = ?decision.tokens_left,
            "Rate limit token consumed"
        );

        if !decision.allowed {
            info!(
                subject = %criteria.subject,
                reference = %criteria.reference,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
            self.audit.report(
                AuditEvent::new(AuditEventKind::RateLimitExceeded, criteria.subject.clone())
                    .with_reference(criteria.reference.clone())
                    .with_client(criteria.client.as_deref())
                    .with_failure("rate limit exceeded")
                    .with_attribute("limit", settings.limit)
                    .with_attribute("retry_after_secs", decision.retry_after_secs),
            );
        }

        Ok(decision)
    }

    /// Consume one token or fail with [`Error::RateLimitExceeded`]
    pub async fn consume(&self, criteria: &CounterCriteria) -> Result<Decision> {
        let decision = self.try_consume_detailed(criteria, Utc::now()).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(Error::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }

    /// Remaining allowance without consuming a token
    pub async fn peek(&self, criteria: &CounterCriteria, now: DateTime<Utc>) -> Result<Decision> {
        let settings = self.rate_limit_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }
        let policy = Policy::RateLimit(settings.policy());
        Ok(self.engine.evaluate(&key(criteria), &policy, now).await?)
    }

    /// Clear the window for a subject (e.g. after a completed challenge)
    pub async fn reset(&self, criteria: &CounterCriteria) -> Result<()> {
        self.engine.reset(&key(criteria)).await?;
        Ok(())
    }

    fn rate_limit_settings(&self, criteria: &CounterCriteria) -> RateLimitSettings {
        self.settings
            .settings_for(&criteria.reference, criteria.client.as_deref())
            .rate_limit
    }
}

fn key(criteria: &CounterCriteria) -> CounterKey {
    CounterKey::new(CounterKind::RateLimit, criteria.clone())
}
