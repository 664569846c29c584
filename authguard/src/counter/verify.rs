//! MFA challenge verification attempts

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::engine::ThresholdEngine;
use super::policy::Policy;
use super::record::Decision;
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventKind};
use crate::config::{SettingsProvider, VerifySettings};
use crate::criteria::{CounterCriteria, CounterKey, CounterKind};
use crate::error::Result;
use crate::store::CounterStore;

/// Verification attempt counter for MFA challenges
///
/// Criteria should carry the factor id so attempts are counted per factor.
/// There is no success path: attempts decay once `reset_time_secs` pass
/// without a new failure.
pub struct VerifyAttempts<S> {
    engine: ThresholdEngine<S>,
    settings: Arc<dyn SettingsProvider>,
    audit: AuditDispatcher,
}

impl<S> Clone for VerifyAttempts<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            settings: Arc::clone(&self.settings),
            audit: self.audit.clone(),
        }
    }
}

impl<S: CounterStore> VerifyAttempts<S> {
    /// Create a new verification attempt counter
    pub fn new(engine: ThresholdEngine<S>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            engine,
            settings,
            audit: AuditDispatcher::disabled(),
        }
    }

    /// Report exhausted attempts to an audit dispatcher
    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    /// Whether another verification may be attempted
    ///
    /// Use [`Decision::into_result`] to turn a denial into an error.
    pub async fn check_verify_attempt(&self, criteria: &CounterCriteria) -> Result<Decision> {
        self.check_verify_attempt_at(criteria, Utc::now()).await
    }

    /// [`check_verify_attempt`](Self::check_verify_attempt) as of `now`
    pub async fn check_verify_attempt_at(
        &self,
        criteria: &CounterCriteria,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.verify_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }
        let policy = Policy::Verify(settings.policy());
        Ok(self.engine.evaluate(&key(criteria), &policy, now).await?)
    }

    /// Record a failed verification
    pub async fn increment_attempt(&self, criteria: &CounterCriteria) -> Result<Decision> {
        self.increment_attempt_at(criteria, Utc::now()).await
    }

    /// [`increment_attempt`](Self::increment_attempt) as of `now`
    pub async fn increment_attempt_at(
        &self,
        criteria: &CounterCriteria,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.verify_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }

        let policy = Policy::Verify(settings.policy());
        let decision = self.engine.on_failure(&key(criteria), &policy, now).await?;
        debug!(
            subject = %criteria.subject,
            factor = ?criteria.factor,
            attempts = decision.attempts,
            "Verification failure recorded"
        );

        if !decision.allowed && decision.attempts == decision.max_attempts {
            warn!(
                subject = %criteria.subject,
                factor = ?criteria.factor,
                attempts = decision.attempts,
                "Verification attempts exhausted"
            );
            let mut event = AuditEvent::new(AuditEventKind::VerifyAttemptsExhausted, criteria.subject.clone())
                .with_reference(criteria.reference.clone())
                .with_client(criteria.client.as_deref())
                .with_failure("verification attempts exhausted")
                .with_attribute("attempts", decision.attempts);
            if let Some(factor) = &criteria.factor {
                event = event.with_attribute("factor", factor.clone());
            }
            self.audit.report(event);
        }

        Ok(decision)
    }

    fn verify_settings(&self, criteria: &CounterCriteria) -> VerifySettings {
        self.settings
            .settings_for(&criteria.reference, criteria.client.as_deref())
            .verify
    }
}

fn key(criteria: &CounterCriteria) -> CounterKey {
    CounterKey::new(CounterKind::Verify, criteria.clone())
}
