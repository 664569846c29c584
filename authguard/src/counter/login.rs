//! Failed-login lockout
//!
//! [`LoginAttempts`] applies the Login policy of the engine for one
//! `(domain, client, identity provider, username)` criteria, resolving the
//! thresholds from the [`SettingsProvider`] on every call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::engine::ThresholdEngine;
use super::policy::Policy;
use super::record::Decision;
use crate::audit::{AuditDispatcher, AuditEvent, AuditEventKind};
use crate::config::{LoginSettings, SettingsProvider};
use crate::criteria::{CounterCriteria, CounterKey, CounterKind};
use crate::error::{Error, Result};
use crate::store::CounterStore;

/// Reason an account was unlocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnlockReason {
    /// A successful login cleared the lockout
    SuccessfulLogin,
    /// An administrator manually unlocked the account
    AdminAction,
}

impl std::fmt::Display for UnlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SuccessfulLogin => write!(f, "successful_login"),
            Self::AdminAction => write!(f, "admin_action"),
        }
    }
}

/// Login lockout service
///
/// Construct once at startup and share it; it is cheap to clone.
///
/// # Example
///
/// ```rust,ignore
/// let login = LoginAttempts::new(engine, Arc::new(config)).with_audit(audit);
///
/// // In your login handler:
/// login.ensure_unlocked(&criteria).await?;
/// match authenticate(&creds).await {
///     Ok(user) => { login.login_succeeded(&criteria).await?; Ok(user) }
///     Err(_) => {
///         login.login_failed(&criteria).await?;
///         Err(Error::NotFound("Invalid credentials".into()))
///     }
/// }
/// ```
pub struct LoginAttempts<S> {
    engine: ThresholdEngine<S>,
    settings: Arc<dyn SettingsProvider>,
    audit: AuditDispatcher,
}

impl<S> Clone for LoginAttempts<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            settings: Arc::clone(&self.settings),
            audit: self.audit.clone(),
        }
    }
}

impl<S: CounterStore> LoginAttempts<S> {
    /// Create a new login lockout service
    pub fn new(engine: ThresholdEngine<S>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            engine,
            settings,
            audit: AuditDispatcher::disabled(),
        }
    }

    /// Report lock and unlock events to an audit dispatcher
    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    /// Current lockout state without recording a failure
    pub async fn check_account(&self, criteria: &CounterCriteria) -> Result<Decision> {
        self.check_account_at(criteria, Utc::now()).await
    }

    /// [`check_account`](Self::check_account) as of `now`
    pub async fn check_account_at(
        &self,
        criteria: &CounterCriteria,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.login_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }
        let policy = Policy::Login(settings.policy());
        Ok(self.engine.evaluate(&key(criteria), &policy, now).await?)
    }

    /// Fail with [`Error::AccountLocked`] if the account is locked
    pub async fn ensure_unlocked(&self, criteria: &CounterCriteria) -> Result<()> {
        let now = Utc::now();
        let decision = self.check_account_at(criteria, now).await?;
        match decision.record.as_ref().and_then(|r| r.locked_until()) {
            Some(unlock_at) => Err(Error::AccountLocked {
                unlock_at,
                retry_after_secs: decision.retry_after_secs,
            }),
            None => Ok(()),
        }
    }

    /// Record a failed login
    ///
    /// The failure that reaches `max_attempts` locks the account and is
    /// audited; failures during an active lock are counted but do not
    /// extend it.
    pub async fn login_failed(&self, criteria: &CounterCriteria) -> Result<Decision> {
        self.login_failed_at(criteria, Utc::now()).await
    }

    /// [`login_failed`](Self::login_failed) as of `now`
    pub async fn login_failed_at(
        &self,
        criteria: &CounterCriteria,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let settings = self.login_settings(criteria);
        if !settings.enabled {
            return Ok(Decision::unrestricted());
        }

        let policy = Policy::Login(settings.policy());
        let decision = self.engine.on_failure(&key(criteria), &policy, now).await?;

        debug!(
            subject = %criteria.subject,
            reference = %criteria.reference,
            attempts = decision.attempts,
            max_attempts = decision.max_attempts,
            "Login failure recorded"
        );

        if !decision.allowed && decision.attempts == decision.max_attempts {
            warn!(
                subject = %criteria.subject,
                reference = %criteria.reference,
                attempts = decision.attempts,
                lockout_duration_secs = settings.account_blocked_duration_secs,
                "Account locked due to repeated login failures"
            );
            self.audit.report(
                event(AuditEventKind::AccountLocked, criteria)
                    .with_attribute("attempts", decision.attempts)
                    .with_attribute("lockout_duration_secs", settings.account_blocked_duration_secs),
            );
        }

        Ok(decision)
    }

    /// Record a successful login, clearing all lockout state
    pub async fn login_succeeded(&self, criteria: &CounterCriteria) -> Result<()> {
        let settings = self.login_settings(criteria);
        if !settings.enabled {
            return Ok(());
        }
        self.clear(criteria, &settings, UnlockReason::SuccessfulLogin).await
    }

    /// Manually unlock an account (admin action)
    ///
    /// Applies even when lockout is disabled, so state left over from an
    /// earlier configuration can be cleared.
    pub async fn unlock(&self, criteria: &CounterCriteria) -> Result<()> {
        let settings = self.login_settings(criteria);
        self.clear(criteria, &settings, UnlockReason::AdminAction).await
    }

    async fn clear(
        &self,
        criteria: &CounterCriteria,
        settings: &LoginSettings,
        reason: UnlockReason,
    ) -> Result<()> {
        let key = key(criteria);
        let policy = Policy::Login(settings.policy());

        let was_locked = !self.engine.evaluate(&key, &policy, Utc::now()).await?.allowed;
        self.engine.on_success(&key, &policy).await?;

        if was_locked || reason == UnlockReason::AdminAction {
            info!(
                subject = %criteria.subject,
                reference = %criteria.reference,
                reason = %reason,
                "Account unlocked"
            );
            self.audit.report(
                event(AuditEventKind::AccountUnlocked, criteria)
                    .with_attribute("reason", reason.to_string()),
            );
        }
        Ok(())
    }

    fn login_settings(&self, criteria: &CounterCriteria) -> LoginSettings {
        self.settings
            .settings_for(&criteria.reference, criteria.client.as_deref())
            .login
    }
}

fn key(criteria: &CounterCriteria) -> CounterKey {
    CounterKey::new(CounterKind::Login, criteria.clone())
}

fn event(kind: AuditEventKind, criteria: &CounterCriteria) -> AuditEvent {
    AuditEvent::new(kind, criteria.subject.clone())
        .with_reference(criteria.reference.clone())
        .with_client(criteria.client.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::{AuditConfig, GuardSettings};
    use crate::criteria::Reference;
    use crate::store::MemoryCounterStore;
    use chrono::TimeDelta;
    use std::time::Duration;

    fn settings(max_attempts: u32, blocked_secs: u64) -> GuardSettings {
        let mut settings = GuardSettings::default();
        settings.login.max_attempts = max_attempts;
        settings.login.account_blocked_duration_secs = blocked_secs;
        settings
    }

    fn service(settings: GuardSettings) -> LoginAttempts<MemoryCounterStore> {
        LoginAttempts::new(
            ThresholdEngine::new(Arc::new(MemoryCounterStore::new())),
            Arc::new(settings),
        )
    }

    fn criteria() -> CounterCriteria {
        CounterCriteria::new(Reference::domain("acme"), "alice")
            .with_client("web")
            .with_identity_provider("default-idp")
    }

    async fn wait_for(sink: &MemoryAuditSink, count: usize) {
        for _ in 0..100 {
            if sink.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} audit events, got {}", count, sink.len());
    }

    #[tokio::test]
    async fn test_locks_on_third_failure() {
        let login = service(settings(3, 60));
        let now = Utc::now();

        assert!(login.login_failed_at(&criteria(), now).await.unwrap().allowed);
        assert!(login.login_failed_at(&criteria(), now).await.unwrap().allowed);
        let third = login.login_failed_at(&criteria(), now).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.retry_after_secs, 60);
    }

    #[tokio::test]
    async fn test_counting_restarts_after_lock_expires() {
        let login = service(settings(3, 60));
        let now = Utc::now();
        for _ in 0..3 {
            login.login_failed_at(&criteria(), now).await.unwrap();
        }

        let later = now + TimeDelta::seconds(61);
        let decision = login.login_failed_at(&criteria(), later).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeded_clears_state() {
        let login = service(settings(3, 60));
        login.login_failed(&criteria()).await.unwrap();
        login.login_succeeded(&criteria()).await.unwrap();

        let decision = login.check_account(&criteria()).await.unwrap();
        assert!(decision.record.is_none());
        assert_eq!(decision.attempts, 0);
    }

    #[tokio::test]
    async fn test_ensure_unlocked_reports_lock() {
        let login = service(settings(1, 60));
        login.login_failed(&criteria()).await.unwrap();

        match login.ensure_unlocked(&criteria()).await {
            Err(Error::AccountLocked { retry_after_secs, .. }) => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            other => panic!("Expected AccountLocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let mut settings = settings(1, 60);
        settings.login.enabled = false;
        let login = service(settings);

        let decision = login.login_failed(&criteria()).await.unwrap();
        assert!(decision.allowed);
        assert!(login.engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_criteria_are_isolated() {
        let login = service(settings(1, 60));
        login.login_failed(&criteria()).await.unwrap();

        let other_client = CounterCriteria::new(Reference::domain("acme"), "alice").with_client("mobile");
        assert!(login.check_account(&other_client).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_lock_and_unlock_are_audited() {
        let sink = MemoryAuditSink::new();
        let audit = AuditDispatcher::spawn(&AuditConfig::default(), Arc::new(sink.clone()));
        let login = service(settings(2, 60)).with_audit(audit);

        login.login_failed(&criteria()).await.unwrap();
        login.login_failed(&criteria()).await.unwrap();
        // Failures during the lock are not audited again
        login.login_failed(&criteria()).await.unwrap();
        login.unlock(&criteria()).await.unwrap();

        wait_for(&sink, 2).await;
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditEventKind::AccountLocked);
        assert_eq!(events[1].kind, AuditEventKind::AccountUnlocked);
        assert_eq!(events[1].metadata["reason"], "admin_action");
        assert_eq!(events[0].client.as_deref(), Some("web"));
    }
}
