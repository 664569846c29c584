//! Password reuse prevention
//!
//! [`PasswordHistoryGuard`] keeps the last `old_passwords` encoded passwords
//! of each user and rejects a new password that matches any of them. The
//! comparison goes through the [`CredentialComparator`] on the blocking
//! pool, never through string equality.
//!
//! # Example
//!
//! ```rust,ignore
//! let comparator = Argon2Comparator::from_config(&config)?;
//! let guard = PasswordHistoryGuard::new(store, Arc::new(comparator), Arc::new(config))
//!     .with_audit(audit);
//!
//! // In the password change handler, before updating the credential:
//! guard.add_password_to_history(&reference, &user_id, &new_password).await?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditDispatcher, AuditEvent, AuditEventKind};
use crate::config::{PasswordHistorySettings, SettingsProvider};
use crate::credential::CredentialComparator;
use crate::criteria::Reference;
use crate::error::{Error, Result};
use crate::store::PasswordHistoryStore;

/// One remembered password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    /// Entry id
    pub id: Uuid,
    /// Owner of the user account
    pub reference: Reference,
    /// User the password belonged to
    pub user_id: String,
    /// Encoded password, never the raw value
    pub encoded_password: String,
    /// When the password was set
    pub created_at: DateTime<Utc>,
}

impl PasswordHistoryEntry {
    /// Create an entry with a fresh id
    pub fn new(
        reference: Reference,
        user_id: impl Into<String>,
        encoded_password: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            reference,
            user_id: user_id.into(),
            encoded_password: encoded_password.into(),
            created_at,
        }
    }
}

/// Password history guard
pub struct PasswordHistoryGuard<S> {
    store: Arc<S>,
    comparator: Arc<dyn CredentialComparator>,
    settings: Arc<dyn SettingsProvider>,
    audit: AuditDispatcher,
}

impl<S> Clone for PasswordHistoryGuard<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            comparator: Arc::clone(&self.comparator),
            settings: Arc::clone(&self.settings),
            audit: self.audit.clone(),
        }
    }
}

impl<S: PasswordHistoryStore> PasswordHistoryGuard<S> {
    /// Create a guard over a history store
    pub fn new(
        store: Arc<S>,
        comparator: Arc<dyn CredentialComparator>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            store,
            comparator,
            settings,
            audit: AuditDispatcher::disabled(),
        }
    }

    /// Report history outcomes to an audit dispatcher
    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = audit;
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether `candidate` matches one of the user's remembered passwords
    ///
    /// `false` without touching the store when history is disabled or there
    /// is no candidate.
    pub async fn password_already_used(
        &self,
        reference: &Reference,
        user_id: &str,
        candidate: Option<&str>,
    ) -> Result<bool> {
        let settings = self.history_settings(reference);
        let Some(candidate) = candidate else {
            return Ok(false);
        };
        if !settings.enabled {
            return Ok(false);
        }

        let entries = self.store.find_by_user(reference, user_id).await?;
        self.matches_any(candidate, &entries).await
    }

    /// Remember a new password, rejecting it if it was used before
    ///
    /// Returns `Ok(None)` when history is disabled. The reuse check happens
    /// before any mutation; when the user is at the bound the oldest entry
    /// is deleted before the new one is inserted.
    pub async fn add_password_to_history(
        &self,
        reference: &Reference,
        user_id: &str,
        raw_password: &str,
    ) -> Result<Option<PasswordHistoryEntry>> {
        let settings = self.history_settings(reference);
        if !settings.enabled {
            return Ok(None);
        }

        let result = self.record(reference, user_id, raw_password, &settings).await;
        let event = |kind| {
            AuditEvent::new(kind, user_id)
                .with_reference(reference.clone())
                .with_attribute("history_size", settings.old_passwords)
        };

        match &result {
            Ok(entry) => {
                info!(reference = %reference, user_id = %user_id, "Password added to history");
                self.audit.report(
                    event(AuditEventKind::PasswordHistoryCreated)
                        .with_attribute("entry_id", entry.id.to_string()),
                );
            }
            Err(Error::PasswordInHistory { .. }) => {
                info!(reference = %reference, user_id = %user_id, "Password reuse rejected");
                self.audit.report(
                    event(AuditEventKind::PasswordReuseRejected)
                        .with_failure("password already in history"),
                );
            }
            Err(e) => {
                warn!(reference = %reference, user_id = %user_id, error = %e, "Password history update failed");
                self.audit
                    .report(event(AuditEventKind::PasswordHistoryCreated).with_failure(e.to_string()));
            }
        }

        result.map(Some)
    }

    async fn record(
        &self,
        reference: &Reference,
        user_id: &str,
        raw_password: &str,
        settings: &PasswordHistorySettings,
    ) -> Result<PasswordHistoryEntry> {
        let mut entries = self.store.find_by_user(reference, user_id).await?;
        entries.sort_by_key(|e| (e.created_at, e.id));
        if self.matches_any(raw_password, &entries).await? {
            return Err(Error::PasswordInHistory {
                history_size: settings.old_passwords,
            });
        }

        // Oldest first; trims more than one only if the bound was lowered
        let bound = usize::from(settings.old_passwords);
        let excess = (entries.len() + 1).saturating_sub(bound);
        for oldest in entries.iter().take(excess) {
            self.store.delete(&oldest.id).await?;
            debug!(
                user_id = %user_id,
                entry_id = %oldest.id,
                "Evicted oldest password history entry"
            );
        }

        let comparator = Arc::clone(&self.comparator);
        let raw = raw_password.to_string();
        let encoded = tokio::task::spawn_blocking(move || comparator.encode(&raw)).await??;

        let entry = PasswordHistoryEntry::new(reference.clone(), user_id, encoded, Utc::now());
        Ok(self.store.create(entry).await?)
    }

    async fn matches_any(&self, candidate: &str, entries: &[PasswordHistoryEntry]) -> Result<bool> {
        if entries.is_empty() {
            return Ok(false);
        }

        let comparator = Arc::clone(&self.comparator);
        let candidate = candidate.to_string();
        let encoded: Vec<String> = entries.iter().map(|e| e.encoded_password.clone()).collect();

        tokio::task::spawn_blocking(move || -> Result<bool> {
            for value in &encoded {
                if comparator.matches(&candidate, value)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await?
    }

    fn history_settings(&self, reference: &Reference) -> PasswordHistorySettings {
        self.settings.settings_for(reference, None).password_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::{AuditConfig, GuardSettings};
    use crate::credential::{Argon2Comparator, Argon2Settings};
    use crate::store::{MemoryPasswordHistoryStore, StoreResult};
    use std::time::Duration;

    fn guard(enabled: bool, old_passwords: u16) -> PasswordHistoryGuard<MemoryPasswordHistoryStore> {
        let mut settings = GuardSettings::default();
        settings.password_history = PasswordHistorySettings {
            enabled,
            old_passwords,
        };
        let comparator = Argon2Comparator::new(&Argon2Settings {
            memory_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        })
        .unwrap();
        PasswordHistoryGuard::new(
            Arc::new(MemoryPasswordHistoryStore::new()),
            Arc::new(comparator),
            Arc::new(settings),
        )
    }

    /// Returns entries newest first
    struct NewestFirst(MemoryPasswordHistoryStore);

    impl PasswordHistoryStore for NewestFirst {
        async fn find_by_user(
            &self,
            reference: &Reference,
            user_id: &str,
        ) -> StoreResult<Vec<PasswordHistoryEntry>> {
            let mut entries = self.0.find_by_user(reference, user_id).await?;
            entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
            Ok(entries)
        }

        async fn create(&self, entry: PasswordHistoryEntry) -> StoreResult<PasswordHistoryEntry> {
            self.0.create(entry).await
        }

        async fn delete(&self, id: &Uuid) -> StoreResult<bool> {
            self.0.delete(id).await
        }
    }

    fn acme() -> Reference {
        Reference::domain("acme")
    }

    #[tokio::test]
    async fn test_reuse_is_rejected() {
        let guard = guard(true, 3);
        guard.add_password_to_history(&acme(), "u1", "first").await.unwrap();

        assert!(guard.password_already_used(&acme(), "u1", Some("first")).await.unwrap());
        assert!(!guard.password_already_used(&acme(), "u1", Some("second")).await.unwrap());

        let err = guard.add_password_to_history(&acme(), "u1", "first").await.unwrap_err();
        assert!(matches!(err, Error::PasswordInHistory { history_size: 3 }));
        assert_eq!(guard.store().len(), 1);
    }

    #[tokio::test]
    async fn test_stores_encoded_value() {
        let guard = guard(true, 3);
        let entry = guard
            .add_password_to_history(&acme(), "u1", "secret")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(entry.encoded_password, "secret");
        assert!(entry.encoded_password.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn test_bound_evicts_single_oldest() {
        let guard = guard(true, 2);
        guard.add_password_to_history(&acme(), "u1", "one").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        guard.add_password_to_history(&acme(), "u1", "two").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        guard.add_password_to_history(&acme(), "u1", "three").await.unwrap();

        assert_eq!(guard.store().len(), 2);
        // "one" was evicted and may be used again
        assert!(!guard.password_already_used(&acme(), "u1", Some("one")).await.unwrap());
        assert!(guard.password_already_used(&acme(), "u1", Some("two")).await.unwrap());
    }

    #[tokio::test]
    async fn test_eviction_follows_creation_time_not_store_order() {
        let template = guard(true, 2);
        let guard = PasswordHistoryGuard::new(
            Arc::new(NewestFirst(MemoryPasswordHistoryStore::new())),
            Arc::clone(&template.comparator),
            Arc::clone(&template.settings),
        );
        for password in ["one", "two", "three"] {
            guard.add_password_to_history(&acme(), "u1", password).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(guard.store().0.len(), 2);
        assert!(!guard.password_already_used(&acme(), "u1", Some("one")).await.unwrap());
        assert!(guard.password_already_used(&acme(), "u1", Some("two")).await.unwrap());
        assert!(guard.password_already_used(&acme(), "u1", Some("three")).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_skips_store() {
        let guard = guard(false, 3);
        assert!(guard.add_password_to_history(&acme(), "u1", "pw").await.unwrap().is_none());
        assert!(!guard.password_already_used(&acme(), "u1", Some("pw")).await.unwrap());
        assert!(guard.store().is_empty());
    }

    #[tokio::test]
    async fn test_missing_candidate_is_not_used() {
        let guard = guard(true, 3);
        guard.add_password_to_history(&acme(), "u1", "pw").await.unwrap();
        assert!(!guard.password_already_used(&acme(), "u1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_histories_are_per_user() {
        let guard = guard(true, 3);
        guard.add_password_to_history(&acme(), "u1", "shared").await.unwrap();
        assert!(guard.add_password_to_history(&acme(), "u2", "shared").await.is_ok());
    }

    #[tokio::test]
    async fn test_outcomes_are_audited() {
        let sink = MemoryAuditSink::new();
        let audit = AuditDispatcher::spawn(&AuditConfig::default(), Arc::new(sink.clone()));
        let guard = guard(true, 3).with_audit(audit);

        guard.add_password_to_history(&acme(), "u1", "pw").await.unwrap();
        let _ = guard.add_password_to_history(&acme(), "u1", "pw").await;

        for _ in 0..100 {
            if sink.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AuditEventKind::PasswordHistoryCreated);
        assert_eq!(events[1].kind, AuditEventKind::PasswordReuseRejected);
        assert_eq!(events[1].subject, "u1");
    }
}
