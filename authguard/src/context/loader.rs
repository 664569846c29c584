//! Consistency retry loader for flow contexts
//!
//! A flow step that just saved its context may be followed by a step served
//! from a replica that has not caught up. [`ContextLoader::load_context`]
//! refuses to hand out a version older than the caller expects: it retries
//! with a linear backoff (`retry_interval * (retry + 1)`) and fails with
//! [`Error::StaleContext`] once `max_retries` retries are exhausted.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::AuthenticationFlowContext;
use crate::config::ConsistencySettings;
use crate::counter::after;
use crate::error::{Error, Result};
use crate::store::ContextStore;

/// Result of a consuming read
///
/// The cleanup task deletes the context whatever the outcome of the load.
/// Its result is logged only; await the handle in tests to observe it.
#[derive(Debug)]
pub struct ConsumedContext {
    /// The loaded context or the load failure
    pub context: Result<AuthenticationFlowContext>,
    /// Detached best-effort delete
    pub cleanup: JoinHandle<()>,
}

/// Loads flow contexts without ever going back in version
pub struct ContextLoader<S> {
    store: Arc<S>,
    settings: ConsistencySettings,
}

impl<S> Clone for ContextLoader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
        }
    }
}

impl<S: ContextStore> ContextLoader<S> {
    /// Create a loader over a context store
    pub fn new(store: Arc<S>, settings: ConsistencySettings) -> Self {
        Self { store, settings }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load the latest context for a transaction
    ///
    /// An absent context is synthesized with `version = 0` and not persisted.
    /// A non-zero version below `expected_version` is a stale read and is
    /// retried; any store failure propagates immediately without counting
    /// as a retry.
    pub async fn load_context(
        &self,
        transaction_id: &str,
        expected_version: u64,
    ) -> Result<AuthenticationFlowContext> {
        let mut retry: u32 = 0;
        loop {
            let context = self
                .store
                .find_last(transaction_id)
                .await?
                .unwrap_or_else(|| AuthenticationFlowContext::new(transaction_id, Utc::now()));

            if context.version == 0 || context.version >= expected_version {
                if retry > 0 {
                    debug!(
                        transaction_id = %transaction_id,
                        version = context.version,
                        retry = retry,
                        "Flow context caught up after retry"
                    );
                }
                return Ok(context);
            }

            if retry >= self.settings.max_retries {
                warn!(
                    transaction_id = %transaction_id,
                    expected_version = expected_version,
                    found_version = context.version,
                    retries = retry,
                    "Flow context still stale after retries"
                );
                return Err(Error::StaleContext {
                    transaction_id: transaction_id.to_string(),
                    expected_version,
                    found_version: context.version,
                });
            }

            let delay = self.settings.retry_interval().saturating_mul(retry + 1);
            debug!(
                transaction_id = %transaction_id,
                expected_version = expected_version,
                found_version = context.version,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "Stale flow context, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// Persist the next version of a context
    ///
    /// Bumps `version` and stamps `created_at` and `expire_at`.
    pub async fn save_context(
        &self,
        mut context: AuthenticationFlowContext,
    ) -> Result<AuthenticationFlowContext> {
        let now = Utc::now();
        context.version = context.version.saturating_add(1);
        context.created_at = now;
        context.expire_at = after(now, self.settings.context_ttl());

        let saved = self.store.create(context).await?;
        debug!(
            transaction_id = %saved.transaction_id,
            version = saved.version,
            "Flow context saved"
        );
        Ok(saved)
    }

    /// Delete every version of a context; absence is not an error
    pub async fn clear_context(&self, transaction_id: &str) -> Result<()> {
        let deleted = self.store.delete(transaction_id).await?;
        debug!(transaction_id = %transaction_id, deleted = deleted, "Flow context cleared");
        Ok(())
    }

    /// Load a context and clear it in the background
    ///
    /// The delete is spawned whether or not the load succeeded; if it fails
    /// the store TTL removes the context eventually.
    pub async fn consume_and_clear(
        &self,
        transaction_id: &str,
        expected_version: u64,
    ) -> ConsumedContext {
        let context = self.load_context(transaction_id, expected_version).await;

        let store = Arc::clone(&self.store);
        let transaction_id = transaction_id.to_string();
        let cleanup = tokio::spawn(async move {
            match store.delete(&transaction_id).await {
                Ok(deleted) => {
                    info!(transaction_id = %transaction_id, deleted = deleted, "Consumed flow context removed")
                }
                Err(e) => warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Failed to remove consumed flow context"
                ),
            }
        });

        ConsumedContext { context, cleanup }
    }

    /// Load a context for the last step of a flow and clear it
    pub async fn remove_context(
        &self,
        transaction_id: &str,
        expected_version: u64,
    ) -> Result<AuthenticationFlowContext> {
        self.consume_and_clear(transaction_id, expected_version).await.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryContextStore, StoreError, StoreOperation, StoreResult};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns scripted versions, one per read; the last one repeats
    struct ScriptedStore {
        versions: Mutex<VecDeque<u64>>,
        reads: AtomicUsize,
        deletes: AtomicUsize,
        fail_reads: bool,
    }

    impl ScriptedStore {
        fn new(versions: &[u64]) -> Self {
            Self {
                versions: Mutex::new(versions.iter().copied().collect()),
                reads: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                fail_reads: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_reads: true,
                ..Self::new(&[])
            }
        }
    }

    impl ContextStore for ScriptedStore {
        async fn find_last(&self, transaction_id: &str) -> StoreResult<Option<AuthenticationFlowContext>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(StoreError::connection_failed("replica unavailable"));
            }
            let mut versions = self.versions.lock().unwrap();
            let version = if versions.len() > 1 {
                versions.pop_front()
            } else {
                versions.front().copied()
            };
            Ok(version.map(|version| {
                let mut context = AuthenticationFlowContext::new(transaction_id, Utc::now());
                context.version = version;
                context
            }))
        }

        async fn create(&self, context: AuthenticationFlowContext) -> StoreResult<AuthenticationFlowContext> {
            Ok(context)
        }

        async fn delete(&self, _transaction_id: &str) -> StoreResult<bool> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::backend_error(StoreOperation::Delete, "delete rejected"))
        }
    }

    fn settings() -> ConsistencySettings {
        ConsistencySettings {
            max_retries: 2,
            retry_interval_ms: 1000,
            context_ttl_secs: 300,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_final_retry() {
        let store = Arc::new(ScriptedStore::new(&[4, 4, 5]));
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let started = tokio::time::Instant::now();
        let context = loader.load_context("tx-1", 5).await.unwrap();
        assert_eq!(context.version, 5);
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
        // 1000ms then 2000ms
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_when_never_caught_up() {
        let store = Arc::new(ScriptedStore::new(&[4]));
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let err = loader.load_context("tx-1", 5).await.unwrap_err();
        assert!(matches!(
            err,
            Error::StaleContext { expected_version: 5, found_version: 4, .. }
        ));
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_absent_context_is_synthesized() {
        let store = Arc::new(MemoryContextStore::new());
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let context = loader.load_context("tx-1", 3).await.unwrap();
        assert_eq!(context.version, 0);
        assert!(!store.contains("tx-1"));
    }

    #[tokio::test]
    async fn test_newer_version_is_accepted() {
        let store = Arc::new(ScriptedStore::new(&[7]));
        let loader = ContextLoader::new(Arc::clone(&store), settings());
        assert_eq!(loader.load_context("tx-1", 5).await.unwrap().version, 7);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_retried() {
        let store = Arc::new(ScriptedStore::failing());
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let err = loader.load_context("tx-1", 1).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let store = Arc::new(MemoryContextStore::new());
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let mut context = loader.load_context("tx-1", 0).await.unwrap();
        context.insert("username", "alice");
        let saved = loader.save_context(context).await.unwrap();
        assert_eq!(saved.version, 1);
        assert!(saved.expire_at > saved.created_at);

        let loaded = loader.load_context("tx-1", 1).await.unwrap();
        assert_eq!(loaded.get("username"), Some(&serde_json::Value::from("alice")));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = Arc::new(MemoryContextStore::new());
        let loader = ContextLoader::new(Arc::clone(&store), settings());
        loader
            .save_context(AuthenticationFlowContext::new("tx-1", Utc::now()))
            .await
            .unwrap();

        loader.clear_context("tx-1").await.unwrap();
        loader.clear_context("tx-1").await.unwrap();
        assert!(!store.contains("tx-1"));
    }

    #[tokio::test]
    async fn test_consume_clears_in_background() {
        let store = Arc::new(MemoryContextStore::new());
        let loader = ContextLoader::new(Arc::clone(&store), settings());
        loader
            .save_context(AuthenticationFlowContext::new("tx-1", Utc::now()))
            .await
            .unwrap();

        let consumed = loader.consume_and_clear("tx-1", 1).await;
        assert_eq!(consumed.context.unwrap().version, 1);
        consumed.cleanup.await.unwrap();
        assert!(!store.contains("tx-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_clears_even_when_load_fails() {
        let store = Arc::new(ScriptedStore::new(&[1]));
        let loader = ContextLoader::new(Arc::clone(&store), settings());

        let consumed = loader.consume_and_clear("tx-1", 2).await;
        assert!(consumed.context.is_err());
        // A failing delete is logged, never raised
        consumed.cleanup.await.unwrap();
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_context_ignores_delete_failure() {
        let store = Arc::new(ScriptedStore::new(&[2]));
        let loader = ContextLoader::new(Arc::clone(&store), settings());
        assert_eq!(loader.remove_context("tx-1", 2).await.unwrap().version, 2);
    }
}
