//! Threshold counter engine
//!
//! One engine serves all three counter kinds. The [`Policy`] passed on each
//! call selects the semantics; the engine only owns the read-decide-write
//! sequence against the store and its recovery from concurrent writers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::policy::Policy;
use super::record::Decision;
use crate::criteria::CounterKey;
use crate::store::{CounterStore, StoreError, StoreOperation, StoreResult};

/// Write attempts before a persistent create/update race is reported
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Keyed counter engine over a [`CounterStore`]
///
/// Every decision is based on a fresh read; nothing is cached in process.
///
/// # Example
///
/// ```rust,ignore
/// let engine = ThresholdEngine::new(Arc::new(MemoryCounterStore::new()));
/// let decision = engine.on_failure(&key, &policy, Utc::now()).await?;
/// if !decision.allowed {
///     // locked, see decision.retry_after_secs
/// }
/// ```
pub struct ThresholdEngine<S> {
    store: Arc<S>,
    operation_timeout: Option<Duration>,
}

impl<S> Clone for ThresholdEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            operation_timeout: self.operation_timeout,
        }
    }
}

impl<S: CounterStore> ThresholdEngine<S> {
    /// Create an engine over a shared store
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            operation_timeout: None,
        }
    }

    /// Bound every store call; an elapsed call fails with a `Timeout` store error
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current decision for a key without recording an event
    pub async fn evaluate(
        &self,
        key: &CounterKey,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> StoreResult<Decision> {
        if policy.is_misconfigured() {
            warn!(key = %key, "Counter policy misconfigured, denying request");
            return Ok(Decision::misconfigured());
        }

        let live = self
            .timed(StoreOperation::Find, self.store.find(key))
            .await?
            .and_then(|record| policy.refresh(record, now));
        Ok(policy.decide(live.as_ref(), now))
    }

    /// Record one failure (or one consumed rate-limit event) and persist it
    ///
    /// Two callers racing on a cold key may both try to create the record.
    /// The loser sees `AlreadyExists`, re-reads and applies its event to the
    /// winner's record, so no event is lost and the caller never sees the
    /// conflict. The same applies to an update racing a delete.
    pub async fn on_failure(
        &self,
        key: &CounterKey,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> StoreResult<Decision> {
        if policy.is_misconfigured() {
            warn!(key = %key, "Counter policy misconfigured, denying request");
            return Ok(Decision::misconfigured());
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let stored = self.timed(StoreOperation::Find, self.store.find(key)).await?;
            let exists = stored.is_some();
            let live = stored.and_then(|record| policy.refresh(record, now));
            let next = policy.apply_failure(live, key, now);

            let written = if exists {
                self.timed(StoreOperation::Update, self.store.update(next)).await
            } else {
                self.timed(StoreOperation::Create, self.store.create(next)).await
            };

            match written {
                Ok(record) => {
                    debug!(
                        key = %key,
                        attempts = record.attempts,
                        allowed = record.allow_request,
                        "Counter event recorded"
                    );
                    return Ok(policy.decide(Some(&record), now));
                }
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    if attempt >= MAX_WRITE_ATTEMPTS {
                        warn!(
                            key = %key,
                            attempts = attempt,
                            "Counter write kept conflicting with concurrent writers"
                        );
                        return Err(StoreError::conflict(
                            e.operation,
                            format!("Gave up after {} conflicting writes", attempt),
                        )
                        .with_entity("CounterRecord", key.storage_key()));
                    }
                    debug!(
                        key = %key,
                        attempt = attempt,
                        error = %e,
                        "Concurrent counter write detected, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record a success
    ///
    /// Login and RateLimit delete the record; Verify has no success path and
    /// only decays with time. Returns whether a record was deleted.
    pub async fn on_success(&self, key: &CounterKey, policy: &Policy) -> StoreResult<bool> {
        if !policy.resets_on_success() {
            return Ok(false);
        }
        self.reset(key).await
    }

    /// Delete the record for a key; absence is not an error
    pub async fn reset(&self, key: &CounterKey) -> StoreResult<bool> {
        let deleted = self.timed(StoreOperation::Delete, self.store.delete(key)).await?;
        debug!(key = %key, deleted = deleted, "Counter reset");
        Ok(deleted)
    }

    async fn timed<T>(
        &self,
        operation: StoreOperation,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                StoreError::timeout(operation, format!("Store call exceeded {:?}", limit))
            })?,
            None => call.await,
        }
    }
}
