//! Store trait definitions
//!
//! Persistence is an external collaborator. These traits describe what the
//! engine, the context loader and the history guard need from it, using
//! RPITIT (Return Position Impl Trait In Traits) so implementations can be
//! written with plain `async fn`.
//!
//! Every `find*` method reports absence as `Ok(None)` (or an empty list),
//! never as an error. Writes report a duplicate key as
//! [`StoreErrorKind::AlreadyExists`](super::StoreErrorKind::AlreadyExists)
//! and a missing record as [`StoreErrorKind::NotFound`](super::StoreErrorKind::NotFound)
//! so callers can recover from concurrent writers.
//!
//! # Example
//!
//! ```rust,ignore
//! use authguard::store::{CounterStore, StoreResult};
//!
//! struct PgCounterStore { pool: PgPool }
//!
//! impl CounterStore for PgCounterStore {
//!     async fn find(&self, key: &CounterKey) -> StoreResult<Option<CounterRecord>> {
//!         // SELECT ... WHERE key = $1
//!         todo!()
//!     }
//!     // ... other methods
//! }
//! ```

use std::future::Future;

use uuid::Uuid;

use super::error::StoreResult;
use crate::context::AuthenticationFlowContext;
use crate::counter::CounterRecord;
use crate::criteria::{CounterKey, Reference};
use crate::password_history::PasswordHistoryEntry;

/// Persistence for counter records (Login, Verify, RateLimit)
///
/// Implementations must keep at most one record per key: `create` on a key
/// that already holds a record fails with `AlreadyExists` instead of
/// overwriting it.
pub trait CounterStore: Send + Sync + 'static {
    /// Find the record for a key
    fn find(&self, key: &CounterKey)
        -> impl Future<Output = StoreResult<Option<CounterRecord>>> + Send;

    /// Insert a record; `AlreadyExists` if the key is taken
    fn create(&self, record: CounterRecord)
        -> impl Future<Output = StoreResult<CounterRecord>> + Send;

    /// Replace the record for its key; `NotFound` if it is gone
    fn update(&self, record: CounterRecord)
        -> impl Future<Output = StoreResult<CounterRecord>> + Send;

    /// Delete the record for a key
    ///
    /// Returns `true` if a record was deleted, `false` if none existed.
    fn delete(&self, key: &CounterKey) -> impl Future<Output = StoreResult<bool>> + Send;
}

/// Persistence for authentication flow contexts
pub trait ContextStore: Send + Sync + 'static {
    /// Most recent context (highest version) for a transaction
    fn find_last(
        &self,
        transaction_id: &str,
    ) -> impl Future<Output = StoreResult<Option<AuthenticationFlowContext>>> + Send;

    /// Persist a context version
    fn create(
        &self,
        context: AuthenticationFlowContext,
    ) -> impl Future<Output = StoreResult<AuthenticationFlowContext>> + Send;

    /// Delete every version for a transaction
    ///
    /// Returns `true` if anything was deleted.
    fn delete(&self, transaction_id: &str) -> impl Future<Output = StoreResult<bool>> + Send;
}

/// Persistence for password history entries
pub trait PasswordHistoryStore: Send + Sync + 'static {
    /// Every entry for a user, oldest first
    fn find_by_user(
        &self,
        reference: &Reference,
        user_id: &str,
    ) -> impl Future<Output = StoreResult<Vec<PasswordHistoryEntry>>> + Send;

    /// Insert an entry
    fn create(
        &self,
        entry: PasswordHistoryEntry,
    ) -> impl Future<Output = StoreResult<PasswordHistoryEntry>> + Send;

    /// Delete one entry by id
    fn delete(&self, id: &Uuid) -> impl Future<Output = StoreResult<bool>> + Send;
}
