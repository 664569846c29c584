//! In-memory stores
//!
//! `DashMap`-backed implementations of the store traits. They honour the same
//! conflict contract as a real backend (duplicate create fails, update of a
//! missing record fails) and are used for single-process deployments and
//! tests. They do not expire records on their own; call `purge_expired` from
//! a background task to emulate a store TTL.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::error::{StoreError, StoreOperation, StoreResult};
use super::traits::{ContextStore, CounterStore, PasswordHistoryStore};
use crate::context::AuthenticationFlowContext;
use crate::counter::CounterRecord;
use crate::criteria::{CounterKey, Reference};
use crate::password_history::PasswordHistoryEntry;

const COUNTER_ENTITY: &str = "CounterRecord";

/// In-memory counter store
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    records: DashMap<String, CounterRecord>,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records whose `expire_at` has passed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before - self.records.len()
    }
}

impl CounterStore for MemoryCounterStore {
    async fn find(&self, key: &CounterKey) -> StoreResult<Option<CounterRecord>> {
        Ok(self
            .records
            .get(&key.storage_key())
            .map(|entry| entry.value().clone()))
    }

    async fn create(&self, record: CounterRecord) -> StoreResult<CounterRecord> {
        let storage_key = record.key.storage_key();
        match self.records.entry(storage_key.clone()) {
            Entry::Occupied(_) => Err(StoreError::already_exists(COUNTER_ENTITY, storage_key)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(&self, record: CounterRecord) -> StoreResult<CounterRecord> {
        let storage_key = record.key.storage_key();
        match self.records.get_mut(&storage_key) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(StoreError::not_found(
                StoreOperation::Update,
                COUNTER_ENTITY,
                storage_key,
            )),
        }
    }

    async fn delete(&self, key: &CounterKey) -> StoreResult<bool> {
        Ok(self.records.remove(&key.storage_key()).is_some())
    }
}

/// In-memory flow context store
///
/// Keeps every version written for a transaction; `find_last` returns the
/// highest one.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    contexts: DashMap<String, Vec<AuthenticationFlowContext>>,
}

impl MemoryContextStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any version exists for a transaction
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.contexts.contains_key(transaction_id)
    }

    /// Drop versions whose `expire_at` has passed
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.contexts.retain(|_, versions| {
            versions.retain(|context| context.expire_at > now);
            !versions.is_empty()
        });
    }
}

impl ContextStore for MemoryContextStore {
    async fn find_last(&self, transaction_id: &str) -> StoreResult<Option<AuthenticationFlowContext>> {
        Ok(self.contexts.get(transaction_id).and_then(|versions| {
            versions
                .iter()
                .max_by_key(|context| context.version)
                .cloned()
        }))
    }

    async fn create(&self, context: AuthenticationFlowContext) -> StoreResult<AuthenticationFlowContext> {
        self.contexts
            .entry(context.transaction_id.clone())
            .or_default()
            .push(context.clone());
        Ok(context)
    }

    async fn delete(&self, transaction_id: &str) -> StoreResult<bool> {
        Ok(self.contexts.remove(transaction_id).is_some())
    }
}

/// In-memory password history store
#[derive(Debug, Default)]
pub struct MemoryPasswordHistoryStore {
    entries: DashMap<Uuid, PasswordHistoryEntry>,
}

impl MemoryPasswordHistoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries across all users
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PasswordHistoryStore for MemoryPasswordHistoryStore {
    async fn find_by_user(
        &self,
        reference: &Reference,
        user_id: &str,
    ) -> StoreResult<Vec<PasswordHistoryEntry>> {
        let mut entries: Vec<PasswordHistoryEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.reference == *reference && entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn create(&self, entry: PasswordHistoryEntry) -> StoreResult<PasswordHistoryEntry> {
        match self.entries.entry(entry.id) {
            Entry::Occupied(_) => Err(StoreError::already_exists(
                "PasswordHistoryEntry",
                entry.id.to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(entry)
            }
        }
    }

    async fn delete(&self, id: &Uuid) -> StoreResult<bool> {
        Ok(self.entries.remove(id).is_some())
    }
}
