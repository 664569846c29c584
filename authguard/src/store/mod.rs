//! Store collaborators
//!
//! Traits for counter, context and password history persistence, the
//! structured [`StoreError`] they return, and in-memory implementations.
//! A Redis implementation is available with the `cache` feature.

mod error;
mod memory;
#[cfg(feature = "cache")]
mod redis;
mod traits;

pub use error::{StoreError, StoreErrorKind, StoreOperation, StoreResult};
pub use memory::{MemoryContextStore, MemoryCounterStore, MemoryPasswordHistoryStore};
#[cfg(feature = "cache")]
pub use self::redis::RedisStore;
pub use traits::{ContextStore, CounterStore, PasswordHistoryStore};
