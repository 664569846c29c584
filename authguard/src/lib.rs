//! # authguard
//!
//! Abuse protection and flow-state consistency for identity platforms.
//!
//! ## Features
//!
//! - **Login lockout**: lock an account after repeated failures, clear on success
//! - **MFA attempt limits**: per-factor verification counters with time decay
//! - **Rate limiting**: fixed-window (or proportional refill) throttling of
//!   challenge sends and similar operations, with an axum middleware
//! - **Flow context consistency**: never resume a login flow on a stale
//!   replica read
//! - **Password history**: reject reuse of the last N passwords
//! - **Audit trail**: out-of-band security events
//! - **Storage**: in-memory stores, Redis with the `cache` feature
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use authguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let audit = AuditDispatcher::spawn(&config.audit, Arc::new(TracingAuditSink));
//!     let settings: Arc<dyn SettingsProvider> = Arc::new(config.clone());
//!     let engine = ThresholdEngine::new(Arc::new(MemoryCounterStore::new()));
//!     let login = LoginAttempts::new(engine, settings).with_audit(audit);
//!
//!     let criteria = CounterCriteria::new(Reference::domain("acme"), "alice")
//!         .with_client("web");
//!
//!     login.ensure_unlocked(&criteria).await?;
//!     let decision = login.login_failed(&criteria).await?;
//!     println!("{} of {} attempts used", decision.attempts, decision.max_attempts);
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod counter;
pub mod credential;
pub mod criteria;
pub mod error;
pub mod observability;
pub mod password_history;
pub mod store;

pub use error::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        AuditDispatcher, AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity, AuditSink,
        MemoryAuditSink, TracingAuditSink,
    };
    pub use crate::config::{
        Config, ConsistencySettings, GuardSettings, LoginSettings, PasswordHistorySettings,
        RateLimitSettings, SettingsProvider, TimeUnit, VerifySettings,
    };
    pub use crate::context::{AuthenticationFlowContext, ConsumedContext, ContextLoader};
    pub use crate::counter::{
        CounterRecord, Decision, LoginAttempts, Policy, RateLimiter, RefillStrategy,
        ThresholdEngine, UnlockReason, VerifyAttempts,
    };
    pub use crate::credential::{Argon2Comparator, CredentialComparator};
    pub use crate::criteria::{CounterCriteria, CounterKey, CounterKind, Reference, ReferenceType};
    pub use crate::error::{Error, Result};
    pub use crate::observability::init_tracing;
    pub use crate::password_history::{PasswordHistoryEntry, PasswordHistoryGuard};
    pub use crate::store::{
        ContextStore, CounterStore, MemoryContextStore, MemoryCounterStore,
        MemoryPasswordHistoryStore, PasswordHistoryStore, StoreError, StoreErrorKind,
    };

    #[cfg(feature = "cache")]
    pub use crate::store::RedisStore;

    #[cfg(feature = "http")]
    pub use crate::counter::ThrottleMiddleware;

    #[cfg(feature = "http")]
    pub use crate::error::ErrorResponse;
}
