//! Security audit trail
//!
//! Lockouts, unlocks, exhausted verification attempts, rate-limit denials
//! and password history changes are reported as [`AuditEvent`]s through an
//! [`AuditDispatcher`]. Dispatch is fire-and-forget: a slow or failing
//! [`AuditSink`] never delays or fails the decision that produced the event.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use authguard::audit::{AuditDispatcher, TracingAuditSink};
//!
//! let audit = AuditDispatcher::spawn(&config.audit, Arc::new(TracingAuditSink));
//! let lockout = LoginAttempts::new(engine, Arc::new(config)).with_audit(audit);
//! ```

mod dispatcher;
mod event;
mod sink;

pub use dispatcher::AuditDispatcher;
pub use event::{AuditEvent, AuditEventKind, AuditOutcome, AuditSeverity};
pub use sink::{AuditSink, MemoryAuditSink, TracingAuditSink};
