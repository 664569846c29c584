//! Audit sinks
//!
//! A sink is where dispatched audit events end up. Sinks run on the
//! dispatcher's worker task, never on the caller's decision path.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::event::AuditEvent;
use crate::error::Result;

/// Destination for audit events
///
/// Errors are logged by the dispatcher and discarded.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use authguard::audit::{AuditEvent, AuditSink};
///
/// struct KafkaSink { producer: FutureProducer }
///
/// #[async_trait]
/// impl AuditSink for KafkaSink {
///     async fn write(&self, event: &AuditEvent) -> authguard::Result<()> {
///         // publish serde_json::to_vec(event)
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist or forward one event
    async fn write(&self, event: &AuditEvent) -> Result<()>;
}

/// Sink that emits events as structured `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, event: &AuditEvent) -> Result<()> {
        let reference = event.reference.as_ref().map(ToString::to_string);
        tracing::info!(
            target: "authguard::audit",
            event_id = %event.id,
            kind = %event.kind,
            outcome = %event.outcome,
            severity = %event.severity,
            subject = %event.subject,
            reference = reference.as_deref(),
            client = event.client.as_deref(),
            error = event.error.as_deref(),
            "audit event"
        );
        Ok(())
    }
}

/// Sink that keeps events in memory, for tests and local inspection
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events written so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of events written so far
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}
