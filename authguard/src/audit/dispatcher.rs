//! Audit dispatcher
//!
//! `AuditDispatcher` hands events to a bounded queue drained by one worker
//! task, so reporting never waits on the sink. A full queue drops the event
//! with a warning rather than applying backpressure to authentication.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::event::AuditEvent;
use super::sink::AuditSink;
use crate::config::AuditConfig;

/// Fire-and-forget audit reporting handle
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Debug, Clone)]
pub struct AuditDispatcher {
    sender: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditDispatcher {
    /// Start the worker task draining events into `sink`
    ///
    /// Must be called from within a Tokio runtime. Returns a disabled
    /// dispatcher when auditing is turned off in `config`.
    pub fn spawn(config: &AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        if !config.enabled {
            debug!("Audit disabled, events will be discarded");
            return Self::disabled();
        }

        let (sender, mut receiver) = mpsc::channel::<AuditEvent>(config.queue_capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = sink.write(&event).await {
                    warn!(
                        event_id = %event.id,
                        kind = %event.kind,
                        error = %e,
                        "Audit sink failed to write event"
                    );
                }
            }
            debug!("Audit dispatcher stopped");
        });

        Self {
            sender: Some(sender),
        }
    }

    /// Dispatcher that discards every event
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Whether events are forwarded to a sink
    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue an event without waiting
    pub fn report(&self, event: AuditEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event_id = %event.id, kind = %event.kind, "Audit queue full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event_id = %event.id, kind = %event.kind, "Audit worker stopped, event dropped");
            }
        }
    }
}

impl Default for AuditDispatcher {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventKind, MemoryAuditSink};
    use crate::config::GuardSettings;
    use crate::counter::{LoginAttempts, ThresholdEngine};
    use crate::criteria::{CounterCriteria, Reference};
    use crate::error::{Error, Result};
    use crate::store::MemoryCounterStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Fails the first write, records the rest
    struct FlakySink {
        failed_once: AtomicBool,
        inner: MemoryAuditSink,
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn write(&self, event: &AuditEvent) -> Result<()> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(Error::Internal("sink down".to_string()));
            }
            self.inner.write(event).await
        }
    }

    struct SlowSink {
        inner: MemoryAuditSink,
    }

    #[async_trait]
    impl AuditSink for SlowSink {
        async fn write(&self, event: &AuditEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.inner.write(event).await
        }
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
    async fn test_events_reach_sink() {
        let sink = MemoryAuditSink::new();
        let dispatcher = AuditDispatcher::spawn(&AuditConfig::default(), Arc::new(sink.clone()));

        dispatcher.report(AuditEvent::new(AuditEventKind::AccountLocked, "alice"));
        dispatcher.report(AuditEvent::new(AuditEventKind::AccountUnlocked, "alice"));

        wait_for(&sink, 2).await;
        let kinds: Vec<_> = sink.events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![AuditEventKind::AccountLocked, AuditEventKind::AccountUnlocked]
        );
    }

    #[tokio::test]
    async fn test_disabled_discards() {
        let sink = MemoryAuditSink::new();
        let config = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        let dispatcher = AuditDispatcher::spawn(&config, Arc::new(sink.clone()));
        assert!(!dispatcher.is_enabled());

        dispatcher.report(AuditEvent::new(AuditEventKind::AccountLocked, "alice"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_worker() {
        let recorded = MemoryAuditSink::new();
        let dispatcher = AuditDispatcher::spawn(
            &AuditConfig::default(),
            Arc::new(FlakySink {
                failed_once: AtomicBool::new(false),
                inner: recorded.clone(),
            }),
        );
        dispatcher.report(AuditEvent::new(AuditEventKind::AccountLocked, "alice"));
        dispatcher.report(AuditEvent::new(AuditEventKind::AccountLocked, "bob"));

        wait_for(&recorded, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let subjects: Vec<_> = recorded.events().into_iter().map(|e| e.subject).collect();
        assert_eq!(subjects, vec!["bob".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_never_delays_decisions() {
        let config = AuditConfig {
            queue_capacity: 1,
            ..AuditConfig::default()
        };
        let delivered = MemoryAuditSink::new();
        let dispatcher = AuditDispatcher::spawn(
            &config,
            Arc::new(SlowSink {
                inner: delivered.clone(),
            }),
        );

        let mut settings = GuardSettings::default();
        settings.login.max_attempts = 1;
        let login = LoginAttempts::new(
            ThresholdEngine::new(Arc::new(MemoryCounterStore::new())),
            Arc::new(settings),
        )
        .with_audit(dispatcher.clone());

        // Every failure locks a fresh account and reports into a full queue
        let decisions = tokio::time::timeout(Duration::from_secs(1), async {
            let mut decisions = Vec::new();
            for i in 0..10 {
                let criteria = CounterCriteria::new(Reference::domain("acme"), format!("u{}", i));
                decisions.push(login.login_failed(&criteria).await);
                dispatcher.report(AuditEvent::new(AuditEventKind::RateLimitExceeded, "extra"));
            }
            decisions
        })
        .await
        .expect("decisions completed while the sink was stalled");

        assert_eq!(decisions.len(), 10);
        for decision in decisions {
            assert!(!decision.unwrap().allowed);
        }
        assert!(delivered.is_empty());
    }
}
