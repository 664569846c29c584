//! Audit event types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::criteria::Reference;

/// A single security audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub kind: AuditEventKind,
    /// Whether the audited action succeeded
    pub outcome: AuditOutcome,
    /// Severity level (maps to syslog severity 0-7)
    pub severity: AuditSeverity,
    /// Domain or application that owns the subject
    pub reference: Option<Reference>,
    /// User or username the event is about
    pub subject: String,
    /// Client application, if any
    pub client: Option<String>,
    /// Additional structured attributes
    pub metadata: HashMap<String, serde_json::Value>,
    /// Error description for failed outcomes
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a successful event; severity defaults from the kind
    pub fn new(kind: AuditEventKind, subject: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            severity: kind.default_severity(),
            kind,
            outcome: AuditOutcome::Success,
            reference: None,
            subject: subject.into(),
            client: None,
            metadata: HashMap::new(),
            error: None,
        }
    }

    /// Set the owning domain or application
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Set the client application
    pub fn with_client(mut self, client: Option<&str>) -> Self {
        self.client = client.map(str::to_owned);
        self
    }

    /// Mark the outcome as failed with an error description
    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.error = Some(error.into());
        self
    }

    /// Override the severity
    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach one metadata attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// Categories of audit events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Account locked after repeated login failures
    AccountLocked,
    /// Account lock cleared (success, admin action)
    AccountUnlocked,
    /// MFA verification attempts exhausted
    VerifyAttemptsExhausted,
    /// Rate limit denied a request
    RateLimitExceeded,
    /// Password recorded in history
    PasswordHistoryCreated,
    /// Password change rejected because it was used before
    PasswordReuseRejected,
    /// Application-defined event
    Custom(String),
}

impl AuditEventKind {
    /// Severity used when none is set explicitly
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            Self::AccountLocked | Self::VerifyAttemptsExhausted => AuditSeverity::Warning,
            Self::RateLimitExceeded | Self::PasswordReuseRejected => AuditSeverity::Notice,
            Self::AccountUnlocked | Self::PasswordHistoryCreated | Self::Custom(_) => {
                AuditSeverity::Informational
            }
        }
    }
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountLocked => write!(f, "auth.account.locked"),
            Self::AccountUnlocked => write!(f, "auth.account.unlocked"),
            Self::VerifyAttemptsExhausted => write!(f, "auth.verify.exhausted"),
            Self::RateLimitExceeded => write!(f, "auth.rate_limit.exceeded"),
            Self::PasswordHistoryCreated => write!(f, "auth.password_history.created"),
            Self::PasswordReuseRejected => write!(f, "auth.password_history.reuse_rejected"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Whether the audited action succeeded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Action completed
    Success,
    /// Action was rejected or failed
    Failure,
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Audit event severity levels
///
/// Maps directly to syslog severity values (RFC 5424).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Error conditions (syslog 3)
    Error = 3,
    /// Warning conditions (syslog 4)
    Warning = 4,
    /// Normal but significant condition (syslog 5)
    Notice = 5,
    /// Informational messages (syslog 6)
    Informational = 6,
}

impl AuditSeverity {
    /// Get the numeric syslog severity value
    pub fn as_syslog_severity(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Notice => write!(f, "NOTICE"),
            Self::Informational => write!(f, "INFO"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity_from_kind() {
        let event = AuditEvent::new(AuditEventKind::AccountLocked, "alice");
        assert_eq!(event.severity, AuditSeverity::Warning);
        assert_eq!(event.outcome, AuditOutcome::Success);
    }

    #[test]
    fn test_with_failure_sets_outcome() {
        let event = AuditEvent::new(AuditEventKind::PasswordReuseRejected, "u1")
            .with_failure("password already in history");
        assert_eq!(event.outcome, AuditOutcome::Failure);
        assert_eq!(event.error.as_deref(), Some("password already in history"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(AuditEventKind::AccountLocked.to_string(), "auth.account.locked");
        assert_eq!(
            AuditEventKind::Custom("mfa".to_string()).to_string(),
            "custom.mfa"
        );
    }

    #[test]
    fn test_serializes_to_json() {
        let event = AuditEvent::new(AuditEventKind::RateLimitExceeded, "alice")
            .with_reference(Reference::domain("acme"))
            .with_attribute("limit", 5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "rate_limit_exceeded");
        assert_eq!(json["metadata"]["limit"], 5);
        assert_eq!(json["reference"]["id"], "acme");
    }

    #[test]
    fn test_syslog_values() {
        assert_eq!(AuditSeverity::Warning.as_syslog_severity(), 4);
        assert_eq!(AuditSeverity::Informational.as_syslog_severity(), 6);
    }
}
