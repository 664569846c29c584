//! Store error types
//!
//! Structured errors returned by store collaborators. The engine relies on
//! the [`StoreErrorKind`] to tell an insert conflict or a concurrent delete
//! apart from a genuine technical failure.
//!
//! # Example
//!
//! ```rust
//! use authguard::store::{StoreError, StoreErrorKind};
//!
//! let error = StoreError::already_exists("CounterRecord", "login:domain:acme:-:-:-:alice");
//! assert!(error.is_conflict());
//! assert_eq!(error.kind, StoreErrorKind::AlreadyExists);
//! ```

use std::fmt;

/// Operation being performed when the store error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// Looking up a single record by key
    Find,
    /// Listing records (password history)
    List,
    /// Inserting a new record
    Create,
    /// Replacing an existing record
    Update,
    /// Removing a record
    Delete,
    /// Acquiring a backend connection
    Connect,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Find => write!(f, "find"),
            Self::List => write!(f, "list"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Category of store error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Record was not found (update/delete of a missing record)
    NotFound,
    /// A record with the same key already exists
    AlreadyExists,
    /// Concurrent writers kept conflicting on the same key
    Conflict,
    /// Failed to reach the backend
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Serialization or deserialization error
    SerializationError,
    /// Underlying backend error
    BackendError,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::Conflict => write!(f, "conflict"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::BackendError => write!(f, "backend_error"),
        }
    }
}

/// Structured store error with operation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// The operation being performed when the error occurred
    pub operation: StoreOperation,
    /// The category of error
    pub kind: StoreErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "CounterRecord")
    pub entity_type: Option<String>,
    /// The key or id of the entity involved
    pub entity_id: Option<String>,
}

impl StoreError {
    /// Create a new store error
    pub fn new(operation: StoreOperation, kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Update or delete targeted a record that does not exist
    pub fn not_found(
        operation: StoreOperation,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self::new(operation, StoreErrorKind::NotFound, "Record not found")
            .with_entity(entity_type, entity_id)
    }

    /// Create targeted a key that already holds a live record
    pub fn already_exists(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            StoreOperation::Create,
            StoreErrorKind::AlreadyExists,
            "Record already exists",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Writers kept racing on the same key
    pub fn conflict(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::Conflict, message)
    }

    /// Backend unreachable
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            StoreOperation::Connect,
            StoreErrorKind::ConnectionFailed,
            message,
        )
    }

    /// Operation timed out
    pub fn timeout(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::Timeout, message)
    }

    /// Encoding or decoding a stored value failed
    pub fn serialization_error(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::SerializationError, message)
    }

    /// Any other backend failure
    pub fn backend_error(operation: StoreOperation, message: impl Into<String>) -> Self {
        Self::new(operation, StoreErrorKind::BackendError, message)
    }

    /// Add entity context to an existing error
    #[must_use]
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: StoreOperation) -> Self {
        self.operation = operation;
        self
    }

    /// The key already holds a record
    pub fn is_conflict(&self) -> bool {
        self.kind == StoreErrorKind::AlreadyExists
    }

    /// The targeted record does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    /// Transient errors that may succeed on retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::ConnectionFailed | StoreErrorKind::Timeout
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(entity_type), Some(entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for StoreError {}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_is_conflict() {
        let error = StoreError::already_exists("CounterRecord", "k");
        assert!(error.is_conflict());
        assert!(!error.is_not_found());
        assert_eq!(error.operation, StoreOperation::Create);
    }

    #[test]
    fn test_not_found_keeps_operation() {
        let error = StoreError::not_found(StoreOperation::Update, "CounterRecord", "k");
        assert!(error.is_not_found());
        assert_eq!(error.operation, StoreOperation::Update);
        assert_eq!(error.entity_id.as_deref(), Some("k"));
    }

    #[test]
    fn test_is_retriable() {
        assert!(StoreError::connection_failed("refused").is_retriable());
        assert!(StoreError::timeout(StoreOperation::Find, "slow").is_retriable());
        assert!(!StoreError::already_exists("CounterRecord", "k").is_retriable());
        assert!(!StoreError::backend_error(StoreOperation::Delete, "boom").is_retriable());
    }

    #[test]
    fn test_display_with_entity() {
        let error = StoreError::not_found(StoreOperation::Delete, "PasswordHistoryEntry", "42");
        let display = error.to_string();
        assert!(display.contains("not_found"));
        assert!(display.contains("delete"));
        assert!(display.contains("[PasswordHistoryEntry: 42]"));
    }

    #[test]
    fn test_display_without_entity() {
        let error = StoreError::timeout(StoreOperation::Find, "deadline exceeded");
        let display = error.to_string();
        assert!(display.contains("timeout"));
        assert!(!display.contains('['));
    }
}
