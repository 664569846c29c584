//! Error types and HTTP response conversion
//!
//! Domain outcomes (locks, exhausted attempts, stale contexts, password
//! reuse) keep their own variants so callers can branch on them. Every other
//! failure is a technical error that keeps its cause for logging and, over
//! HTTP, is reported with a generic message.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::{StoreError, StoreErrorKind};

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Account locked after repeated login failures
    #[error("Account locked until {unlock_at}")]
    AccountLocked {
        /// When the lock lapses
        unlock_at: DateTime<Utc>,
        /// Seconds until the lock lapses
        retry_after_secs: u64,
    },

    /// Verification attempts exhausted
    #[error("Attempt limit reached ({attempts}/{max_attempts})")]
    AttemptLimitReached {
        /// Attempts counted in the current window
        attempts: u32,
        /// Configured maximum
        max_attempts: u32,
        /// Seconds until attempts reset
        retry_after_secs: u64,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        /// Seconds until the allowance returns
        retry_after_secs: u64,
    },

    /// The flow context never reached the expected version
    #[error(
        "Stale context for transaction {transaction_id}: expected version {expected_version}, found {found_version}"
    )]
    StaleContext {
        /// Flow transaction id
        transaction_id: String,
        /// Version the caller required
        expected_version: u64,
        /// Highest version observed
        found_version: u64,
    },

    /// The candidate password is one of the remembered ones
    #[error("Password already used in the last {history_size} passwords")]
    PasswordInHistory {
        /// Configured history size
        history_size: u16,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A store call, caller deadline or detached task timed out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Structured store error with operation context
    #[error("{0}")]
    Store(StoreError),

    /// Encoding or comparing a credential failed
    #[error("Credential error: {message}")]
    Credential {
        /// What was being done
        message: String,
        /// Underlying hasher error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Credential error keeping the hasher's error as its source
    pub fn credential(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Credential {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Whether this is a domain outcome rather than a technical failure
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::AccountLocked { .. }
                | Self::AttemptLimitReached { .. }
                | Self::RateLimitExceeded { .. }
                | Self::PasswordInHistory { .. }
        )
    }

    /// Seconds the caller should wait before retrying, if known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::AccountLocked { retry_after_secs, .. }
            | Self::AttemptLimitReached { retry_after_secs, .. }
            | Self::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err.kind {
            StoreErrorKind::Timeout => Error::Timeout(err.to_string()),
            _ => Error::Store(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Timeout(format!("Task cancelled: {}", err))
        } else {
            Error::Internal(format!("Task failed: {}", err))
        }
    }
}

#[cfg(feature = "http")]
pub use response::ErrorResponse;

#[cfg(feature = "http")]
mod response {
    use axum::{
        http::{header::HeaderValue, HeaderName, StatusCode},
        response::{IntoResponse, Response},
        Json,
    };
    use serde::{Deserialize, Serialize};

    use super::Error;

    /// Error response body
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ErrorResponse {
        /// Error message
        pub error: String,

        /// Optional error code
        #[serde(skip_serializing_if = "Option::is_none")]
        pub code: Option<String>,

        /// HTTP status code
        pub status: u16,
    }

    impl ErrorResponse {
        /// Create a new error response
        pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
            Self {
                error: error.into(),
                code: None,
                status: status.as_u16(),
            }
        }

        /// Create error response with a code
        pub fn with_code(
            status: StatusCode,
            code: impl Into<String>,
            error: impl Into<String>,
        ) -> Self {
            Self {
                error: error.into(),
                code: Some(code.into()),
                status: status.as_u16(),
            }
        }
    }

    impl IntoResponse for Error {
        fn into_response(self) -> Response {
            let retry_after = self.retry_after_secs();
            let (status, error_response) = match self {
                Error::AccountLocked { retry_after_secs, .. } => (
                    StatusCode::LOCKED,
                    ErrorResponse::with_code(
                        StatusCode::LOCKED,
                        "ACCOUNT_LOCKED",
                        format!("Account locked. Try again in {} seconds", retry_after_secs),
                    ),
                ),

                Error::AttemptLimitReached { attempts, max_attempts, .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorResponse::with_code(
                        StatusCode::TOO_MANY_REQUESTS,
                        "ATTEMPT_LIMIT_REACHED",
                        format!("Too many attempts ({}/{})", attempts, max_attempts),
                    ),
                ),

                Error::RateLimitExceeded { .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorResponse::with_code(
                        StatusCode::TOO_MANY_REQUESTS,
                        "RATE_LIMIT_EXCEEDED",
                        "Rate limit exceeded",
                    ),
                ),

                Error::StaleContext { ref transaction_id, expected_version, found_version } => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        expected_version = expected_version,
                        found_version = found_version,
                        "Stale authentication context"
                    );
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_code(
                            StatusCode::CONFLICT,
                            "STALE_CONTEXT",
                            "Authentication flow state is not yet available",
                        ),
                    )
                }

                Error::PasswordInHistory { history_size } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorResponse::with_code(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "PASSWORD_IN_HISTORY",
                        format!(
                            "Password must be different than the last {} passwords",
                            history_size
                        ),
                    ),
                ),

                Error::NotFound(msg) => (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                ),

                Error::Timeout(msg) => {
                    tracing::error!("Operation timed out: {}", msg);
                    (
                        StatusCode::GATEWAY_TIMEOUT,
                        ErrorResponse::with_code(
                            StatusCode::GATEWAY_TIMEOUT,
                            "TIMEOUT",
                            "Operation timed out",
                        ),
                    )
                }

                Error::Store(ref e) => {
                    tracing::error!(
                        operation = %e.operation,
                        kind = %e.kind,
                        entity_type = ?e.entity_type,
                        entity_id = ?e.entity_id,
                        retriable = e.is_retriable(),
                        "Store error: {}", e.message
                    );
                    let code = format!("STORE_{}", e.kind.to_string().to_uppercase());
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            code,
                            "Internal server error",
                        ),
                    )
                }

                other => {
                    tracing::error!("Internal error: {}", other);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_code(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "INTERNAL_ERROR",
                            "Internal server error",
                        ),
                    )
                }
            };

            let mut response = (status, Json(error_response)).into_response();
            if let Some(secs) = retry_after {
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static("retry-after"), value);
                }
            }
            response
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::store::{StoreError, StoreOperation};
        use chrono::Utc;

        #[test]
        fn test_error_response_with_code() {
            let err = ErrorResponse::with_code(
                StatusCode::LOCKED,
                "ACCOUNT_LOCKED",
                "Account locked",
            );
            assert_eq!(err.status, 423);
            assert_eq!(err.code, Some("ACCOUNT_LOCKED".to_string()));
        }

        #[test]
        fn test_account_locked_sets_retry_after() {
            let response = Error::AccountLocked {
                unlock_at: Utc::now(),
                retry_after_secs: 42,
            }
            .into_response();
            assert_eq!(response.status(), StatusCode::LOCKED);
            assert_eq!(response.headers()["retry-after"], "42");
        }

        #[test]
        fn test_limits_map_to_too_many_requests() {
            let response = Error::RateLimitExceeded { retry_after_secs: 900 }.into_response();
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(response.headers()["retry-after"], "900");

            let response = Error::AttemptLimitReached {
                attempts: 5,
                max_attempts: 5,
                retry_after_secs: 60,
            }
            .into_response();
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }

        #[test]
        fn test_domain_errors_status() {
            let stale = Error::StaleContext {
                transaction_id: "tx".to_string(),
                expected_version: 2,
                found_version: 1,
            };
            assert_eq!(stale.into_response().status(), StatusCode::CONFLICT);
            assert_eq!(
                Error::PasswordInHistory { history_size: 5 }.into_response().status(),
                StatusCode::UNPROCESSABLE_ENTITY
            );
        }

        #[test]
        fn test_technical_errors_are_generic() {
            let response =
                Error::from(StoreError::backend_error(StoreOperation::Find, "secret detail"))
                    .into_response();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(response.headers().get("retry-after").is_none());
        }

        #[test]
        fn test_timeout_maps_to_gateway_timeout() {
            let response = Error::from(StoreError::timeout(StoreOperation::Find, "slow"))
                .into_response();
            assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOperation;

    #[test]
    fn test_store_timeout_becomes_timeout() {
        let err = Error::from(StoreError::timeout(StoreOperation::Find, "slow"));
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_store_error_keeps_cause() {
        let err = Error::from(StoreError::backend_error(StoreOperation::Update, "boom"));
        match err {
            Error::Store(inner) => {
                assert_eq!(inner.operation, StoreOperation::Update);
                assert_eq!(inner.message, "boom");
            }
            other => panic!("Expected Store error, got {:?}", other),
        }
    }

    #[test]
    fn test_credential_error_keeps_source() {
        use std::error::Error as _;

        let err = Error::credential("Failed to hash credential", "salt too short");
        assert_eq!(err.to_string(), "Credential error: Failed to hash credential");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("salt too short"));
    }

    #[test]
    fn test_denials_are_not_technical() {
        assert!(Error::RateLimitExceeded { retry_after_secs: 1 }.is_denial());
        assert!(Error::PasswordInHistory { history_size: 5 }.is_denial());
        assert!(!Error::Internal("x".to_string()).is_denial());
        assert_eq!(
            Error::AttemptLimitReached {
                attempts: 1,
                max_attempts: 1,
                retry_after_secs: 9
            }
            .retry_after_secs(),
            Some(9)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_becomes_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(Error::from(elapsed), Error::Timeout(_)));
    }
}
