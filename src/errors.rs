//! Cross-cutting error taxonomy.
//!
//! Every service defines its own leaf error enum (`MatchingError`,
//! `AccountError`, `OrderError`, ...). `CoreError` is the taxonomy those
//! leaf errors fold into at a saga boundary, so compensation logic can match
//! on *kind* (retryable vs. not, business vs. technical) without knowing
//! about every service's concrete error type.

use std::fmt;

/// A failure kind, independent of which service raised it.
///
/// Mirrors the five kinds from the error handling design: validation,
/// business rule, state, technical, system. `NotFound` is split out because
/// its handling depends on context (warn-and-continue for sagas, surface to
/// caller for orders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed input. Never retried.
    Validation(String),
    /// Business rule violation (insufficient balance, unsupported symbol, ...).
    /// Non-retryable; surfaces as a failure event downstream.
    Business(BusinessReason),
    /// Illegal state transition (cancel a filled order, reserve twice).
    /// Idempotent no-op where safe.
    State(String),
    /// Transient failure (lock timeout, store unavailable). Retryable.
    Technical(String),
    /// Unexpected failure. Non-retryable; ack to avoid poison loops.
    System(String),
    /// Order or saga not found.
    NotFound(String),
}

/// Business-rule failure reasons that map 1:1 onto
/// `AccountUpdateFailedEvent::failureType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusinessReason {
    InsufficientBalance { required: String, available: String },
    InsufficientShares { required: String, available: String },
    ValidationError(String),
}

impl CoreError {
    /// Whether a consumer should throw (force re-delivery) rather than ack.
    pub fn should_retry(&self) -> bool {
        matches!(self, CoreError::Technical(_))
    }

    /// The `failureType` tag used on `AccountUpdateFailedEvent` and friends.
    pub fn failure_type(&self) -> &'static str {
        match self {
            CoreError::Business(BusinessReason::InsufficientBalance { .. }) => "INSUFFICIENT_BALANCE",
            CoreError::Business(BusinessReason::InsufficientShares { .. }) => "INSUFFICIENT_SHARES",
            CoreError::Business(BusinessReason::ValidationError(_)) | CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Technical(_) => "LOCK_TIMEOUT",
            CoreError::State(_) | CoreError::NotFound(_) | CoreError::System(_) => "TECHNICAL_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Validation(msg) => write!(f, "validation error: {msg}"),
            CoreError::Business(reason) => write!(f, "business rule violation: {reason:?}"),
            CoreError::State(msg) => write!(f, "illegal state transition: {msg}"),
            CoreError::Technical(msg) => write!(f, "technical error (retryable): {msg}"),
            CoreError::System(msg) => write!(f, "system error: {msg}"),
            CoreError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => CoreError::Technical("connection pool timed out".into()),
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".into()),
            other => CoreError::System(other.to_string()),
        }
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::State(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technical_errors_are_retryable() {
        assert!(CoreError::Technical("lock timeout".into()).should_retry());
        assert!(!CoreError::Business(BusinessReason::InsufficientBalance {
            required: "100".into(),
            available: "10".into(),
        })
        .should_retry());
    }

    #[test]
    fn failure_type_mapping() {
        assert_eq!(
            CoreError::Business(BusinessReason::InsufficientShares {
                required: "1".into(),
                available: "0".into()
            })
            .failure_type(),
            "INSUFFICIENT_SHARES"
        );
        assert_eq!(CoreError::NotFound("x".into()).failure_type(), "TECHNICAL_ERROR");
    }
}
