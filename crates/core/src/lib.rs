//! Shared primitives for all GrantWarden crates.

#![forbid(unsafe_code)]

/// Actor primitives recorded on every audited mutation.
pub mod actor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use actor::Actor;

/// Result type used across GrantWarden crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string with surrounding whitespace removed.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Retryable failure reported by the external system of record.
    #[error("external api error (transient): {0}")]
    ExternalTransient(String),

    /// Non-retryable failure reported by the external system of record.
    #[error("external api error (permanent): {0}")]
    ExternalPermanent(String),

    /// Notification transport failed to deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when a later scheduler cycle may succeed without intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ExternalTransient(_) | Self::Transport(_) | Self::Conflict(_) | Self::Internal(_)
        )
    }

    /// Returns a short stable label for structured logs and audit details.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::ExternalTransient(_) => "external_transient",
            Self::ExternalPermanent(_) => "external_permanent",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Actor, AppError, NonEmptyString};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn non_empty_string_trims_input() {
        let value = NonEmptyString::new("  properties/42 ")
            .unwrap_or_else(|_| panic!("value should be accepted"));
        assert_eq!(value.as_str(), "properties/42");
    }

    #[test]
    fn external_errors_are_classified() {
        assert!(AppError::ExternalTransient("rate limited".to_owned()).is_transient());
        assert!(!AppError::ExternalPermanent("forbidden".to_owned()).is_transient());
        assert!(!AppError::Validation("cap".to_owned()).is_transient());
    }

    #[test]
    fn actor_storage_value_roundtrips() {
        let actor = Actor::scheduler("downgrade");
        assert_eq!(actor.as_storage_value(), "scheduler:downgrade");
        assert_eq!(Actor::from_storage_value("scheduler:downgrade"), actor);
        assert_eq!(Actor::from_storage_value("system"), Actor::System);
        assert_eq!(
            Actor::from_storage_value("user:alice@example.com"),
            Actor::user("alice@example.com")
        );
    }
}
