use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use grantwarden_core::AppError;
use grantwarden_domain::{BindingRef, ResourceId, Subject};

/// Raw failure reported by the external system of record.
///
/// Carries facts only; callers decide whether it is retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalApiError {
    /// HTTP-like status code, absent for transport-level failures.
    pub status: Option<u16>,
    /// Error message.
    pub message: String,
}

impl ExternalApiError {
    /// Creates an error carrying a status code.
    #[must_use]
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates an error for a failure that produced no status.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns true when the external system reported the binding as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Classifies the failure and converts it into an application error.
    #[must_use]
    pub fn into_app_error(self) -> AppError {
        match ExternalErrorClass::classify(&self) {
            ExternalErrorClass::Transient => AppError::ExternalTransient(self.to_string()),
            ExternalErrorClass::Permanent => AppError::ExternalPermanent(self.to_string()),
        }
    }
}

impl Display for ExternalApiError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(formatter, "status {status}: {}", self.message),
            None => formatter.write_str(self.message.as_str()),
        }
    }
}

/// Retry class of an external failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalErrorClass {
    /// Retried automatically on the next scheduled cycle.
    Transient,
    /// Logged and flagged; not retried automatically.
    Permanent,
}

impl ExternalErrorClass {
    /// Transport failures, 408, 429 and 5xx are transient; other statuses are permanent.
    #[must_use]
    pub fn classify(error: &ExternalApiError) -> Self {
        match error.status {
            None | Some(408) | Some(429) => Self::Transient,
            Some(status) if status >= 500 => Self::Transient,
            Some(_) => Self::Permanent,
        }
    }
}

/// Client for the external system that holds role bindings.
#[async_trait]
pub trait ExternalBindingClient: Send + Sync {
    /// Creates a binding giving `subject` the external role on `resource_id`.
    async fn create(
        &self,
        resource_id: &ResourceId,
        subject: &Subject,
        external_role_id: &str,
    ) -> Result<BindingRef, ExternalApiError>;

    /// Finds the binding for `subject` on `resource_id`.
    async fn find(
        &self,
        subject: &Subject,
        resource_id: &ResourceId,
    ) -> Result<Option<BindingRef>, ExternalApiError>;

    /// Deletes one binding.
    async fn delete(&self, binding_ref: &BindingRef) -> Result<(), ExternalApiError>;
}

#[cfg(test)]
mod tests {
    use grantwarden_core::AppError;

    use super::{ExternalApiError, ExternalErrorClass};

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [408, 429, 500, 503] {
            let error = ExternalApiError::with_status(status, "busy");
            assert_eq!(ExternalErrorClass::classify(&error), ExternalErrorClass::Transient);
        }
        assert_eq!(
            ExternalErrorClass::classify(&ExternalApiError::transport("connection reset")),
            ExternalErrorClass::Transient
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        let error = ExternalApiError::with_status(404, "binding not found");
        assert!(error.is_not_found());
        assert!(matches!(
            error.into_app_error(),
            AppError::ExternalPermanent(_)
        ));
    }
}
