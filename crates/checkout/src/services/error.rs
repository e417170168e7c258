//! Domain error taxonomy shared by every checkout service.

use thiserror::Error;

use alliance_core::ValidationError;

use super::identity::IdentityError;
use super::notify::NotifyError;
use crate::db::RepositoryError;

/// Errors returned by the checkout services.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed input, rejected before anything is persisted.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The request contradicts state that is already settled.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Unknown, expired or already-used reference. Deliberately vague.
    #[error("not found or expired")]
    NotFoundOrExpired,

    /// Lock contention or lost connection; retrying identical input is safe.
    #[error("store temporarily unavailable: {0}")]
    TransientStore(#[source] RepositoryError),

    /// The identity provider could not be reached or refused the request.
    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),

    /// The notification dispatcher refused an explicitly requested message.
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),

    /// Any other store failure.
    #[error("store error: {0}")]
    Repository(#[source] RepositoryError),
}

impl CheckoutError {
    /// Whether resubmitting identical input may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::TransientStore(_) | Self::Notify(_) => true,
            Self::Identity(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<RepositoryError> for CheckoutError {
    fn from(e: RepositoryError) -> Self {
        if e.is_transient() {
            return Self::TransientStore(e);
        }
        match e {
            RepositoryError::NotFound => Self::NotFoundOrExpired,
            RepositoryError::Conflict(what) => Self::StateConflict(what),
            other => Self::Repository(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_errors_are_classified() {
        let transient = CheckoutError::from(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(transient, CheckoutError::TransientStore(_)));
        assert!(transient.is_retryable());

        assert!(matches!(
            CheckoutError::from(RepositoryError::NotFound),
            CheckoutError::NotFoundOrExpired
        ));
        assert!(matches!(
            CheckoutError::from(RepositoryError::Conflict("dup".into())),
            CheckoutError::StateConflict(_)
        ));

        let corrupt = CheckoutError::from(RepositoryError::DataCorruption("bad".into()));
        assert!(matches!(corrupt, CheckoutError::Repository(_)));
        assert!(!corrupt.is_retryable());
    }
}
