//! HTTP edge error with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Server errors are captured to
//! Sentry before responding, and no response body carries internal details.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::CheckoutError;

/// Message shown for every resume- or magic-link failure.
pub const LINK_INVALID: &str = "This link is no longer valid";

/// Application-level error type for the checkout API.
#[derive(Debug, Error)]
pub enum AppError {
    /// A checkout service failed.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// A checkout service failed while following a buyer link. Unknown,
    /// expired and already-used links all render the same way.
    #[error("link error: {0}")]
    Link(CheckoutError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A dependency is not reachable.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    /// Wrap a service error raised on a link route.
    #[must_use]
    pub const fn link(err: CheckoutError) -> Self {
        Self::Link(err)
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Link(CheckoutError::NotFoundOrExpired | CheckoutError::StateConflict(_)) => {
                StatusCode::GONE
            }
            Self::Checkout(err) | Self::Link(err) => checkout_status(err),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self, status: StatusCode) -> String {
        match self {
            _ if status == StatusCode::GONE => LINK_INVALID.to_string(),
            Self::Checkout(err) | Self::Link(err) => match err {
                CheckoutError::Validation(e) => e.to_string(),
                CheckoutError::StateConflict(what) => what.clone(),
                CheckoutError::NotFoundOrExpired => "Not found".to_string(),
                CheckoutError::TransientStore(_) => {
                    "Temporarily unavailable, please retry".to_string()
                }
                CheckoutError::Identity(_) | CheckoutError::Notify(_) => {
                    "External service error".to_string()
                }
                CheckoutError::Repository(_) => "Internal server error".to_string(),
            },
            Self::Unavailable(_) => "Service unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::StateConflict(_) => StatusCode::CONFLICT,
        CheckoutError::NotFoundOrExpired => StatusCode::NOT_FOUND,
        CheckoutError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        e @ (CheckoutError::Identity(_) | CheckoutError::Notify(_)) if e.is_retryable() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CheckoutError::Identity(_) | CheckoutError::Notify(_) | CheckoutError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let message = self.message(status);
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RepositoryError;
    use alliance_core::ValidationError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(CheckoutError::Validation(ValidationError::EmptyCart).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(CheckoutError::StateConflict("settled".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(CheckoutError::NotFoundOrExpired.into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(
                CheckoutError::TransientStore(RepositoryError::Unavailable("down".into())).into()
            ),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            get_status(
                CheckoutError::Repository(RepositoryError::DataCorruption("bad".into())).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_link_failures_are_indistinguishable() {
        let expired = AppError::link(CheckoutError::NotFoundOrExpired);
        let used = AppError::link(CheckoutError::StateConflict("order already provisioned".into()));

        assert_eq!(expired.status(), StatusCode::GONE);
        assert_eq!(used.status(), StatusCode::GONE);
        assert_eq!(expired.message(StatusCode::GONE), LINK_INVALID);
        assert_eq!(used.message(StatusCode::GONE), LINK_INVALID);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::from(CheckoutError::Repository(RepositoryError::DataCorruption(
            "row 42 has bad enum".into(),
        )));
        assert_eq!(
            err.message(StatusCode::INTERNAL_SERVER_ERROR),
            "Internal server error"
        );
    }
}
