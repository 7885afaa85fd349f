//! HTTP mapping of coordinator errors.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::coordinator::CoordinatorError;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// API error
#[derive(Debug)]
pub struct ApiError(pub CoordinatorError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoordinatorError::Validation(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoordinatorError::InvalidPassword => StatusCode::FORBIDDEN,
            CoordinatorError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::SessionFull(_) => StatusCode::CONFLICT,
            CoordinatorError::Integrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoordinatorError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if self.0.is_business_outcome() {
            tracing::debug!(status = status.as_u16(), "{}", self.0);
        } else if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self.0);
        } else {
            tracing::warn!(status = status.as_u16(), "{}", self.0);
        }

        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CoordinatorError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(CoordinatorError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(CoordinatorError::validation(rejection.body_text()))
    }
}

/// Body for requests whose handler panicked.
pub(crate) fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Request handler panicked: {}", detail);

    let body = ErrorBody {
        error: "internal_error",
        message: "internal error".to_string(),
        retryable: true,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
