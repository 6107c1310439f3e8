use crate::errors::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub code: u16,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiError({}, {})", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::Json(self);
        (status, body).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::TaskNotFound(_) | Error::InteractionNotFound(..) | Error::ApprovalNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Error::InvalidTransition { .. }
            | Error::AlreadyRunning(_)
            | Error::AlreadyResponded(_)
            | Error::ApprovalAlreadyResolved(_) => StatusCode::CONFLICT,
            Error::NotAQuestion(_) => StatusCode::BAD_REQUEST,
            Error::RepositoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, &e.to_string())
    }
}

/// Helper function to create API errors
pub fn api_error(status: StatusCode, message: &str) -> ApiError {
    ApiError {
        message: message.to_string(),
        code: status.as_u16(),
    }
}
