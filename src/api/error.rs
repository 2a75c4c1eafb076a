//! Error responses for the HTTP surface

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::Error;

/// Failure returned by a handler
#[derive(Debug)]
pub enum ApiError {
    /// Payload is not the expected shape
    Structural(String),
    /// Body parsed but a field is missing or has the wrong type
    Validation(String),
    /// The telemetry log could not be read or written
    Persistence(String),
    /// The broker refused a command
    Transport(String),
    /// Body could not be read as JSON at all, with axum's status
    Rejected(StatusCode, String),
    Internal(String),
}

impl ApiError {
    const fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Structural(_) => (StatusCode::BAD_REQUEST, "structural_error"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Self::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            Self::Transport(_) => (StatusCode::INTERNAL_SERVER_ERROR, "transport_error"),
            Self::Rejected(status, _) => (*status, "request_rejected"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.parts().0
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        if e.is_persistence() {
            return Self::Persistence(e.to_string());
        }
        match e {
            Error::Structural(msg) => Self::Structural(msg),
            Error::Validation(msg) => Self::Validation(msg),
            Error::Transport(msg) => Self::Transport(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonSyntaxError(e) => Error::Structural(e.body_text()).into(),
            JsonRejection::JsonDataError(e) => Error::Validation(e.body_text()).into(),
            other => Self::Rejected(other.status(), other.body_text()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code) = self.parts();
        let message = match self {
            Self::Structural(msg)
            | Self::Validation(msg)
            | Self::Persistence(msg)
            | Self::Transport(msg)
            | Self::Rejected(_, msg)
            | Self::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        } else {
            tracing::warn!(code, error = %message, "request rejected");
        }

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
