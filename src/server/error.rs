use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::leaderboard::LeaderboardError;

const LOG_TARGET: &str = "server::error";

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.as_str()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "validation", message.as_str()),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "unauthorized", message.as_str()),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, "forbidden", message.as_str()),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "invalid_state", message.as_str()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", message.as_str()),
        }
    }
}

impl From<LeaderboardError> for ApiError {
    fn from(err: LeaderboardError) -> Self {
        match err {
            LeaderboardError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            LeaderboardError::Validation(message) => ApiError::BadRequest(message),
            LeaderboardError::InvalidState(message) => ApiError::Conflict(message),
            LeaderboardError::Forbidden(message) => ApiError::Forbidden(message),
            other @ (LeaderboardError::Database(_) | LeaderboardError::Index(_)) => {
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(target: LOG_TARGET, %message, "internal server error");
        }
        let body = Json(ErrorBody {
            error: kind,
            message,
        });
        (status, body).into_response()
    }
}
