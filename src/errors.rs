use axum::{http::StatusCode, Json};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure kinds a task can end with. `code()` is the stable wire name.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("path violation: {0}")]
    PathViolation(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("external service error: {0}")]
    ExternalService(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::PathViolation(_) => "PathViolation",
            TaskError::AlreadyExists(_) => "AlreadyExists",
            TaskError::UnknownTask(_) => "UnknownTask",
            TaskError::InvalidArgument(_) => "InvalidArgument",
            TaskError::UnsupportedFormat(_) => "UnsupportedFormat",
            TaskError::ExternalService(_) => "ExternalServiceError",
            TaskError::Timeout(_) => "Timeout",
            TaskError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TaskError::PathViolation(_) => StatusCode::FORBIDDEN,
            TaskError::AlreadyExists(_) => StatusCode::CONFLICT,
            TaskError::UnknownTask(_) => StatusCode::NOT_FOUND,
            TaskError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TaskError::UnsupportedFormat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            TaskError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TaskError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn external(err: impl std::fmt::Display) -> Self {
        TaskError::ExternalService(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        TaskError::Internal(err.to_string())
    }
}

/// Refusals raised by the HTTP boundary before any task is looked up.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("origin denied")]
    OriginDenied,
    #[error("request too large")]
    RequestTooLarge,
    #[error("rate limited")]
    RateLimited,
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::OriginDenied => "OriginDenied",
            AppError::RequestTooLarge => "RequestTooLarge",
            AppError::RateLimited => "RateLimited",
            AppError::Task(e) => e.code(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::OriginDenied => StatusCode::FORBIDDEN,
            AppError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Task(e) => e.status(),
        }
    }
}

pub type TaskResult = Result<serde_json::Value, TaskError>;

pub fn into_response(err: AppError) -> (StatusCode, Json<ErrorBody>) {
    let body = ErrorBody { code: err.code(), message: err.to_string() };
    (err.status(), Json(body))
}
