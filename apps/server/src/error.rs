use std::io::Error as IoError;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use meshkeys::config::ConfigError;
use meshkeys::{Error as CoreError, ErrorKind};
use thiserror::Error;

use crate::routes::Envelope;

/// Startup failures.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to open control plane: {0}")]
    Core(#[from] CoreError),
}

/// A core error on its way out of a handler.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CoreError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::Exhausted => StatusCode::CONFLICT,
            ErrorKind::Invalid => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal if self.0.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(Envelope::<()>::message(status, self.0.to_string()))
    }
}
