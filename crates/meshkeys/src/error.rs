//! Error types surfaced by every meshkeys operation.
//!
//! Each failure carries a stable [`ErrorKind`] and a message that is safe to
//! hand to a remote caller. Backend error text is logged where it happens and
//! never copied into these messages.

use thiserror::Error;

use crate::store::StoreError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Unauthorized,
    Exhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The addressed entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A unique key is already taken (admin exists, net id or key name in use).
    #[error("{0}")]
    Conflict(String),

    /// Malformed input.
    #[error("{0}")]
    Invalid(String),

    /// Bad credentials, a bad token, or a missing capability.
    #[error("{0}")]
    Unauthorized(String),

    /// The access key has no uses left.
    #[error("access key {name} in network {net_id} has no uses remaining")]
    Exhausted { net_id: String, name: String },

    /// The store was unavailable or the operation ran past its deadline.
    ///
    /// When `retryable` is set the request may be repeated unchanged, but the
    /// outcome of the failed attempt is unknown.
    #[error("{message}")]
    Internal { message: String, retryable: bool },
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), retryable: false }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Exhausted { .. } => ErrorKind::Exhausted,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Only store timeouts and transient backend failures are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Internal { retryable: true, .. })
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint(what) => Error::Conflict(what),
            StoreError::Timeout => Error::Internal {
                message: "store operation timed out".to_string(),
                retryable: true,
            },
            StoreError::Pool(detail) => {
                tracing::error!("Store pool failure: {detail}");
                Error::Internal { message: "store unavailable".to_string(), retryable: true }
            }
            StoreError::Backend(source) => {
                tracing::error!("Store backend failure: {source}");
                Error::Internal { message: "store failure".to_string(), retryable: false }
            }
            StoreError::Corrupt(detail) => {
                tracing::error!("Stored record could not be decoded: {detail}");
                Error::Internal { message: "store failure".to_string(), retryable: false }
            }
        }
    }
}
