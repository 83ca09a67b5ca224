//! Error taxonomy for the switchboard core.
//!
//! `SwitchboardError` is the crate-wide error type every fallible core
//! operation returns. `ErrorCode` is the smaller taxonomy services are
//! expected to raise (spec §4.10 / §7) — it carries retry policy, not
//! transport detail.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code taxonomy for service/dispatch failures (C10).
///
/// Each variant carries a fixed retry policy: timeouts, rate limits and
/// unavailability are transient and worth retrying; auth, not-found and
/// invalid-params are caller mistakes that retrying cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    RateLimited,
    Auth,
    NotFound,
    InvalidParams,
    Unavailable,
    Cancelled,
    Internal,
}

impl ErrorCode {
    /// Whether the worker should retry an invocation that failed with this code.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::RateLimited | ErrorCode::Unavailable
        )
    }

    /// A user-facing message template for this error code.
    pub fn message_template(self) -> &'static str {
        match self {
            ErrorCode::Timeout => "The operation timed out. It may be retried.",
            ErrorCode::RateLimited => "Rate limit exceeded. It may be retried shortly.",
            ErrorCode::Auth => "Authentication or authorization failed.",
            ErrorCode::NotFound => "The requested resource was not found.",
            ErrorCode::InvalidParams => "The request parameters were invalid.",
            ErrorCode::Unavailable => "The service is temporarily unavailable.",
            ErrorCode::Cancelled => "The task was cancelled.",
            ErrorCode::Internal => "An internal error occurred.",
        }
    }
}

/// An error raised by a service implementation (Design Notes §9: services
/// return a sum type `Ok(result) | Err(code, message)` instead of raising
/// exceptions as control flow).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// The crate-wide error type for switchboard core operations.
#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("no service registered for (mode={mode:?}, service={service:?})")]
    ServiceNotFound { mode: String, service: String },

    #[error("service already registered for (mode={mode:?}, service={service:?})")]
    DuplicateRegistration { mode: String, service: String },

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("dispatch to {service}.{method} failed: {source}")]
    Dispatch {
        service: String,
        method: String,
        #[source]
        source: ServiceError,
    },

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("progress bus error: {0}")]
    Bus(String),

    #[error("confirmation timed out after {0:?}")]
    ConfirmationTimeout(std::time::Duration),

    #[error("task was cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

impl From<config::ConfigError> for SwitchboardError {
    fn from(e: config::ConfigError) -> Self {
        SwitchboardError::Config(e.to_string())
    }
}

/// Maps an arbitrary escaping error (a panic caught by the worker, or any
/// error type a service implementation didn't convert to `ServiceError`)
/// to the error code taxonomy. Escaping exceptions always classify as
/// `Internal` — see Design Notes §9 ("Exceptions as primary control flow").
pub fn classify_escaped_error(message: impl Into<String>) -> ServiceError {
    ServiceError::internal(message)
}
