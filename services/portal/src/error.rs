//! Custom error types for the portal session layer

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Fallback shown to users when the server gives no usable message
pub const DEFAULT_USER_MESSAGE: &str = "Une erreur est survenue";

/// Custom error type for the portal session layer
#[derive(Error, Debug)]
pub enum ApiError {
    /// The backend answered with a non-success status
    #[error("Request failed with status {status}")]
    Status { status: StatusCode, body: String },

    /// Login was refused by the backend
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Login attempts are locked for this user
    #[error("Too many login attempts, retry in {}s", retry_after.as_secs())]
    TooManyAttempts { retry_after: Duration },

    /// Form input failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Request URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network or protocol failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Durable storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] common::error::StorageError),
}

impl ApiError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::InvalidCredentials => Some(StatusCode::UNAUTHORIZED),
            ApiError::TooManyAttempts { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    /// Whether the backend refused the credential
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    /// Message suitable for display
    ///
    /// Prefers the `message` field of a JSON error body, then the status
    /// reason phrase, then a generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { status, body } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|value| {
                    value
                        .get("message")
                        .and_then(|m| m.as_str())
                        .filter(|m| !m.is_empty())
                        .map(str::to_string)
                })
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| DEFAULT_USER_MESSAGE.to_string()),
            ApiError::InvalidCredentials
            | ApiError::TooManyAttempts { .. }
            | ApiError::Validation(_) => self.to_string(),
            _ => DEFAULT_USER_MESSAGE.to_string(),
        }
    }
}

/// Type alias for portal results
pub type ApiResult<T> = Result<T, ApiError>;
