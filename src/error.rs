//! # Error Handling
//!
//! HTTP-facing error type and its conversion into JSON responses.
//!
//! ## Error Layers:
//! - **AudioError** (`crate::audio`): failures of the audio core itself
//! - **AppError** (here): what a handler returns; maps every failure to a
//!   status code and a consistent JSON body
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "invalid_encoding",
//!     "message": "Invalid payload encoding: Invalid symbol 42, offset 3.",
//!     "retryable": false,
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::audio::AudioError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
/// - **Audio**: The audio core rejected the request (400, or 503 when playback is unavailable)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
    ValidationError(String),
    Audio(AudioError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Audio(err) => write!(f, "{}", err),
        }
    }
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Audio(AudioError::InvalidEncoding(_)) => "invalid_encoding",
            AppError::Audio(AudioError::MalformedAudio(_)) => "malformed_audio",
            AppError::Audio(AudioError::PlaybackUnavailable(_)) => "playback_unavailable",
        }
    }

    /// Whether the same request may succeed later unchanged.
    fn is_retryable(&self) -> bool {
        match self {
            AppError::Audio(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError/InvalidEncoding/MalformedAudio → 400
/// - PlaybackUnavailable → 503 (retry later)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Audio(AudioError::PlaybackUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Audio(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Audio(err) => err.to_string(),
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg) => msg.clone(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": message,
                "retryable": self.is_retryable(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        AppError::Audio(err)
    }
}

/// Anyhow errors come from start-up plumbing and config updates; treated as internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
