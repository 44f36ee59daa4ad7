//! Error types for the push fan-out service.

use thiserror::Error;

/// Main error type for dispatch operations.
///
/// Variants that describe a device token always carry the redacted form
/// produced by [`crate::push::token::redact`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading, parsing or validation error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// FCM transport error that affects the whole call.
    #[error("FCM error: {0}")]
    Fcm(String),

    /// User/location directory lookup failed.
    #[error("Directory error: {0}")]
    Directory(String),

    /// Caller supplied an unusable event (empty title, body, topic...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT signing error.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
