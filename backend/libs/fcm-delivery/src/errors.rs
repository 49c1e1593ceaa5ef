use thiserror::Error;

use crate::classifier::ErrorCategory;

/// Result type for fallible engine operations
pub type FcmResult<T> = Result<T, FcmError>;

/// FCM delivery engine error types
#[derive(Error, Debug)]
pub enum FcmError {
    #[error("FCM engine is not configured")]
    Unconfigured,

    #[error("Invalid FCM configuration: {0}")]
    Configuration(String),

    #[error("Invalid service credential: {0}")]
    InvalidCredential(String),

    #[error("Failed to parse private key: {0}")]
    KeyParseError(String),

    #[error("Failed to encode JWT: {0}")]
    JwtEncodeError(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed with status {status}: {body}")]
    TokenRequestFailed { status: u16, body: String },

    #[error("Failed to parse token response: {0}")]
    TokenParseError(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to parse FCM response: {0}")]
    ResponseParseError(String),

    #[error("Token store error: {0}")]
    Store(String),

    #[error("Failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FcmError {
    /// Best-effort category used when an error is folded into a send result
    pub fn category(&self) -> ErrorCategory {
        match self {
            FcmError::Unconfigured
            | FcmError::Configuration(_)
            | FcmError::InvalidCredential(_)
            | FcmError::KeyParseError(_)
            | FcmError::JwtEncodeError(_)
            | FcmError::Io(_) => ErrorCategory::Configuration,
            FcmError::TokenRequestFailed { status, .. } if *status >= 500 => {
                ErrorCategory::ServerError
            }
            // The authorization server rejected our assertion: the credential is unusable.
            FcmError::TokenRequestFailed { .. } => ErrorCategory::Configuration,
            FcmError::Transport(_) => ErrorCategory::ServerError,
            FcmError::TokenParseError(_)
            | FcmError::ResponseParseError(_)
            | FcmError::Store(_)
            | FcmError::Json(_) => ErrorCategory::Unknown,
        }
    }
}
