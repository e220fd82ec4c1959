//! Error classification for backend calls

use thiserror::Error;

/// Failure of a single backend API call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The backend answered with a 5xx status
    #[error("API server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The backend rejected the request (status below 500)
    #[error("API client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// The request never produced an HTTP response
    #[error("API transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded
    #[error("failed to decode API response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 {
            ApiError::Server { status, message }
        } else {
            ApiError::Client { status, message }
        }
    }

    /// Server-side and non-API failures are worth retrying; client errors are not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ApiError::Client { .. })
    }

    /// HTTP status of the failed call, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } | ApiError::Client { status, .. } => Some(*status),
            ApiError::Transport(_) | ApiError::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}
