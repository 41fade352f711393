//! Error types for the Volcengine TTS provider

use core_playback::PlaybackError;
use thiserror::Error;

/// Volcengine TTS provider errors
#[derive(Error, Debug)]
pub enum VolcengineTtsError {
    /// One or more credentials are empty; no request was sent.
    #[error("TTS credentials not configured (missing: {})", .missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    /// Nothing to narrate.
    #[error("Narration text is empty")]
    EmptyText,

    /// The service answered with a non-success status.
    #[error("TTS API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// The request body could not be assembled.
    #[error("Failed to build TTS request: {0}")]
    RequestBuild(String),

    #[error(transparent)]
    BridgeError(#[from] bridge_traits::error::BridgeError),
}

/// Result type for Volcengine TTS operations
pub type Result<T> = std::result::Result<T, VolcengineTtsError>;

impl From<VolcengineTtsError> for PlaybackError {
    fn from(error: VolcengineTtsError) -> Self {
        match error {
            VolcengineTtsError::MissingCredentials { .. } | VolcengineTtsError::EmptyText => {
                PlaybackError::InvalidConfig(error.to_string())
            }
            VolcengineTtsError::ApiError {
                status_code,
                message,
            } => PlaybackError::Http {
                status: status_code,
                message,
            },
            VolcengineTtsError::RequestBuild(msg) => PlaybackError::Internal(msg),
            VolcengineTtsError::BridgeError(e) => PlaybackError::from(e),
        }
    }
}
