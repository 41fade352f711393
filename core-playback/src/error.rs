//! # Playback Error Types
//!
//! Errors surfaced by the narration pipeline: reading the TTS protocol
//! stream, feeding the audio sink and driving the session.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur while streaming and playing narration audio.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The request could not be sent or the response stream broke off.
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-success HTTP status.
    #[error("TTS service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The stream carried a terminal error record.
    #[error("TTS protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// An audio record's payload could not be decoded.
    #[error("Malformed audio payload: {0}")]
    MalformedPayload(String),

    // ========================================================================
    // Sink Errors
    // ========================================================================
    /// The audio sink refused a chunk. The session is aborted.
    #[error("Audio sink rejected chunk: {0}")]
    SinkRejected(String),

    /// Creating or driving the audio sink failed.
    #[error("Audio sink error: {0}")]
    Sink(String),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session was cancelled. Never reported to callers of
    /// `start_streaming`, which resolve normally on cancellation.
    #[error("Playback cancelled")]
    Cancelled,

    /// Settings are incomplete or invalid (e.g. missing TTS credentials).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PlaybackError::Cancelled)
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::Network(_) | PlaybackError::Http { .. }
        )
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::Protocol { .. } | PlaybackError::MalformedPayload(_)
        )
    }

    pub fn is_sink_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::SinkRejected(_) | PlaybackError::Sink(_)
        )
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Network(msg) => PlaybackError::Network(msg),
            BridgeError::SinkRejected(msg) => PlaybackError::SinkRejected(msg),
            BridgeError::NotAvailable(msg) => PlaybackError::Sink(msg),
            BridgeError::OperationFailed(msg) => PlaybackError::Internal(msg),
            BridgeError::Io(err) => PlaybackError::Internal(err.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
