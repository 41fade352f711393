//! # Playback Configuration
//!
//! Protocol reader settings and the session state machine.

use serde::{Deserialize, Serialize};

// ============================================================================
// Protocol Reader Configuration
// ============================================================================

/// How the protocol reader interprets the TTS record stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Record code that marks a clean end of the stream.
    ///
    /// Default: `20000000`.
    #[serde(default = "default_completion_code")]
    pub completion_code: i64,

    /// Case-insensitive substrings that turn an unparsable line into a
    /// terminal error instead of a skipped line.
    ///
    /// This is a heuristic: some gateways answer mid-stream with plain-text
    /// or truncated JSON error bodies.
    ///
    /// Default: `["error"]`.
    #[serde(default = "default_error_signatures")]
    pub error_signatures: Vec<String>,

    /// Upper bound on a single unterminated line, in bytes.
    ///
    /// Default: 8 MiB.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            completion_code: default_completion_code(),
            error_signatures: default_error_signatures(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.completion_code == 0 {
            return Err("completion_code cannot be 0 (reserved for audio records)".to_string());
        }
        if self.max_line_bytes == 0 {
            return Err("max_line_bytes must be > 0".to_string());
        }
        if self.error_signatures.iter().any(|s| s.trim().is_empty()) {
            return Err("error_signatures cannot contain empty entries".to_string());
        }
        Ok(())
    }

    /// Whether an unparsable line looks like an error report.
    pub fn matches_error_signature(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.error_signatures
            .iter()
            .any(|sig| lower.contains(&sig.to_lowercase()))
    }
}

fn default_completion_code() -> i64 {
    20_000_000
}

fn default_error_signatures() -> Vec<String> {
    vec!["error".to_string()]
}

fn default_max_line_bytes() -> usize {
    8 * 1024 * 1024
}

// ============================================================================
// Playback State
// ============================================================================

/// State of the current playback session.
///
/// ```text
/// Idle → Connecting → Buffering → Playing ⇄ Paused → Completed
///             └──────────┴───────────┴────────┴────→ Stopped | Error
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No session has run yet.
    #[default]
    Idle,

    /// Request issued, no chunk accepted by the sink yet.
    Connecting,

    /// Audio is buffered in the sink but the transport is not running yet
    /// (start pending or refused by the host).
    Buffering,

    /// Transport running. `drained` is set once the server completed and
    /// every chunk reached the sink.
    Playing { drained: bool },

    Paused { drained: bool },

    /// Audio ended naturally after a complete stream.
    Completed,

    /// Torn down by `stop()`, `cleanup()` or a replacing session.
    Stopped,

    Error { message: String },
}

impl PlaybackState {
    /// Session started but nothing buffered yet.
    pub fn is_loading(&self) -> bool {
        matches!(self, PlaybackState::Connecting)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Paused { .. })
    }

    /// Server completion observed and the queue fully drained.
    pub fn is_stream_complete(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing { drained: true }
                | PlaybackState::Paused { drained: true }
                | PlaybackState::Completed
        )
    }

    /// A session is live (not yet in a terminal state).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PlaybackState::Connecting
                | PlaybackState::Buffering
                | PlaybackState::Playing { .. }
                | PlaybackState::Paused { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackState::Completed | PlaybackState::Stopped | PlaybackState::Error { .. }
        )
    }
}

// ============================================================================
// Session Statistics
// ============================================================================

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Chunks the sink accepted.
    pub chunks_appended: u64,
    pub bytes_appended: u64,
    /// Time from session start until the sink accepted the first chunk.
    pub first_chunk_latency_ms: Option<u64>,
}
