//! Audio sink bridge traits.
//!
//! A sink is the host's append-only audio destination (a MediaSource buffer
//! in a browser, a decoder feeding an output device on desktop). The core
//! feeds it encoded chunks one at a time and drives its transport.

use async_trait::async_trait;
use bytes::Bytes;
use core_async::sync::watch;
use std::sync::Arc;

use crate::error::Result;

/// Transport state reported by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Created, nothing playing yet.
    Idle,
    Playing,
    Paused,
    /// All appended data has been rendered after end-of-stream was signalled.
    /// Terminal.
    Ended,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// Encoded format the sink will be fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkDescriptor {
    /// MIME type of the appended data, e.g. `audio/mpeg`.
    pub mime_type: String,
    pub sample_rate: u32,
}

impl SinkDescriptor {
    pub fn new(mime_type: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            mime_type: mime_type.into(),
            sample_rate,
        }
    }

    /// Descriptor for an encoding name as used by TTS APIs (`mp3`, `ogg_opus`, ...).
    pub fn for_encoding(encoding: &str, sample_rate: u32) -> Self {
        let mime = match encoding {
            "mp3" => "audio/mpeg",
            "ogg_opus" => "audio/ogg; codecs=opus",
            "pcm" => "audio/pcm",
            "wav" => "audio/wav",
            other => return Self::new(format!("audio/{}", other), sample_rate),
        };
        Self::new(mime, sample_rate)
    }
}

impl Default for SinkDescriptor {
    fn default() -> Self {
        Self::new("audio/mpeg", 24_000)
    }
}

/// Single-writer, append-only audio destination.
///
/// Callers must not issue a second [`append`](AudioSink::append) before the
/// previous one resolved. After [`end_of_stream`](AudioSink::end_of_stream)
/// the sink renders what it holds and then reports
/// [`TransportState::Ended`] exactly once.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Append one encoded buffer; resolves once the sink has accepted it.
    ///
    /// # Errors
    ///
    /// [`BridgeError::SinkRejected`](crate::BridgeError::SinkRejected) when
    /// the data cannot be accepted. The sink is unusable afterwards.
    async fn append(&self, chunk: Bytes) -> Result<()>;

    /// Start or resume output.
    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// No more data will be appended.
    async fn end_of_stream(&self) -> Result<()>;

    /// Stop output and free host resources. Idempotent.
    async fn release(&self) -> Result<()>;

    /// Subscribe to transport changes.
    fn transport(&self) -> watch::Receiver<TransportState>;
}

/// Creates a fresh sink for every playback session.
#[async_trait]
pub trait AudioSinkFactory: Send + Sync {
    async fn create_sink(&self, descriptor: &SinkDescriptor) -> Result<Arc<dyn AudioSink>>;
}
