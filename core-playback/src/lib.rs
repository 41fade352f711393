//! # Streaming Narration Playback
//!
//! Plays text-to-speech audio while it is still being synthesized.
//!
//! ## Overview
//!
//! This crate handles:
//! - Reading the TTS record stream ([`protocol`]): newline-delimited JSON,
//!   base64 audio, completion and error records
//! - Ordering chunks into a session's sink, one append at a time
//!   ([`chunk_queue`])
//! - Session lifecycle, transport control and the ended notification
//!   ([`controller`])
//!
//! ## Data flow
//!
//! ```text
//! HttpStreamResponse ──> pump_stream ──> ChunkSender ══> ChunkQueue ──> AudioSink
//!                         (protocol)       (queue)      drain_into     (bridge)
//!                                                           │
//!                                       PlaybackController ◄┘ progress / transport
//! ```
//!
//! Backends plug in through [`NarrationSource`].

pub mod chunk_queue;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod traits;

pub use chunk_queue::{chunk_channel, ChunkQueue, ChunkSender, DrainOutcome, DrainProgress, QueueClosed};
pub use config::{PlaybackState, ProtocolConfig, SessionStats};
pub use controller::{PlaybackController, SessionId, Subscription};
pub use error::{PlaybackError, Result};
pub use protocol::{
    pump_stream, AudioChunk, ProtocolEvent, ProtocolReader, ReaderStats, StreamOutcome,
    UNPARSED_ERROR_CODE,
};
pub use traits::NarrationSource;
