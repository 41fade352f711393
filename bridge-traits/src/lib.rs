//! # Host Bridge Traits
//!
//! Capability contracts between the narration core and the host platform.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Streaming HTTP used for TTS requests
//! - [`AudioSink`](audio::AudioSink) - Append-only audio destination with transport control
//! - [`AudioSinkFactory`](audio::AudioSinkFactory) - Provisions one sink per playback session
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing:
//!
//! ```ignore
//! let sink_factory = config.sink_factory
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "AudioSinkFactory".to_string(),
//!         message: "No audio sink factory provided.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep messages actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across
//! async tasks.

pub mod audio;
pub mod error;
pub mod http;
pub mod logging;

pub use error::BridgeError;

pub use audio::{AudioSink, AudioSinkFactory, SinkDescriptor, TransportState};
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
