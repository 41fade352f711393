//! # Desktop Bridge Implementations
//!
//! Default bridge implementations for desktop hosts (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest` with streamed response bodies
//! - `AudioSinkFactory` spooling narration audio to files with `tokio::fs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SpoolSinkFactory};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(ReqwestHttpClient::new()))
//!     .sink_factory(Arc::new(SpoolSinkFactory::new("/tmp/narration")))
//!     .build()?;
//! ```

mod http;
mod spool_sink;

pub use http::ReqwestHttpClient;
pub use spool_sink::{SpoolAudioSink, SpoolSinkFactory};
