//! # Volcengine TTS Provider
//!
//! Implements `NarrationSource` for the Volcengine (ByteDance openspeech) V3
//! unidirectional streaming TTS API.
//!
//! ## Overview
//!
//! This module provides:
//! - Request assembly: JSON body, `X-Api-*` credential headers, per-request id
//! - One streaming POST per narration, abandoned as soon as the session is
//!   cancelled
//! - Error body extraction for non-2xx answers
//! - Hand-off of the response body to the protocol reader in `core-playback`

pub mod connector;
pub mod error;
pub mod types;

pub use connector::VolcengineTtsConnector;
pub use error::{Result, VolcengineTtsError};
