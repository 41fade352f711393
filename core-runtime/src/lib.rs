//! # Core Runtime Module
//!
//! Shared runtime infrastructure for the storybook narration core:
//! - Logging and tracing setup
//! - Configuration (bridges, TTS credentials, narration timing)
//! - Typed event bus
//!
//! Every other `core-*` crate depends on this one for its logging
//! conventions and event publishing.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
