//! Workspace entry crate.
//!
//! Exposes the storybook narration core behind the workspace feature flags so
//! host applications can depend on `storybook-workspace` without wiring each
//! crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
