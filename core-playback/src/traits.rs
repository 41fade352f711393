//! # Narration Source Trait
//!
//! Seam between the playback controller and a concrete text-to-speech
//! backend. A source issues one streaming request per call and pushes every
//! decoded audio chunk into the session queue, in arrival order.

use crate::chunk_queue::ChunkSender;
use crate::error::Result;
use async_trait::async_trait;
use core_async::sync::CancellationToken;

// ============================================================================
// Narration Source
// ============================================================================

/// Produces narration audio for a piece of text.
///
/// # Contract
///
/// - Chunks are sent through `chunks` in the order they were received.
/// - `Ok(())` means the server reported completion, or `cancel` fired and the
///   request was abandoned. The caller tells the two apart through the token.
/// - Any transport, HTTP or protocol failure is returned as an error; chunks
///   already sent stay in the queue until the caller tears the session down.
/// - Implementations must observe `cancel` promptly, including while the
///   request is still connecting.
///
/// # Example
///
/// ```ignore
/// controller
///     .start_streaming(|chunks, cancel| async move {
///         source.narrate("Once upon a time", chunks, cancel).await
///     })
///     .await?;
/// ```
#[async_trait]
pub trait NarrationSource: Send + Sync {
    async fn narrate(
        &self,
        text: &str,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Short identifier for logs.
    fn name(&self) -> &str {
        "narration"
    }
}
