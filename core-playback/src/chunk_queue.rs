//! # Chunk Queue & Sink Buffer Manager
//!
//! Producer side: [`ChunkSender`], handed to whatever reads the network.
//! Consumer side: [`ChunkQueue::drain_into`], the only writer of a session's
//! sink. It awaits every append before taking the next chunk, so at most one
//! append is ever outstanding and chunks reach the sink in arrival order.
//!
//! Upstream completion is the moment every `ChunkSender` has been dropped.

use bridge_traits::AudioSink;
use core_async::sync::{mpsc, CancellationToken};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{PlaybackError, Result};
use crate::protocol::AudioChunk;

/// The queue no longer accepts chunks (session cancelled or torn down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("chunk queue closed")]
pub struct QueueClosed;

/// Producer handle for one session's chunk queue.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<AudioChunk>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Enqueue a chunk. Refused once the session is cancelled.
    pub fn send(&self, chunk: AudioChunk) -> std::result::Result<(), QueueClosed> {
        if self.cancel.is_cancelled() {
            return Err(QueueClosed);
        }
        self.tx.send(chunk).map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer side of a session's chunk queue.
#[derive(Debug)]
pub struct ChunkQueue {
    rx: mpsc::UnboundedReceiver<AudioChunk>,
    cancel: CancellationToken,
}

/// Creates the queue for one session, bound to its cancellation token.
pub fn chunk_channel(cancel: CancellationToken) -> (ChunkSender, ChunkQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChunkSender {
            tx,
            cancel: cancel.clone(),
        },
        ChunkQueue { rx, cancel },
    )
}

/// Milestones reported while draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainProgress {
    /// The sink accepted the session's first chunk.
    FirstChunkAppended,
    /// Upstream finished, every chunk was appended and end-of-stream was
    /// signalled.
    Drained { chunks: u64, bytes: u64 },
}

/// How draining ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained { chunks: u64, bytes: u64 },
    Cancelled,
}

impl ChunkQueue {
    /// Take the next queued chunk without waiting.
    pub fn try_recv(&mut self) -> Option<AudioChunk> {
        self.rx.try_recv().ok()
    }

    /// Feed queued chunks into `sink` one at a time until upstream completes.
    ///
    /// After the first accepted chunk the sink's transport is started unless
    /// it already runs. Once upstream is done and the queue is empty the sink
    /// gets end-of-stream.
    ///
    /// # Errors
    ///
    /// A rejected append cancels the session token and returns
    /// [`PlaybackError::SinkRejected`]; chunks still queued are discarded
    /// with the session, never skipped over.
    pub async fn drain_into<F>(mut self, sink: &dyn AudioSink, mut on_progress: F) -> Result<DrainOutcome>
    where
        F: FnMut(DrainProgress) + Send,
    {
        let mut chunks: u64 = 0;
        let mut bytes: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(DrainOutcome::Cancelled),
                next = self.rx.recv() => next,
            };

            let Some(chunk) = next else {
                break;
            };

            let len = chunk.len() as u64;
            if let Err(e) = sink.append(chunk.into_bytes()).await {
                self.cancel.cancel();
                warn!(error = %e, appended = chunks, "Sink rejected chunk, aborting session");
                return Err(match PlaybackError::from(e) {
                    PlaybackError::SinkRejected(msg) => PlaybackError::SinkRejected(msg),
                    other => PlaybackError::SinkRejected(other.to_string()),
                });
            }

            if self.cancel.is_cancelled() {
                return Ok(DrainOutcome::Cancelled);
            }

            chunks += 1;
            bytes += len;

            if chunks == 1 {
                on_progress(DrainProgress::FirstChunkAppended);
                if !sink.transport().borrow().is_playing() {
                    // Autoplay refusal is not fatal: audio stays buffered and
                    // a later resume() starts it.
                    if let Err(e) = sink.play().await {
                        warn!(error = %e, "Failed to start playback after first chunk");
                    }
                }
            }
        }

        // Every sender is gone. A cancelled session must not be finalized.
        if self.cancel.is_cancelled() {
            return Ok(DrainOutcome::Cancelled);
        }

        sink.end_of_stream().await.map_err(|e| {
            PlaybackError::Sink(format!("failed to signal end of stream: {}", e))
        })?;

        debug!(chunks, bytes, "Chunk queue drained");
        on_progress(DrainProgress::Drained { chunks, bytes });

        Ok(DrainOutcome::Drained { chunks, bytes })
    }
}
