//! # Protocol Stream Reader
//!
//! Turns the TTS response body (newline-delimited JSON records) into typed
//! events:
//!
//! ```text
//! {"code":0,"data":"<base64 audio>"}         → Audio chunk
//! {"code":20000000,"message":"OK"}          → Complete
//! {"code":45000001,"message":"quota ..."}   → Failed
//! ```
//!
//! Framing works on raw bytes, so a record (or a multi-byte character) split
//! across network reads is reassembled before it is parsed. Nothing is
//! emitted after the first terminal record.

use base64::{engine::general_purpose, Engine as _};
use bridge_traits::ByteStream;
use bytes::Bytes;
use core_async::sync::CancellationToken;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::chunk_queue::ChunkSender;
use crate::config::ProtocolConfig;
use crate::error::{PlaybackError, Result};

/// Code attached to errors raised for unparsable lines that look like error
/// reports. No real record uses it.
pub const UNPARSED_ERROR_CODE: i64 = -1;

/// Longest excerpt of an offending line kept in error messages.
const EXCERPT_CHARS: usize = 200;

/// One decoded audio buffer. Order is implied by arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Bytes,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Event produced by [`ProtocolReader`].
#[derive(Debug)]
pub enum ProtocolEvent {
    Audio(AudioChunk),
    /// The completion record arrived.
    Complete,
    /// Terminal error record, undecodable payload or oversized line.
    Failed(PlaybackError),
}

impl ProtocolEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProtocolEvent::Audio(_))
    }
}

/// Record shape on the wire. Unknown fields (sentence timing, usage) are
/// ignored.
#[derive(Debug, Deserialize)]
struct WireRecord {
    code: i64,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Counters kept by the reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub records: u64,
    pub skipped_lines: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
}

/// Incremental NDJSON record reader.
#[derive(Debug)]
pub struct ProtocolReader {
    config: ProtocolConfig,
    pending: Vec<u8>,
    finished: bool,
    stats: ReaderStats,
}

impl ProtocolReader {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
            finished: false,
            stats: ReaderStats::default(),
        }
    }

    /// A terminal event has been produced; further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Feed one network read and collect the events of every line it
    /// completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ProtocolEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut buffer = std::mem::take(&mut self.pending);
        // The carried-over tail held no newline, only the new bytes can.
        let mut search_from = buffer.len();
        buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = buffer[search_from..].iter().position(|&b| b == b'\n') {
            let line_end = search_from + offset;
            let event = self.process_line(&buffer[line_start..line_end]);
            line_start = line_end + 1;
            search_from = line_start;

            if let Some(event) = event {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    return events;
                }
            }
        }

        buffer.drain(..line_start);
        if buffer.len() > self.config.max_line_bytes {
            self.finished = true;
            events.push(ProtocolEvent::Failed(PlaybackError::MalformedPayload(
                format!(
                    "unterminated record exceeds {} bytes",
                    self.config.max_line_bytes
                ),
            )));
            return events;
        }

        self.pending = buffer;
        events
    }

    /// Flush the trailing unterminated line at end of input.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        if self.finished {
            return Vec::new();
        }
        let tail = std::mem::take(&mut self.pending);
        match self.process_line(&tail) {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                vec![event]
            }
            None => Vec::new(),
        }
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<ProtocolEvent> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return None;
        }

        let record: WireRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                if self.config.matches_error_signature(line) {
                    warn!(line = %excerpt(line), "Unparsable line looks like an error report");
                    return Some(ProtocolEvent::Failed(PlaybackError::Protocol {
                        code: UNPARSED_ERROR_CODE,
                        message: excerpt(line),
                    }));
                }
                self.stats.skipped_lines += 1;
                warn!(error = %e, line = %excerpt(line), "Skipping unparsable protocol line");
                return None;
            }
        };

        self.stats.records += 1;
        trace!(code = record.code, "Protocol record");

        if record.code == 0 {
            let Some(data) = record.data.filter(|d| !d.is_empty()) else {
                debug!("Audio record without payload");
                return None;
            };
            return Some(match general_purpose::STANDARD.decode(data.as_bytes()) {
                Ok(decoded) => {
                    self.stats.audio_chunks += 1;
                    self.stats.audio_bytes += decoded.len() as u64;
                    ProtocolEvent::Audio(AudioChunk::new(decoded))
                }
                Err(e) => ProtocolEvent::Failed(PlaybackError::MalformedPayload(format!(
                    "invalid base64 in audio record: {}",
                    e
                ))),
            });
        }

        if record.code == self.config.completion_code {
            debug!(records = self.stats.records, "Completion record received");
            return Some(ProtocolEvent::Complete);
        }

        Some(ProtocolEvent::Failed(PlaybackError::Protocol {
            code: record.code,
            message: record
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
        }))
    }
}

fn excerpt(line: &str) -> String {
    if line.chars().count() <= EXCERPT_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

/// How a pumped stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(ReaderStats),
    Cancelled,
}

/// Read `body` to its terminal record, forwarding audio chunks to `chunks`.
///
/// Returns [`StreamOutcome::Cancelled`] as soon as `cancel` fires or the
/// chunk queue stops accepting; no chunk is forwarded after that. A body that
/// ends without a terminal record is a network error.
pub async fn pump_stream(
    mut body: ByteStream,
    chunks: &ChunkSender,
    cancel: &CancellationToken,
    config: &ProtocolConfig,
) -> Result<StreamOutcome> {
    let mut reader = ProtocolReader::new(config.clone());

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            next = body.next() => next,
        };

        let exhausted = next.is_none();
        let events = match next {
            Some(Ok(bytes)) => reader.feed(&bytes),
            Some(Err(e)) => {
                if cancel.is_cancelled() {
                    return Ok(StreamOutcome::Cancelled);
                }
                return Err(e.into());
            }
            None => reader.finish(),
        };

        for event in events {
            match event {
                ProtocolEvent::Audio(chunk) => {
                    if chunks.send(chunk).is_err() {
                        return Ok(StreamOutcome::Cancelled);
                    }
                }
                ProtocolEvent::Complete => return Ok(StreamOutcome::Completed(reader.stats())),
                ProtocolEvent::Failed(err) => return Err(err),
            }
        }

        if exhausted {
            return Err(PlaybackError::Network(
                "connection closed before terminal record".to_string(),
            ));
        }
    }
}
