//! File-spooling audio sink.
//!
//! Desktop hosts without a streaming decoder get a sink that writes every
//! appended chunk to a file in arrival order. Transport calls only move the
//! reported state; the file is considered rendered as soon as it is written,
//! so `Ended` follows `end_of_stream` once the sink is playing.

use async_trait::async_trait;
use bridge_traits::{
    audio::{AudioSink, AudioSinkFactory, SinkDescriptor, TransportState},
    error::{BridgeError, Result},
};
use bytes::Bytes;
use core_async::sync::{watch, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default cap on spooled bytes per session.
const DEFAULT_MAX_BYTES: u64 = 64 * 1024 * 1024;

struct SpoolState {
    file: Option<File>,
    bytes_written: u64,
    end_of_stream: bool,
    released: bool,
}

/// Sink that spools encoded audio to `path`.
pub struct SpoolAudioSink {
    path: PathBuf,
    max_bytes: u64,
    keep_file: bool,
    state: Mutex<SpoolState>,
    transport: watch::Sender<TransportState>,
}

impl SpoolAudioSink {
    /// Create the spool file and an idle sink writing into it.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        let (transport, _) = watch::channel(TransportState::Idle);

        Ok(Self {
            path,
            max_bytes: DEFAULT_MAX_BYTES,
            keep_file: false,
            state: Mutex::new(SpoolState {
                file: Some(file),
                bytes_written: 0,
                end_of_stream: false,
                released: false,
            }),
            transport,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Keep the spool file on disk after release.
    pub fn keep_file(mut self, keep: bool) -> Self {
        self.keep_file = keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn bytes_written(&self) -> u64 {
        self.state.lock().await.bytes_written
    }

    fn set_transport(&self, next: TransportState) {
        self.transport.send_if_modified(|current| {
            if *current == TransportState::Ended || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

#[async_trait]
impl AudioSink for SpoolAudioSink {
    async fn append(&self, chunk: Bytes) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.released {
            return Err(BridgeError::SinkRejected("sink released".to_string()));
        }
        if state.end_of_stream {
            return Err(BridgeError::SinkRejected(
                "append after end of stream".to_string(),
            ));
        }
        let next_total = state.bytes_written + chunk.len() as u64;
        if next_total > self.max_bytes {
            return Err(BridgeError::SinkRejected(format!(
                "spool quota of {} bytes exceeded",
                self.max_bytes
            )));
        }

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| BridgeError::SinkRejected("spool file closed".to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| BridgeError::SinkRejected(e.to_string()))?;

        state.bytes_written = next_total;
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let state = self.state.lock().await;
        if state.released {
            return Err(BridgeError::OperationFailed("sink released".to_string()));
        }
        if state.end_of_stream {
            self.set_transport(TransportState::Ended);
        } else {
            self.set_transport(TransportState::Playing);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if self.state.lock().await.released {
            return Err(BridgeError::OperationFailed("sink released".to_string()));
        }
        self.set_transport(TransportState::Paused);
        Ok(())
    }

    async fn end_of_stream(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.released {
            return Err(BridgeError::OperationFailed("sink released".to_string()));
        }
        if let Some(file) = state.file.as_mut() {
            file.flush().await?;
        }
        state.end_of_stream = true;
        debug!(
            file = %file_name_of(&self.path),
            bytes = state.bytes_written,
            "Spool complete"
        );

        if self.transport.borrow().is_playing() {
            self.set_transport(TransportState::Ended);
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.released {
            return Ok(());
        }
        state.released = true;
        state.file.take();

        if !self.keep_file {
            if let Err(e) = fs::remove_file(&self.path).await {
                warn!(error = %e, file = %file_name_of(&self.path), "Failed to remove spool file");
            }
        }
        Ok(())
    }

    fn transport(&self) -> watch::Receiver<TransportState> {
        self.transport.subscribe()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Creates one [`SpoolAudioSink`] per session inside `dir`.
pub struct SpoolSinkFactory {
    dir: PathBuf,
    max_bytes: u64,
    keep_files: bool,
}

impl SpoolSinkFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            keep_files: false,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    fn extension_for(descriptor: &SinkDescriptor) -> &'static str {
        match descriptor.mime_type.as_str() {
            "audio/mpeg" => "mp3",
            "audio/wav" => "wav",
            "audio/pcm" => "pcm",
            m if m.starts_with("audio/ogg") => "ogg",
            _ => "bin",
        }
    }
}

#[async_trait]
impl AudioSinkFactory for SpoolSinkFactory {
    async fn create_sink(&self, descriptor: &SinkDescriptor) -> Result<Arc<dyn AudioSink>> {
        let name = format!(
            "narration-{}.{}",
            Uuid::new_v4(),
            Self::extension_for(descriptor)
        );
        let sink = SpoolAudioSink::create(self.dir.join(name))
            .await?
            .with_max_bytes(self.max_bytes)
            .keep_file(self.keep_files);

        Ok(Arc::new(sink))
    }
}
