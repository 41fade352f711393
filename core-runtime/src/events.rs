//! # Event Bus System
//!
//! Typed events broadcast by the narration core over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event types**: [`PlaybackEvent`] for the audio session lifecycle,
//!   [`ReaderEvent`] for page navigation and read-aloud scheduling
//! - **EventBus**: cloneable publisher, any number of subscribers
//! - **EventStream**: receiver wrapper with an optional filter
//!
//! ```text
//! ┌────────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ PlaybackController ├─────────>│           ├────────────>│ Reader UI  │
//! └────────────────────┘          │ EventBus  │             └────────────┘
//! ┌────────────────────┐   emit   │           │  subscribe  ┌────────────┐
//! │ PageSyncCoordinator├─────────>│           ├────────────>│ Diagnostics│
//! └────────────────────┘          └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Reader(ReaderEvent::PageChanged {
//!         from: 0,
//!         to: 1,
//!         automatic: true,
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! Emitting with no subscribers returns an error; publishers ignore it with
//! `.ok()`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, SendError},
};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Audio session lifecycle
    Playback(PlaybackEvent),
    /// Page navigation and read-aloud scheduling
    Reader(ReaderEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Reader(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Reader(ReaderEvent::NarrationFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Playback(PlaybackEvent::SessionStarted { .. })
            | CoreEvent::Playback(PlaybackEvent::Ended { .. })
            | CoreEvent::Reader(ReaderEvent::PageChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Lifecycle of one streaming playback session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A new session replaced any previous one and is connecting.
    SessionStarted { session_id: String },
    /// The sink accepted the first chunk; loading is over.
    FirstChunkBuffered { session_id: String },
    /// Transport started or resumed.
    Playing { session_id: String },
    Paused { session_id: String },
    /// The server sent its completion record and every chunk reached the sink.
    StreamCompleted {
        session_id: String,
        chunks: u64,
        bytes: u64,
    },
    /// Audio finished playing naturally.
    Ended { session_id: String },
    /// Session torn down by `stop()` or replacement.
    Stopped { session_id: String },
    Error {
        session_id: String,
        message: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::SessionStarted { .. } => "Narration session started",
            PlaybackEvent::FirstChunkBuffered { .. } => "First audio chunk buffered",
            PlaybackEvent::Playing { .. } => "Narration playing",
            PlaybackEvent::Paused { .. } => "Narration paused",
            PlaybackEvent::StreamCompleted { .. } => "Narration stream completed",
            PlaybackEvent::Ended { .. } => "Narration ended",
            PlaybackEvent::Stopped { .. } => "Narration stopped",
            PlaybackEvent::Error { .. } => "Narration error",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            PlaybackEvent::SessionStarted { session_id }
            | PlaybackEvent::FirstChunkBuffered { session_id }
            | PlaybackEvent::Playing { session_id }
            | PlaybackEvent::Paused { session_id }
            | PlaybackEvent::StreamCompleted { session_id, .. }
            | PlaybackEvent::Ended { session_id }
            | PlaybackEvent::Stopped { session_id }
            | PlaybackEvent::Error { session_id, .. } => session_id,
        }
    }
}

// ============================================================================
// Reader Events
// ============================================================================

/// Page navigation and read-aloud scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ReaderEvent {
    PageChanged {
        from: usize,
        to: usize,
        /// `true` when the page turned because narration ended.
        automatic: bool,
    },
    /// Narration ended on a page that has a successor.
    AutoAdvanceScheduled { from: usize, delay_ms: u64 },
    NarrationStarted { page: usize },
    /// Narration for a page failed; no automatic advance follows.
    NarrationFailed { page: usize, message: String },
    /// The last page finished narrating.
    StoryFinished { pages: usize },
}

impl ReaderEvent {
    fn description(&self) -> &str {
        match self {
            ReaderEvent::PageChanged { .. } => "Page changed",
            ReaderEvent::AutoAdvanceScheduled { .. } => "Automatic page turn scheduled",
            ReaderEvent::NarrationStarted { .. } => "Page narration started",
            ReaderEvent::NarrationFailed { .. } => "Page narration failed",
            ReaderEvent::StoryFinished { .. } => "Story finished",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning shares the underlying channel. Slow subscribers observe
/// `RecvError::Lagged` instead of blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event; returns the number of subscribers reached.
    ///
    /// Errors when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New independent receiver for future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let reader_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Reader(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn page_changed(to: usize) -> CoreEvent {
        CoreEvent::Reader(ReaderEvent::PageChanged {
            from: to.saturating_sub(1),
            to,
            automatic: false,
        })
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(page_changed(1)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = CoreEvent::Playback(PlaybackEvent::SessionStarted {
            session_id: "s-1".to_string(),
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Playback(_)));

        bus.emit(page_changed(1)).ok();
        let ended = CoreEvent::Playback(PlaybackEvent::Ended {
            session_id: "s-2".to_string(),
        });
        bus.emit(ended.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), ended);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_event_stream_lagged() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for page in 0..5 {
            bus.emit(page_changed(page)).ok();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(_)))));
    }

    #[test]
    fn test_event_severity() {
        let error = CoreEvent::Playback(PlaybackEvent::Error {
            session_id: "s".to_string(),
            message: "boom".to_string(),
        });
        assert_eq!(error.severity(), EventSeverity::Error);
        assert_eq!(page_changed(2).severity(), EventSeverity::Info);

        let failed = CoreEvent::Reader(ReaderEvent::NarrationFailed {
            page: 1,
            message: "network".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Warning);
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Playback(PlaybackEvent::StreamCompleted {
            session_id: "abc".to_string(),
            chunks: 3,
            bytes: 1024,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Playback");
        assert_eq!(json["payload"]["event"], "StreamCompleted");
        assert_eq!(json["payload"]["chunks"], 3);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.description(), "Narration stream completed");
    }

    #[test]
    fn test_playback_event_session_id() {
        let event = PlaybackEvent::Paused {
            session_id: "xyz".to_string(),
        };
        assert_eq!(event.session_id(), "xyz");
    }
}
