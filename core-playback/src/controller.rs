//! # Playback Controller
//!
//! Owns the lifecycle of streaming narration sessions: at most one session
//! is active, each with its own sink, chunk queue and cancellation token.
//!
//! ## Session lifecycle
//!
//! 1. `start_streaming` tears down any previous session (its sink is released
//!    before the new one is created) and registers a fresh session.
//! 2. The request future pushes chunks into the session queue while the
//!    queue drains them into the sink, one append at a time.
//! 3. The first accepted chunk ends loading and starts the transport.
//! 4. Once upstream completes and the queue is empty the sink receives
//!    end-of-stream; the session is then stream-complete.
//! 5. When the sink reports it ended, the session completes and every
//!    `on_ended` listener fires exactly once. An end reported before the
//!    stream drained (buffer underrun) is held until the drain finishes.
//!
//! `stop()` may be called at any point and is idempotent. A stopped or
//! replaced session never reaches the sink again and never fires `on_ended`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use bridge_traits::{AudioSink, AudioSinkFactory, SinkDescriptor, TransportState};
use core_async::sync::{watch, CancellationToken, Mutex as AsyncMutex, Notify};
use core_async::task::JoinHandle;
use core_async::time::Instant;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chunk_queue::{chunk_channel, ChunkSender, DrainOutcome, DrainProgress};
use crate::config::{PlaybackState, SessionStats};
use crate::error::{PlaybackError, Result};

// ============================================================================
// Session Identity
// ============================================================================

/// Identifies one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
    /// Set once the sink factory returned.
    sink: Option<Arc<dyn AudioSink>>,
    watcher: Option<JoinHandle<()>>,
    drained: bool,
    /// Wakes the transport watcher once `drained` is set.
    drained_signal: Arc<Notify>,
    started_at: Instant,
}

type EndedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: BTreeMap<u64, EndedCallback>,
}

// ============================================================================
// Controller
// ============================================================================

struct Inner {
    sink_factory: Arc<dyn AudioSinkFactory>,
    descriptor: SinkDescriptor,
    session: Mutex<Option<ActiveSession>>,
    /// Serializes session setup so sinks never overlap.
    setup: AsyncMutex<()>,
    state: watch::Sender<PlaybackState>,
    stats: Mutex<SessionStats>,
    listeners: Mutex<Listeners>,
    event_bus: Option<EventBus>,
}

/// Drives streaming narration into an [`AudioSink`].
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Inner>,
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("descriptor", &self.inner.descriptor)
            .field("state", &*self.inner.state.borrow())
            .field("session", &self.session_id())
            .finish()
    }
}

impl PlaybackController {
    pub fn new(sink_factory: Arc<dyn AudioSinkFactory>) -> Self {
        Self::with_descriptor(sink_factory, SinkDescriptor::default())
    }

    pub fn with_descriptor(sink_factory: Arc<dyn AudioSinkFactory>, descriptor: SinkDescriptor) -> Self {
        Self::build(sink_factory, descriptor, None)
    }

    /// Publish session lifecycle events on `event_bus`.
    pub fn with_event_bus(self, event_bus: EventBus) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => {
                return Self::build(
                    shared.sink_factory.clone(),
                    shared.descriptor.clone(),
                    Some(event_bus),
                )
            }
        };
        Self::build(inner.sink_factory, inner.descriptor, Some(event_bus))
    }

    fn build(
        sink_factory: Arc<dyn AudioSinkFactory>,
        descriptor: SinkDescriptor,
        event_bus: Option<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            inner: Arc::new(Inner {
                sink_factory,
                descriptor,
                session: Mutex::new(None),
                setup: AsyncMutex::new(()),
                state,
                stats: Mutex::new(SessionStats::default()),
                listeners: Mutex::new(Listeners::default()),
                event_bus,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Session control
    // ------------------------------------------------------------------------

    /// Start a new session and run `request` to completion.
    ///
    /// `request` receives the session's chunk sender and cancellation token.
    /// It should resolve `Ok(())` on server completion or cancellation and
    /// `Err` on failure.
    ///
    /// Resolves once the stream is fully buffered in the sink (playback may
    /// still be running), once the session was stopped or replaced, or with
    /// the first error. A failed session ends in [`PlaybackState::Error`]
    /// and its sink is released.
    #[instrument(skip(self, request))]
    pub async fn start_streaming<F, Fut>(&self, request: F) -> Result<()>
    where
        F: FnOnce(ChunkSender, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let id = SessionId::new();
        let cancel = CancellationToken::new();

        let sink = {
            let _setup = self.inner.setup.lock().await;

            let previous = self.inner.session.lock().replace(ActiveSession {
                id,
                cancel: cancel.clone(),
                sink: None,
                watcher: None,
                drained: false,
                drained_signal: Arc::new(Notify::new()),
                started_at: Instant::now(),
            });
            if let Some(previous) = previous {
                debug!(previous = %previous.id, "Replacing active session");
                self.inner.emit(PlaybackEvent::Stopped {
                    session_id: previous.id.to_string(),
                });
                teardown_detached(previous).await;
            }

            *self.inner.stats.lock() = SessionStats::default();
            self.inner.state.send_replace(PlaybackState::Connecting);
            self.inner.emit(PlaybackEvent::SessionStarted {
                session_id: id.to_string(),
            });
            info!(session = %id, "Narration session started");

            let created = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                created = self.inner.sink_factory.create_sink(&self.inner.descriptor) => created,
            };
            let sink = match created {
                Ok(sink) => sink,
                Err(e) => {
                    let error = PlaybackError::Sink(format!("failed to create audio sink: {}", e));
                    return self.inner.fail(id, error).await;
                }
            };

            if !self.inner.attach_sink(id, sink.clone()) {
                // Stopped while the sink was being created.
                let released = core_async::spawn(async move { sink.release().await }).await;
                if let Ok(Err(e)) = released {
                    warn!(error = %e, "Failed to release orphaned sink");
                }
                return Ok(());
            }
            sink
        };

        let (sender, queue) = chunk_channel(cancel.clone());

        let request_cancel = cancel.clone();
        let request_fut = async move {
            let result = request(sender, request_cancel.clone()).await;
            let cancelled_first = request_cancel.is_cancelled();
            if result.is_err() {
                // Close the queue before drain can observe upstream completion.
                request_cancel.cancel();
            }
            (result, cancelled_first)
        };

        let progress_inner = self.inner.clone();
        let drain_fut = queue.drain_into(sink.as_ref(), move |progress| {
            progress_inner.on_drain_progress(id, progress)
        });

        let ((request_result, cancelled_first), drain_result) = tokio::join!(request_fut, drain_fut);

        match (request_result, drain_result) {
            (_, Err(error)) => self.inner.fail(id, error).await,
            (Err(error), _) if cancelled_first || error.is_cancellation() => {
                debug!(session = %id, error = %error, "Request ended after cancellation");
                Ok(())
            }
            (Err(error), _) => self.inner.fail(id, error).await,
            (Ok(()), Ok(DrainOutcome::Cancelled | DrainOutcome::Drained { .. })) => Ok(()),
        }
    }

    /// Pause the active session's transport. No-op without a session or
    /// while nothing is buffered yet.
    pub async fn pause(&self) -> Result<()> {
        if self.is_loading() {
            debug!("Nothing buffered yet, pause ignored");
            return Ok(());
        }
        let Some((id, sink)) = self.inner.active_sink() else {
            return Ok(());
        };
        sink.pause().await?;
        self.inner.on_transport(id, TransportState::Paused);
        Ok(())
    }

    /// Resume (or start) the active session's transport. No-op without a
    /// session or while nothing is buffered yet; the first chunk starts
    /// playback on its own.
    pub async fn resume(&self) -> Result<()> {
        if self.is_loading() {
            debug!("Nothing buffered yet, resume ignored");
            return Ok(());
        }
        let Some((id, sink)) = self.inner.active_sink() else {
            return Ok(());
        };
        sink.play().await?;
        self.inner.on_transport(id, TransportState::Playing);
        Ok(())
    }

    /// Tear down the active session: cancel its request, discard queued
    /// chunks and release the sink. Idempotent.
    pub async fn stop(&self) {
        let taken = self.inner.session.lock().take();
        let Some(session) = taken else {
            return;
        };

        session.cancel.cancel();
        self.inner.state.send_replace(PlaybackState::Stopped);
        self.inner.emit(PlaybackEvent::Stopped {
            session_id: session.id.to_string(),
        });
        info!(session = %session.id, "Narration session stopped");
        teardown_detached(session).await;
    }

    /// `stop()` plus dropping every `on_ended` listener.
    pub async fn cleanup(&self) {
        self.stop().await;
        self.inner.listeners.lock().callbacks.clear();
    }

    /// Register a callback fired once per session when its audio ends
    /// naturally. Dropping the returned [`Subscription`] unregisters it.
    ///
    /// Callbacks run on the controller's watcher task and must not block.
    pub fn on_ended<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.insert(id, Arc::new(callback));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.borrow().is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().is_paused()
    }

    /// Server completion seen and every chunk handed to the sink.
    pub fn is_stream_complete(&self) -> bool {
        if self.inner.state.borrow().is_stream_complete() {
            return true;
        }
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.drained)
            .unwrap_or(false)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session.lock().as_ref().map(|s| s.id)
    }

    /// Counters of the current (or most recent) session.
    pub fn stats(&self) -> SessionStats {
        *self.inner.stats.lock()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().callbacks.len()
    }
}

// ============================================================================
// Session bookkeeping
// ============================================================================

impl Inner {
    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Playback(event)).ok();
        }
    }

    fn active_sink(&self) -> Option<(SessionId, Arc<dyn AudioSink>)> {
        let slot = self.session.lock();
        let session = slot.as_ref()?;
        Some((session.id, session.sink.clone()?))
    }

    fn attach_sink(self: &Arc<Self>, id: SessionId, sink: Arc<dyn AudioSink>) -> bool {
        let mut slot = self.session.lock();
        let Some(session) = slot.as_mut().filter(|s| s.id == id) else {
            return false;
        };
        let transport = sink.transport();
        session.sink = Some(sink);
        session.watcher = Some(core_async::spawn(watch_transport(
            Arc::downgrade(self),
            id,
            transport,
            session.drained_signal.clone(),
        )));
        true
    }

    /// Apply `next` if `id` is still the active session. Returns whether the
    /// state changed.
    fn transition<F>(&self, id: SessionId, next: F) -> bool
    where
        F: FnOnce(&mut ActiveSession, &PlaybackState) -> Option<PlaybackState>,
    {
        let mut slot = self.session.lock();
        let Some(session) = slot.as_mut().filter(|s| s.id == id) else {
            return false;
        };
        let current = self.state.borrow().clone();
        match next(session, &current) {
            Some(state) if state != current => {
                self.state.send_replace(state);
                true
            }
            _ => false,
        }
    }

    fn on_drain_progress(&self, id: SessionId, progress: DrainProgress) {
        match progress {
            DrainProgress::FirstChunkAppended => {
                let changed = self.transition(id, |session, current| {
                    let latency = session.started_at.elapsed().as_millis() as u64;
                    self.stats.lock().first_chunk_latency_ms = Some(latency);
                    matches!(current, PlaybackState::Connecting).then_some(PlaybackState::Buffering)
                });
                if changed {
                    debug!(session = %id, "First chunk buffered");
                    self.emit(PlaybackEvent::FirstChunkBuffered {
                        session_id: id.to_string(),
                    });
                }
            }
            DrainProgress::Drained { chunks, bytes } => {
                {
                    let mut stats = self.stats.lock();
                    stats.chunks_appended = chunks;
                    stats.bytes_appended = bytes;
                }

                let mut drained_signal = None;
                self.transition(id, |session, current| {
                    session.drained = true;
                    drained_signal = Some(session.drained_signal.clone());
                    match current {
                        PlaybackState::Playing { .. } => Some(PlaybackState::Playing { drained: true }),
                        PlaybackState::Paused { .. } => Some(PlaybackState::Paused { drained: true }),
                        _ => None,
                    }
                });
                if let Some(signal) = drained_signal {
                    info!(session = %id, chunks, bytes, "Narration stream fully buffered");
                    self.emit(PlaybackEvent::StreamCompleted {
                        session_id: id.to_string(),
                        chunks,
                        bytes,
                    });
                    // A sink that already reported its end completes now.
                    signal.notify_one();
                }
            }
        }
    }

    fn on_transport(&self, id: SessionId, transport: TransportState) {
        let event = match transport {
            TransportState::Playing => {
                let changed = self.transition(id, |session, current| {
                    matches!(
                        current,
                        PlaybackState::Buffering | PlaybackState::Playing { .. } | PlaybackState::Paused { .. }
                    )
                    .then_some(PlaybackState::Playing {
                        drained: session.drained,
                    })
                });
                changed.then(|| PlaybackEvent::Playing {
                    session_id: id.to_string(),
                })
            }
            TransportState::Paused => {
                let changed = self.transition(id, |session, current| {
                    (current.is_playing() || matches!(current, PlaybackState::Buffering)).then_some(
                        PlaybackState::Paused {
                            drained: session.drained,
                        },
                    )
                });
                changed.then(|| PlaybackEvent::Paused {
                    session_id: id.to_string(),
                })
            }
            TransportState::Idle | TransportState::Ended => None,
        };

        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn is_drained(&self, id: SessionId) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.id == id && s.drained)
    }

    /// Finish the session after its audio ended. Runs on the watcher task.
    async fn complete(&self, id: SessionId) {
        let session = {
            let mut slot = self.session.lock();
            if !slot.as_ref().is_some_and(|s| s.id == id) {
                return;
            }
            let session = slot.take();
            self.state.send_replace(PlaybackState::Completed);
            session
        };
        let Some(mut session) = session else {
            return;
        };

        // This task is the watcher; detach instead of aborting it.
        session.watcher.take();
        teardown(session).await;

        info!(session = %id, "Narration ended");
        self.emit(PlaybackEvent::Ended {
            session_id: id.to_string(),
        });

        let callbacks: Vec<EndedCallback> = self.listeners.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Move the session into the error state and release its sink.
    ///
    /// Resolves `Ok(())` when the session was already stopped or replaced:
    /// its failure is a side effect of cancellation.
    async fn fail(&self, id: SessionId, error: PlaybackError) -> Result<()> {
        let session = {
            let mut slot = self.session.lock();
            if !slot.as_ref().is_some_and(|s| s.id == id) {
                debug!(session = %id, error = %error, "Ignoring failure of inactive session");
                return Ok(());
            }
            self.state.send_replace(PlaybackState::Error {
                message: error.to_string(),
            });
            slot.take()
        };

        warn!(session = %id, error = %error, "Narration session failed");
        self.emit(PlaybackEvent::Error {
            session_id: id.to_string(),
            message: error.to_string(),
        });
        if let Some(session) = session {
            teardown_detached(session).await;
        }
        Err(error)
    }
}

async fn teardown(session: ActiveSession) {
    session.cancel.cancel();
    if let Some(watcher) = session.watcher {
        watcher.abort();
    }
    if let Some(sink) = session.sink {
        if let Err(e) = sink.release().await {
            warn!(session = %session.id, error = %e, "Failed to release audio sink");
        }
    }
}

/// Run [`teardown`] on its own task. Dropping the caller mid-release leaves
/// the release running, so the sink is never orphaned.
async fn teardown_detached(session: ActiveSession) {
    let id = session.id;
    if let Err(e) = core_async::spawn(teardown(session)).await {
        warn!(session = %id, error = %e, "Session teardown task failed");
    }
}

async fn watch_transport(
    inner: Weak<Inner>,
    id: SessionId,
    mut transport: watch::Receiver<TransportState>,
    drained: Arc<Notify>,
) {
    let mut current = *transport.borrow_and_update();
    loop {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if current == TransportState::Ended {
            if inner.is_drained(id) {
                inner.complete(id).await;
                return;
            }
            debug!(session = %id, "Sink ended before the stream drained, holding");
        } else {
            inner.on_transport(id, current);
        }
        drop(inner);

        tokio::select! {
            changed = transport.changed() => {
                if changed.is_err() {
                    return;
                }
                current = *transport.borrow_and_update();
            }
            _ = drained.notified() => {}
        }
    }
}

// ============================================================================
// Listener Subscription
// ============================================================================

/// Handle for an `on_ended` listener. Unregisters on drop.
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().callbacks.remove(&self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink {
        transport: watch::Sender<TransportState>,
    }

    #[async_trait]
    impl AudioSink for NullSink {
        async fn append(&self, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn play(&self) -> BridgeResult<()> {
            self.transport.send_replace(TransportState::Playing);
            Ok(())
        }
        async fn pause(&self) -> BridgeResult<()> {
            self.transport.send_replace(TransportState::Paused);
            Ok(())
        }
        async fn end_of_stream(&self) -> BridgeResult<()> {
            Ok(())
        }
        async fn release(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn transport(&self) -> watch::Receiver<TransportState> {
            self.transport.subscribe()
        }
    }

    struct NullFactory;

    #[async_trait]
    impl AudioSinkFactory for NullFactory {
        async fn create_sink(&self, _descriptor: &SinkDescriptor) -> BridgeResult<Arc<dyn AudioSink>> {
            let (transport, _) = watch::channel(TransportState::Idle);
            Ok(Arc::new(NullSink { transport }))
        }
    }

    #[test]
    fn test_session_id_display_is_uuid() {
        let id = SessionId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
        assert_ne!(SessionId::new(), id);
    }

    #[tokio::test]
    async fn test_idle_controller_operations_are_noops() {
        let controller = PlaybackController::new(Arc::new(NullFactory));

        controller.pause().await.unwrap();
        controller.resume().await.unwrap();
        controller.stop().await;

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.session_id().is_none());
    }

    #[tokio::test]
    async fn test_subscription_drop_unregisters_listener() {
        let controller = PlaybackController::new(Arc::new(NullFactory));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let first = controller.on_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let second = controller.on_ended(|| {});
        assert_eq!(controller.listener_count(), 2);

        drop(first);
        assert_eq!(controller.listener_count(), 1);

        second.unsubscribe();
        assert_eq!(controller.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_clears_listeners() {
        let controller = PlaybackController::new(Arc::new(NullFactory));
        let _sub = controller.on_ended(|| {});

        controller.cleanup().await;

        assert_eq!(controller.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_with_event_bus_keeps_descriptor() {
        let descriptor = SinkDescriptor::for_encoding("ogg_opus", 48_000);
        let controller = PlaybackController::with_descriptor(Arc::new(NullFactory), descriptor.clone())
            .with_event_bus(EventBus::new(8));

        assert_eq!(controller.inner.descriptor, descriptor);
        assert!(controller.inner.event_bus.is_some());
    }
}
