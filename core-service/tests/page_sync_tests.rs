use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{AudioSink, AudioSinkFactory, SinkDescriptor, TransportState};
use bytes::Bytes;
use core_async::sync::CancellationToken;
use core_playback::{AudioChunk, ChunkSender, NarrationSource, PlaybackController, PlaybackError, PlaybackState};
use core_runtime::config::NarrationConfig;
use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
use core_service::{CoreError, PageSyncCoordinator};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Clone, Copy)]
enum Behaviour {
    /// Sends the page text as one chunk, then completes.
    Complete,
    /// Sends one chunk, then waits for cancellation.
    HangAfterFirstChunk,
    /// Never sends anything before cancellation.
    HangBeforeChunk,
    Fail,
}

struct FakeSource {
    behaviour: Behaviour,
    texts: Mutex<Vec<String>>,
}

impl FakeSource {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            texts: Mutex::new(Vec::new()),
        })
    }

    fn narrated(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl NarrationSource for FakeSource {
    async fn narrate(
        &self,
        text: &str,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> core_playback::Result<()> {
        self.texts.lock().push(text.to_string());
        match self.behaviour {
            Behaviour::Complete => {
                chunks.send(AudioChunk::new(text.as_bytes().to_vec())).ok();
                Ok(())
            }
            Behaviour::HangAfterFirstChunk => {
                chunks.send(AudioChunk::new(text.as_bytes().to_vec())).ok();
                cancel.cancelled().await;
                Ok(())
            }
            Behaviour::HangBeforeChunk => {
                cancel.cancelled().await;
                Ok(())
            }
            Behaviour::Fail => Err(PlaybackError::Protocol {
                code: 40000001,
                message: "invalid text".to_string(),
            }),
        }
    }
}

struct FakeSink {
    appended: Mutex<Vec<Bytes>>,
    released: AtomicUsize,
    transport: watch::Sender<TransportState>,
}

impl FakeSink {
    fn finish_playback(&self) {
        self.transport.send_replace(TransportState::Ended);
    }

    fn text(&self) -> String {
        self.appended
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn append(&self, chunk: Bytes) -> BridgeResult<()> {
        self.appended.lock().push(chunk);
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
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn transport(&self) -> watch::Receiver<TransportState> {
        self.transport.subscribe()
    }
}

#[derive(Default)]
struct FakeSinkFactory {
    sinks: Mutex<Vec<Arc<FakeSink>>>,
}

impl FakeSinkFactory {
    fn created(&self) -> usize {
        self.sinks.lock().len()
    }

    fn sink(&self, index: usize) -> Arc<FakeSink> {
        self.sinks.lock()[index].clone()
    }
}

#[async_trait]
impl AudioSinkFactory for FakeSinkFactory {
    async fn create_sink(&self, _descriptor: &SinkDescriptor) -> BridgeResult<Arc<dyn AudioSink>> {
        let (transport, _) = watch::channel(TransportState::Idle);
        let sink = Arc::new(FakeSink {
            appended: Mutex::new(Vec::new()),
            released: AtomicUsize::new(0),
            transport,
        });
        self.sinks.lock().push(sink.clone());
        Ok(sink)
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Reader {
    coordinator: PageSyncCoordinator,
    factory: Arc<FakeSinkFactory>,
    source: Arc<FakeSource>,
    events: broadcast::Receiver<CoreEvent>,
}

fn fast_timing() -> NarrationConfig {
    NarrationConfig {
        auto_advance: true,
        auto_advance_delay_ms: 20,
        auto_restart_delay_ms: 10,
    }
}

fn reader(pages: &[&str], start_page: usize, behaviour: Behaviour, config: NarrationConfig) -> Reader {
    let factory = Arc::new(FakeSinkFactory::default());
    let source = FakeSource::new(behaviour);
    let bus = EventBus::new(64);
    let events = bus.subscribe();
    let controller = PlaybackController::new(factory.clone()).with_event_bus(bus.clone());

    let coordinator = PageSyncCoordinator::builder(controller, source.clone())
        .pages(pages.iter().map(|p| p.to_string()).collect())
        .config(config)
        .event_bus(bus)
        .start_page(start_page)
        .build();

    Reader {
        coordinator,
        factory,
        source,
        events,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Narration is audible and the whole page is in the sink.
fn fully_buffered(r: &Reader) -> bool {
    r.coordinator.is_reading() && r.coordinator.controller().is_stream_complete()
}

/// Let spawned tasks run without moving a paused clock.
async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

fn reader_events(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<ReaderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Reader(event) = event {
            events.push(event);
        }
    }
    events
}

const FOUR_PAGES: [&str; 4] = ["page one", "page two", "page three", "page four"];

// ============================================================================
// Automatic page turns
// ============================================================================

#[tokio::test]
async fn test_natural_end_advances_and_reads_next_page() {
    let mut r = reader(&FOUR_PAGES, 1, Behaviour::Complete, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.factory.created() == 1 && fully_buffered(&r)).await;
    assert_eq!(r.factory.sink(0).text(), "page two");

    r.factory.sink(0).finish_playback();

    wait_until(|| r.factory.created() == 2 && r.coordinator.is_reading()).await;
    assert_eq!(r.coordinator.current_page(), 2);
    assert_eq!(r.factory.sink(1).text(), "page three");
    assert!(!r.coordinator.page_state().auto_advance_pending);

    let events = reader_events(&mut r.events);
    assert!(events.contains(&ReaderEvent::AutoAdvanceScheduled {
        from: 1,
        delay_ms: 20
    }));
    assert!(events.contains(&ReaderEvent::PageChanged {
        from: 1,
        to: 2,
        automatic: true
    }));
    assert!(events.contains(&ReaderEvent::NarrationStarted { page: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_page_turn_and_restart_wait_for_settle_delays() {
    let config = NarrationConfig {
        auto_advance: true,
        auto_advance_delay_ms: 500,
        auto_restart_delay_ms: 300,
    };
    let mut r = reader(&FOUR_PAGES, 0, Behaviour::Complete, config);

    r.coordinator.toggle_play().await.unwrap();
    settle().await;
    assert!(fully_buffered(&r));

    r.factory.sink(0).finish_playback();
    settle().await;
    assert!(r.coordinator.page_state().auto_advance_pending);

    tokio::time::advance(Duration::from_millis(499)).await;
    settle().await;
    assert_eq!(r.coordinator.current_page(), 0);
    assert!(!reader_events(&mut r.events)
        .iter()
        .any(|e| matches!(e, ReaderEvent::PageChanged { .. })));

    tokio::time::advance(Duration::from_millis(2)).await;
    settle().await;
    assert_eq!(r.coordinator.current_page(), 1);
    assert_eq!(r.factory.created(), 1);

    tokio::time::advance(Duration::from_millis(299)).await;
    settle().await;
    assert_eq!(r.factory.created(), 1);
    assert_eq!(r.source.narrated(), vec!["page one"]);

    tokio::time::advance(Duration::from_millis(2)).await;
    settle().await;
    assert_eq!(r.factory.created(), 2);
    assert_eq!(r.factory.sink(1).text(), "page two");
}

#[tokio::test]
async fn test_natural_end_on_last_page_does_not_advance() {
    let mut r = reader(&FOUR_PAGES, 3, Behaviour::Complete, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.factory.created() == 1 && fully_buffered(&r)).await;
    r.factory.sink(0).finish_playback();

    wait_until(|| r.coordinator.controller().state() == PlaybackState::Completed).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(r.coordinator.current_page(), 3);
    assert_eq!(r.factory.created(), 1);
    let events = reader_events(&mut r.events);
    assert!(events.contains(&ReaderEvent::StoryFinished { pages: 4 }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ReaderEvent::PageChanged { .. })));
}

#[tokio::test]
async fn test_auto_advance_disabled_stays_on_page() {
    let config = NarrationConfig {
        auto_advance: false,
        ..fast_timing()
    };
    let r = reader(&FOUR_PAGES, 0, Behaviour::Complete, config);

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| fully_buffered(&r)).await;
    r.factory.sink(0).finish_playback();
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(r.coordinator.current_page(), 0);
    assert_eq!(r.factory.created(), 1);
}

#[tokio::test]
async fn test_automatic_turn_to_page_without_text_does_not_read() {
    let r = reader(&["first", "", "third"], 0, Behaviour::Complete, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| fully_buffered(&r)).await;
    r.factory.sink(0).finish_playback();

    wait_until(|| r.coordinator.current_page() == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(r.factory.created(), 1);
    assert_eq!(r.source.narrated(), vec!["first"]);
}

// ============================================================================
// Reader navigation
// ============================================================================

#[tokio::test]
async fn test_manual_page_change_stops_without_restart() {
    let r = reader(&FOUR_PAGES, 0, Behaviour::HangAfterFirstChunk, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.coordinator.is_reading()).await;

    assert!(r.coordinator.next_page().await);

    assert_eq!(r.coordinator.current_page(), 1);
    assert_eq!(r.coordinator.controller().state(), PlaybackState::Stopped);
    assert_eq!(r.factory.sink(0).released.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(r.factory.created(), 1);
    assert!(!r.coordinator.is_reading());
}

#[tokio::test]
async fn test_navigation_cancels_pending_auto_advance() {
    let config = NarrationConfig {
        auto_advance_delay_ms: 100,
        ..fast_timing()
    };
    let r = reader(&FOUR_PAGES, 0, Behaviour::Complete, config);

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| fully_buffered(&r)).await;
    r.factory.sink(0).finish_playback();
    wait_until(|| r.coordinator.page_state().auto_advance_pending).await;

    r.coordinator.go_to_page(3).await.unwrap();
    assert!(!r.coordinator.page_state().auto_advance_pending);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(r.coordinator.current_page(), 3);
    assert_eq!(r.factory.created(), 1);
}

#[tokio::test]
async fn test_navigation_is_clamped() {
    let r = reader(&FOUR_PAGES, 0, Behaviour::Complete, fast_timing());

    assert!(!r.coordinator.prev_page().await);
    assert_eq!(r.coordinator.current_page(), 0);

    r.coordinator.go_to_page(3).await.unwrap();
    assert!(!r.coordinator.next_page().await);
    assert_eq!(r.coordinator.current_page(), 3);

    match r.coordinator.go_to_page(4).await {
        Err(CoreError::PageOutOfRange { index, total }) => {
            assert_eq!(index, 4);
            assert_eq!(total, 4);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_same_page_navigation_is_noop() {
    let mut r = reader(&FOUR_PAGES, 2, Behaviour::HangAfterFirstChunk, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.coordinator.is_reading()).await;

    r.coordinator.go_to_page(2).await.unwrap();

    assert!(r.coordinator.is_reading());
    assert!(!reader_events(&mut r.events)
        .iter()
        .any(|e| matches!(e, ReaderEvent::PageChanged { .. })));
}

// ============================================================================
// Play / pause toggle
// ============================================================================

#[tokio::test]
async fn test_toggle_pauses_and_resumes() {
    let r = reader(&FOUR_PAGES, 0, Behaviour::HangAfterFirstChunk, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.coordinator.is_reading()).await;

    r.coordinator.toggle_play().await.unwrap();
    assert!(r.coordinator.controller().is_paused());
    assert!(!r.coordinator.is_reading());

    r.coordinator.toggle_play().await.unwrap();
    assert!(r.coordinator.is_reading());
    assert_eq!(r.factory.created(), 1);
}

#[tokio::test]
async fn test_toggle_while_loading_is_ignored() {
    let r = reader(&FOUR_PAGES, 0, Behaviour::HangBeforeChunk, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.coordinator.controller().is_loading() && r.factory.created() == 1).await;

    r.coordinator.toggle_play().await.unwrap();

    assert!(r.coordinator.controller().is_loading());
    assert_eq!(r.factory.created(), 1);
    assert_eq!(r.source.narrated().len(), 1);
}

#[tokio::test]
async fn test_toggle_after_stop_reads_page_again() {
    let r = reader(&FOUR_PAGES, 0, Behaviour::HangAfterFirstChunk, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.coordinator.is_reading()).await;
    r.coordinator.stop().await;
    assert_eq!(r.coordinator.controller().state(), PlaybackState::Stopped);

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| r.factory.created() == 2 && r.coordinator.is_reading()).await;
    assert_eq!(r.source.narrated(), vec!["page one", "page one"]);
}

#[tokio::test]
async fn test_toggle_on_page_without_text_does_nothing() {
    let r = reader(&["", "second"], 0, Behaviour::Complete, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(r.factory.created(), 0);
    assert_eq!(r.coordinator.controller().state(), PlaybackState::Idle);
}

// ============================================================================
// Failures and teardown
// ============================================================================

#[tokio::test]
async fn test_narration_failure_is_reported_and_never_advances() {
    let mut r = reader(&FOUR_PAGES, 0, Behaviour::Fail, fast_timing());

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| matches!(r.coordinator.controller().state(), PlaybackState::Error { .. })).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(r.coordinator.current_page(), 0);
    let events = reader_events(&mut r.events);
    assert!(events.iter().any(|e| matches!(
        e,
        ReaderEvent::NarrationFailed { page: 0, message } if message.contains("invalid text")
    )));

    // Navigation stays available after a failure.
    assert!(r.coordinator.next_page().await);
    assert_eq!(r.coordinator.current_page(), 1);
}

#[tokio::test]
async fn test_shutdown_unsubscribes_and_cancels_pending_turn() {
    let config = NarrationConfig {
        auto_advance_delay_ms: 100,
        ..fast_timing()
    };
    let r = reader(&FOUR_PAGES, 0, Behaviour::Complete, config);
    assert_eq!(r.coordinator.controller().listener_count(), 1);

    r.coordinator.toggle_play().await.unwrap();
    wait_until(|| fully_buffered(&r)).await;
    r.factory.sink(0).finish_playback();
    wait_until(|| r.coordinator.page_state().auto_advance_pending).await;

    r.coordinator.shutdown().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(r.coordinator.current_page(), 0);
    assert_eq!(r.coordinator.controller().listener_count(), 0);
    assert_eq!(r.factory.created(), 1);
}
