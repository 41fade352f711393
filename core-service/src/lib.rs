//! Core service façade for the storybook reader.
//!
//! This crate wires host-provided bridges (streaming HTTP, audio sink) into
//! the narration core: one [`PlaybackController`] shared by every story, the
//! Volcengine TTS connector as the narration source and a
//! [`PageSyncCoordinator`] for the story currently open. Desktop apps
//! typically enable the `desktop-shims` feature, which supplies reqwest and a
//! file-spooling sink when the host injects nothing.

pub mod error;
pub mod page_sync;
pub mod story;

pub use error::{CoreError, Result};
pub use page_sync::{PageChangeOrigin, PageState, PageSyncCoordinator, PageSyncCoordinatorBuilder};
pub use story::{Story, StoryPage};

pub use core_runtime::config::{CoreConfig, NarrationConfig, TtsApiConfig};
pub use core_runtime::events::{CoreEvent, EventStream, PlaybackEvent, ReaderEvent};
pub use core_runtime::logging::{init_logging, LoggingConfig};

use std::sync::Arc;

use bridge_traits::SinkDescriptor;
use core_playback::{NarrationSource, PlaybackController, ProtocolConfig};
use core_runtime::events::EventBus;
use parking_lot::Mutex;
use provider_volcengine_tts::VolcengineTtsConnector;
use tracing::{debug, info};

/// Primary façade exposed to host applications.
///
/// Only one story is open at a time; opening another shuts the previous
/// reader down first.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    event_bus: EventBus,
    controller: PlaybackController,
    source: Arc<dyn NarrationSource>,
    reader: Arc<Mutex<Option<PageSyncCoordinator>>>,
}

impl CoreService {
    /// Create a new service narrating through the Volcengine TTS API.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_bus_capacity);
        let descriptor = SinkDescriptor::for_encoding(&config.tts.encoding, config.tts.sample_rate);
        let controller = PlaybackController::with_descriptor(config.sink_factory.clone(), descriptor)
            .with_event_bus(event_bus.clone());
        let source: Arc<dyn NarrationSource> = Arc::new(VolcengineTtsConnector::new(
            config.http_client.clone(),
            config.tts.clone(),
        ));

        info!(source = source.name(), "Core service initialized");
        Ok(Self {
            config: Arc::new(config),
            event_bus,
            controller,
            source,
            reader: Arc::new(Mutex::new(None)),
        })
    }

    /// Replace the narration source, e.g. with a different TTS vendor.
    pub fn with_narration_source(mut self, source: Arc<dyn NarrationSource>) -> Self {
        self.source = source;
        self
    }

    /// Rebuild the Volcengine connector with custom stream parsing rules.
    pub fn with_protocol_config(self, protocol: ProtocolConfig) -> Self {
        let connector = VolcengineTtsConnector::new(self.config.http_client.clone(), self.config.tts.clone())
            .with_protocol_config(protocol);
        self.with_narration_source(Arc::new(connector))
    }

    /// Open `story` for reading at `start_page`.
    pub async fn open_story(&self, story: &Story, start_page: usize) -> PageSyncCoordinator {
        self.close_story().await;

        let coordinator = PageSyncCoordinator::builder(self.controller.clone(), self.source.clone())
            .story(story)
            .config(self.config.narration)
            .event_bus(self.event_bus.clone())
            .start_page(start_page)
            .build();

        info!(story = %story.id, pages = story.page_count(), "Story opened");
        *self.reader.lock() = Some(coordinator.clone());
        coordinator
    }

    /// The reader for the story currently open, if any.
    pub fn reader(&self) -> Option<PageSyncCoordinator> {
        self.reader.lock().clone()
    }

    /// Stop narration and release the open story.
    pub async fn close_story(&self) {
        let previous = self.reader.lock().take();
        if let Some(reader) = previous {
            reader.shutdown().await;
            debug!("Previous story closed");
        }
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> core_async::sync::broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Close the open story and drop every playback listener.
    pub async fn shutdown(&self) {
        self.close_story().await;
        self.controller.cleanup().await;
        info!("Core service shut down");
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("config", &self.config)
            .field("source", &self.source.name())
            .field("state", &self.controller.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{AudioSink, AudioSinkFactory, BridgeError, HttpClient, HttpRequest, HttpStreamResponse};

    struct OfflineHttpClient;

    #[async_trait]
    impl HttpClient for OfflineHttpClient {
        async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    struct NoSinkFactory;

    #[async_trait]
    impl AudioSinkFactory for NoSinkFactory {
        async fn create_sink(&self, _descriptor: &SinkDescriptor) -> BridgeResult<Arc<dyn AudioSink>> {
            Err(BridgeError::NotAvailable("no audio".to_string()))
        }
    }

    fn service() -> CoreService {
        let config = CoreConfig::builder()
            .http_client(Arc::new(OfflineHttpClient))
            .sink_factory(Arc::new(NoSinkFactory))
            .build()
            .unwrap();
        CoreService::new(config).unwrap()
    }

    fn story(pages: &[&str]) -> Story {
        Story::new(
            "story-1",
            "The Little Rabbit",
            pages.iter().map(|text| StoryPage::new(*text)).collect(),
        )
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = CoreConfig::builder()
            .http_client(Arc::new(OfflineHttpClient))
            .sink_factory(Arc::new(NoSinkFactory))
            .build()
            .unwrap();
        config.event_bus_capacity = 0;

        assert!(matches!(CoreService::new(config), Err(CoreError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_open_story_replaces_previous_reader() {
        let service = service();

        let first = service.open_story(&story(&["a", "b"]), 1).await;
        assert_eq!(first.current_page(), 1);
        assert_eq!(service.controller().listener_count(), 1);

        let second = service.open_story(&story(&["x", "y", "z"]), 9).await;
        assert_eq!(second.page_count(), 3);
        assert_eq!(second.current_page(), 2);
        assert_eq!(service.controller().listener_count(), 1);
        assert_eq!(service.reader().unwrap().page_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_sink_surfaces_as_failed_narration() {
        let service = service();
        let mut events = service.subscribe_events();
        let reader = service.open_story(&story(&["hello"]), 0).await;

        reader.toggle_play().await.unwrap();

        let failed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if let Ok(CoreEvent::Reader(ReaderEvent::NarrationFailed { message, .. })) =
                    events.recv().await
                {
                    return message;
                }
            }
        })
        .await
        .unwrap();

        assert!(failed.contains("Audio sink error"));
        assert!(matches!(
            service.controller().state(),
            core_playback::PlaybackState::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_story() {
        let service = service();
        service.open_story(&story(&["a"]), 0).await;

        service.shutdown().await;

        assert!(service.reader().is_none());
        assert_eq!(service.controller().listener_count(), 0);
    }
}
