//! # Page Synchronization
//!
//! Keeps narration and the visible page in step:
//!
//! - Any page change stops the current narration immediately.
//! - When a page's narration ends naturally and a next page exists, the page
//!   turns automatically after a short delay and the new page is read after
//!   a settle delay.
//! - Pages turned by the reader are never read automatically.
//! - `toggle_play` is the single entry point for play / pause / resume.
//!
//! ```text
//!  on_ended ──> [auto_advance_delay] ──> change_page(Automatic) ──> [auto_restart_delay] ──> narrate
//!  go_to_page / next_page / prev_page ──> change_page(User)        (stop only)
//! ```
//!
//! Every delayed step re-checks a generation counter after it wakes up, so a
//! page change made while it slept cancels it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use core_async::sync::{watch, CancellationToken, Mutex as AsyncMutex};
use core_async::task::{abort_and_wait, JoinHandle};
use core_async::time::sleep_or_cancel;
use core_playback::{NarrationSource, PlaybackController, PlaybackState, Subscription};
use core_runtime::config::NarrationConfig;
use core_runtime::events::{CoreEvent, EventBus, ReaderEvent};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::story::Story;

// ============================================================================
// Page State
// ============================================================================

/// Why the page changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageChangeOrigin {
    /// Reader navigation (buttons, swipe, page picker)
    User,
    /// Narration of the previous page ended
    Automatic,
}

/// Snapshot of the reader's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageState {
    pub current: usize,
    pub total: usize,
    /// An automatic page turn is scheduled.
    pub auto_advance_pending: bool,
}

impl PageState {
    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.total
    }
}

struct NavState {
    current: usize,
    advance_timer: Option<JoinHandle<()>>,
    /// Narration task for the current page, settle delay included.
    narration: Option<JoinHandle<()>>,
}

struct SyncInner {
    controller: PlaybackController,
    source: Arc<dyn NarrationSource>,
    pages: Vec<String>,
    config: NarrationConfig,
    /// Serializes page transitions.
    nav: AsyncMutex<NavState>,
    /// Bumped under `nav` on every page change, replay and shutdown.
    generation: AtomicU64,
    shutdown: CancellationToken,
    page_state: watch::Sender<PageState>,
    event_bus: Option<EventBus>,
    ended_subscription: Mutex<Option<Subscription>>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives read-aloud for one story on top of a [`PlaybackController`].
///
/// Cheap to clone; clones share the same reader position.
#[derive(Clone)]
pub struct PageSyncCoordinator {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for PageSyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSyncCoordinator")
            .field("page", &*self.inner.page_state.borrow())
            .field("source", &self.inner.source.name())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl PageSyncCoordinator {
    pub fn builder(
        controller: PlaybackController,
        source: Arc<dyn NarrationSource>,
    ) -> PageSyncCoordinatorBuilder {
        PageSyncCoordinatorBuilder {
            controller,
            source,
            pages: Vec::new(),
            config: NarrationConfig::default(),
            event_bus: None,
            start_page: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// Jump to `index` on the reader's request. Stops narration; does not
    /// start reading the new page.
    #[instrument(skip(self))]
    pub async fn go_to_page(&self, index: usize) -> Result<()> {
        let total = self.inner.pages.len();
        if index >= total {
            return Err(CoreError::PageOutOfRange { index, total });
        }

        let mut nav = self.inner.nav.lock().await;
        if nav.current != index {
            self.inner.change_page(&mut nav, index, PageChangeOrigin::User).await;
        }
        Ok(())
    }

    /// Turn to the next page. Returns `false` on the last page.
    pub async fn next_page(&self) -> bool {
        let mut nav = self.inner.nav.lock().await;
        let next = nav.current + 1;
        if next >= self.inner.pages.len() {
            return false;
        }
        self.inner.change_page(&mut nav, next, PageChangeOrigin::User).await;
        true
    }

    /// Turn to the previous page. Returns `false` on the first page.
    pub async fn prev_page(&self) -> bool {
        let mut nav = self.inner.nav.lock().await;
        let Some(prev) = nav.current.checked_sub(1) else {
            return false;
        };
        self.inner.change_page(&mut nav, prev, PageChangeOrigin::User).await;
        true
    }

    // ------------------------------------------------------------------------
    // Read-aloud
    // ------------------------------------------------------------------------

    /// Play / pause toggle.
    ///
    /// - playing: pause
    /// - paused, or buffered but not started: resume
    /// - still connecting: ignored
    /// - nothing running, finished, stopped or failed: read the current page
    ///   from the start
    #[instrument(skip(self))]
    pub async fn toggle_play(&self) -> Result<()> {
        match self.inner.controller.state() {
            PlaybackState::Playing { .. } => self.inner.controller.pause().await?,
            PlaybackState::Paused { .. } | PlaybackState::Buffering => {
                self.inner.controller.resume().await?
            }
            PlaybackState::Connecting => debug!("Narration still loading, toggle ignored"),
            PlaybackState::Idle
            | PlaybackState::Completed
            | PlaybackState::Stopped
            | PlaybackState::Error { .. } => self.inner.read_current_page().await,
        }
        Ok(())
    }

    /// Stop narration and cancel pending page turns. The coordinator stays
    /// usable.
    pub async fn stop(&self) {
        let mut nav = self.inner.nav.lock().await;
        self.inner.invalidate_pending(&mut nav).await;
        self.inner.controller.stop().await;
    }

    /// Tear down for good: cancel pending work, stop narration and stop
    /// listening for the end of playback.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.stop().await;
        self.inner.ended_subscription.lock().take();
        debug!("Page synchronization shut down");
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn current_page(&self) -> usize {
        self.inner.page_state.borrow().current
    }

    pub fn page_count(&self) -> usize {
        self.inner.pages.len()
    }

    pub fn page_state(&self) -> PageState {
        *self.inner.page_state.borrow()
    }

    pub fn subscribe_pages(&self) -> watch::Receiver<PageState> {
        self.inner.page_state.subscribe()
    }

    /// Reading indicator: narration audio is currently playing.
    pub fn is_reading(&self) -> bool {
        self.inner.controller.is_playing()
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.inner.controller
    }
}

// ============================================================================
// Transitions
// ============================================================================

impl SyncInner {
    fn emit(&self, event: ReaderEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Reader(event)).ok();
        }
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation && !self.shutdown.is_cancelled()
    }

    fn has_text(&self, page: usize) -> bool {
        self.pages.get(page).is_some_and(|text| !text.is_empty())
    }

    /// Cancel the pending page turn and any narration task. Returns the new
    /// generation.
    async fn invalidate_pending(&self, nav: &mut NavState) -> u64 {
        let generation = self.bump_generation();
        if let Some(timer) = nav.advance_timer.take() {
            timer.abort();
        }
        if let Some(narration) = nav.narration.take() {
            abort_and_wait(narration).await;
        }
        self.page_state.send_if_modified(|state| {
            std::mem::replace(&mut state.auto_advance_pending, false)
        });
        generation
    }

    async fn change_page(self: &Arc<Self>, nav: &mut NavState, to: usize, origin: PageChangeOrigin) {
        let from = nav.current;
        let generation = self.invalidate_pending(nav).await;
        self.controller.stop().await;

        nav.current = to;
        self.page_state.send_modify(|state| state.current = to);

        let automatic = origin == PageChangeOrigin::Automatic;
        info!(from, to, automatic, "Page changed");
        self.emit(ReaderEvent::PageChanged { from, to, automatic });

        if automatic {
            if self.has_text(to) {
                nav.narration =
                    Some(self.spawn_narration(to, generation, self.config.auto_restart_delay()));
            } else {
                debug!(page = to, "Page has no text, not reading");
            }
        }
    }

    /// Start reading the current page from the beginning. Cancels a pending
    /// automatic page turn.
    async fn read_current_page(self: &Arc<Self>) {
        let mut nav = self.nav.lock().await;
        let page = nav.current;
        if !self.has_text(page) {
            debug!(page, "Page has no text, nothing to read");
            return;
        }

        let generation = self.invalidate_pending(&mut nav).await;
        nav.narration = Some(self.spawn_narration(page, generation, Duration::ZERO));
    }

    fn spawn_narration(self: &Arc<Self>, page: usize, generation: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        core_async::spawn(async move {
            if !delay.is_zero() && !sleep_or_cancel(delay, &shutdown).await {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_current(generation) {
                debug!(page, "Page changed before narration started");
                return;
            }
            inner.narrate(page).await;
        })
    }

    async fn narrate(&self, page: usize) {
        let Some(text) = self.pages.get(page).cloned() else {
            return;
        };

        self.emit(ReaderEvent::NarrationStarted { page });
        let source = self.source.clone();
        let result = self
            .controller
            .start_streaming(move |chunks, cancel| async move {
                source.narrate(&text, chunks, cancel).await
            })
            .await;

        if let Err(e) = result {
            warn!(page, error = %e, "Page narration failed");
            self.emit(ReaderEvent::NarrationFailed {
                page,
                message: e.to_string(),
            });
        }
    }

    /// Narration ended naturally on the page that was current at
    /// `generation`.
    async fn handle_ended(self: Arc<Self>, generation: u64) {
        let mut nav = self.nav.lock().await;
        if !self.is_current(generation) {
            debug!("Ignoring end of narration for a page no longer shown");
            return;
        }

        let from = nav.current;
        let total = self.pages.len();
        if from + 1 >= total {
            info!(pages = total, "Story finished");
            self.emit(ReaderEvent::StoryFinished { pages: total });
            return;
        }
        if !self.config.auto_advance {
            return;
        }

        let delay = self.config.auto_advance_delay();
        self.page_state
            .send_modify(|state| state.auto_advance_pending = true);
        self.emit(ReaderEvent::AutoAdvanceScheduled {
            from,
            delay_ms: self.config.auto_advance_delay_ms,
        });

        let weak = Arc::downgrade(&self);
        let shutdown = self.shutdown.clone();
        let timer = core_async::spawn(async move {
            if !sleep_or_cancel(delay, &shutdown).await {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.auto_advance(generation).await;
            }
        });
        if let Some(previous) = nav.advance_timer.replace(timer) {
            previous.abort();
        }
    }

    async fn auto_advance(self: Arc<Self>, generation: u64) {
        let mut nav = self.nav.lock().await;
        if !self.is_current(generation) {
            debug!("Automatic page turn cancelled");
            return;
        }
        // Running inside this timer; detach rather than abort it.
        nav.advance_timer.take();

        let to = nav.current + 1;
        if to < self.pages.len() {
            self.change_page(&mut nav, to, PageChangeOrigin::Automatic).await;
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct PageSyncCoordinatorBuilder {
    controller: PlaybackController,
    source: Arc<dyn NarrationSource>,
    pages: Vec<String>,
    config: NarrationConfig,
    event_bus: Option<EventBus>,
    start_page: usize,
}

impl PageSyncCoordinatorBuilder {
    /// Narration text per page. Empty strings mark pages without text.
    pub fn pages(mut self, pages: Vec<String>) -> Self {
        self.pages = pages;
        self
    }

    pub fn story(self, story: &Story) -> Self {
        self.pages(story.narration_texts())
    }

    pub fn config(mut self, config: NarrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Initial page, clamped to the story.
    pub fn start_page(mut self, page: usize) -> Self {
        self.start_page = page;
        self
    }

    pub fn build(self) -> PageSyncCoordinator {
        let total = self.pages.len();
        let current = self.start_page.min(total.saturating_sub(1));
        let (page_state, _) = watch::channel(PageState {
            current,
            total,
            auto_advance_pending: false,
        });

        let inner = Arc::new(SyncInner {
            controller: self.controller,
            source: self.source,
            pages: self.pages,
            config: self.config,
            nav: AsyncMutex::new(NavState {
                current,
                advance_timer: None,
                narration: None,
            }),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            page_state,
            event_bus: self.event_bus,
            ended_subscription: Mutex::new(None),
        });

        let subscription = inner.controller.on_ended(ended_callback(Arc::downgrade(&inner)));
        *inner.ended_subscription.lock() = Some(subscription);

        PageSyncCoordinator { inner }
    }
}

fn ended_callback(weak: Weak<SyncInner>) -> impl Fn() + Send + Sync + 'static {
    move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let generation = inner.generation.load(Ordering::SeqCst);
        core_async::spawn(inner.handle_ended(generation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_state_edges() {
        let state = PageState {
            current: 0,
            total: 3,
            auto_advance_pending: false,
        };
        assert!(state.is_first());
        assert!(!state.is_last());

        let last = PageState { current: 2, ..state };
        assert!(last.is_last());
        assert!(!last.is_first());
    }

    #[test]
    fn test_empty_story_state_is_both_first_and_last() {
        let state = PageState::default();
        assert!(state.is_first());
        assert!(state.is_last());
    }
}
