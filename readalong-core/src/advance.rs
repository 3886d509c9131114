//! Auto-advance controller: moves through a story's units as narration ends.

use crate::config::AutoAdvanceConfig;
use crate::playback::{SessionId, SessionState};
use crate::sync::{NarrationEvent, PlaybackSynchronizer};
use crate::unit::NarrationRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "readalong::advance";

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The reader now shows unit `index`
    UnitShown { index: usize, total: usize },
    /// Narration of `from` ended; the next unit follows after `delay`
    AdvanceScheduled { from: usize, delay: Duration },
    /// The last unit finished with auto-follow on
    EndOfContent,
}

struct ReaderState {
    index: usize,
    auto_follow: bool,
    /// Session started for the current unit, until it ends or is cancelled
    active_session: Option<SessionId>,
    pending_advance: Option<CancellationToken>,
}

impl ReaderState {
    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending_advance.take() {
            debug!(target: LOG_TARGET, "Cancelling scheduled advance");
            token.cancel();
        }
    }
}

/// Drives narration across an ordered sequence of units
pub struct AutoAdvanceController {
    synchronizer: Arc<PlaybackSynchronizer>,
    units: Vec<NarrationRequest>,
    config: AutoAdvanceConfig,
    state: Mutex<ReaderState>,
    event_tx: broadcast::Sender<ReaderEvent>,
    cancel_token: CancellationToken,
}

impl AutoAdvanceController {
    /// Create a controller positioned on the first unit
    ///
    /// # Arguments
    /// * `synchronizer` - Synchronizer whose sessions this controller starts
    /// * `units` - The story's units in reading order
    /// * `config` - Settle delays
    /// * `cancel_token` - Optional external cancellation token for graceful shutdown
    #[must_use]
    pub fn new(
        synchronizer: Arc<PlaybackSynchronizer>,
        units: Vec<NarrationRequest>,
        config: AutoAdvanceConfig,
        cancel_token: Option<CancellationToken>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            synchronizer,
            units,
            config,
            state: Mutex::new(ReaderState {
                index: 0,
                auto_follow: false,
                active_session: None,
                pending_advance: None,
            }),
            event_tx,
            cancel_token: cancel_token.unwrap_or_default(),
        })
    }

    /// Start listening for session outcomes in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        // Subscribe before spawning so no session outcome is missed
        let rx = self.synchronizer.subscribe();
        tokio::spawn(async move {
            self.run(rx).await;
        })
    }

    async fn run(self: Arc<Self>, mut rx: broadcast::Receiver<NarrationEvent>) {
        info!(target: LOG_TARGET, "Auto-advance controller started ({} units)", self.units.len());

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Auto-advance controller shutting down");
                    self.state.lock().await.cancel_pending();
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Ok(NarrationEvent::StateChanged { session, state }) if state.is_terminal() => {
                            self.on_session_end(session, state).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: LOG_TARGET, "Missed {} narration events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn on_session_end(self: &Arc<Self>, session: SessionId, outcome: SessionState) {
        let mut state = self.state.lock().await;
        if state.active_session != Some(session) {
            return;
        }
        state.active_session = None;

        let delay = match outcome {
            SessionState::Completed => self.config.settle_delay(),
            SessionState::Failed => {
                warn!(
                    target: LOG_TARGET,
                    "Narration of unit {} failed; nothing will play for it", state.index
                );
                self.config.failure_settle_delay()
            }
            // Cancellation is always user- or supersede-driven
            _ => return,
        };

        if !state.auto_follow {
            debug!(target: LOG_TARGET, "Auto-follow off, waiting on the reader after unit {}", state.index);
            return;
        }
        if state.index + 1 >= self.units.len() {
            info!(target: LOG_TARGET, "Reached the end of the story");
            self.emit(ReaderEvent::EndOfContent);
            return;
        }

        let from = state.index;
        let token = self.cancel_token.child_token();
        state.cancel_pending();
        state.pending_advance = Some(token.clone());
        drop(state);

        debug!(target: LOG_TARGET, "Advancing from unit {} in {:?}", from, delay);
        self.emit(ReaderEvent::AdvanceScheduled { from, delay });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => this.advance_from(from, &token).await,
            }
        });
    }

    async fn advance_from(&self, from: usize, token: &CancellationToken) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() || state.index != from {
            return;
        }
        state.pending_advance = None;
        state.index = from + 1;
        self.emit_shown(state.index);
        self.start_session(&mut state).await;
    }

    /// Narrate the current unit. Called with the state lock held so the
    /// session id is recorded before any of its events are handled.
    async fn start_session(&self, state: &mut ReaderState) {
        let Some(request) = self.units.get(state.index).cloned() else {
            return;
        };
        let id = self.synchronizer.play(request).await;
        state.active_session = Some(id);

        if let Some(next) = self.units.get(state.index + 1) {
            self.synchronizer.pipeline().prefetch(next.clone()).await;
        }
    }

    /// Explicit play: enables auto-follow and narrates the current unit
    pub async fn play(&self) {
        let mut state = self.state.lock().await;
        state.cancel_pending();
        if !state.auto_follow {
            info!(target: LOG_TARGET, "Auto-follow enabled");
        }
        state.auto_follow = true;
        self.start_session(&mut state).await;
    }

    /// Passive start (e.g. on opening a page); does not enable auto-follow
    pub async fn auto_start(&self) {
        let mut state = self.state.lock().await;
        state.cancel_pending();
        self.start_session(&mut state).await;
    }

    /// Stop narration and any scheduled advance
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.cancel_pending();
        state.active_session = None;
        self.synchronizer.stop().await;
    }

    /// Show unit `index`, narrating it if auto-follow is already on.
    ///
    /// Returns false for an out-of-range index.
    pub async fn navigate_to(&self, index: usize) -> bool {
        if index >= self.units.len() {
            return false;
        }
        let mut state = self.state.lock().await;
        state.cancel_pending();
        state.active_session = None;
        self.synchronizer.stop().await;

        state.index = index;
        self.emit_shown(index);
        if state.auto_follow {
            self.start_session(&mut state).await;
        }
        true
    }

    /// Returns false when already on the last unit
    pub async fn next(&self) -> bool {
        let index = self.current_index().await;
        self.navigate_to(index + 1).await
    }

    /// Returns false when already on the first unit
    pub async fn previous(&self) -> bool {
        match self.current_index().await.checked_sub(1) {
            Some(index) => self.navigate_to(index).await,
            None => false,
        }
    }

    /// Back to the first unit and narrate from there with auto-follow on
    pub async fn restart(&self) {
        let mut state = self.state.lock().await;
        state.cancel_pending();
        state.active_session = None;
        state.auto_follow = true;
        state.index = 0;
        self.emit_shown(0);
        self.start_session(&mut state).await;
    }

    pub async fn set_auto_follow(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if !enabled {
            state.cancel_pending();
        }
        state.auto_follow = enabled;
        info!(target: LOG_TARGET, "Auto-follow {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn current_index(&self) -> usize {
        self.state.lock().await.index
    }

    pub async fn is_auto_follow(&self) -> bool {
        self.state.lock().await.auto_follow
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    #[must_use]
    pub fn unit(&self, index: usize) -> Option<&NarrationRequest> {
        self.units.get(index)
    }

    #[must_use]
    pub const fn synchronizer(&self) -> &Arc<PlaybackSynchronizer> {
        &self.synchronizer
    }

    /// Subscribe to reader events
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn emit_shown(&self, index: usize) {
        self.emit(ReaderEvent::UnitShown {
            index,
            total: self.units.len(),
        });
    }

    fn emit(&self, event: ReaderEvent) {
        let _ = self.event_tx.send(event);
    }
}
