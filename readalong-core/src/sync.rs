//! The playback synchronizer: owns the single live narration session.
//!
//! A play request tears down the previous session, acquires narration for the
//! new unit, starts audio (or local speech) and maps position ticks to the
//! highlighted word. Every step after a suspension point re-checks that its
//! session is still the current one before touching shared state.

use crate::cache::NarrationCache;
use crate::config::ReadalongConfig;
use crate::error::Result;
use crate::highlight::{HighlightTracker, HighlightWindows};
use crate::narration::{NarrationResult, SourceTier};
use crate::output::{AudioOutput, LocalSpeech, OutputEvent, OutputEvents, Playback, SpeechParams};
use crate::pipeline::{until_cancelled, AcquisitionPipeline};
use crate::playback::{PlaybackSession, SessionId, SessionState};
use crate::provider::SpeechProvider;
use crate::timing::WordTiming;
use crate::unit::NarrationRequest;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LOG_TARGET: &str = "readalong::sync";

/// Events emitted by the synchronizer
#[derive(Debug, Clone)]
pub enum NarrationEvent {
    /// A session moved to a new state
    StateChanged {
        session: SessionId,
        state: SessionState,
    },
    /// Narration was resolved and playback is about to be reported as started
    TimingsReady {
        session: SessionId,
        tier: SourceTier,
        timings: Arc<[WordTiming]>,
    },
    /// The highlighted word changed; `None` clears the highlight
    HighlightChanged {
        session: SessionId,
        index: Option<usize>,
    },
}

/// Where highlight positions come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clock {
    /// The output reports `Position` events
    Reported,
    /// Wall-clock time since speech started
    WallClock,
}

struct Active {
    session: PlaybackSession,
    token: CancellationToken,
    playback: Option<Box<dyn Playback>>,
}

/// Owns exactly one live narration session at a time
pub struct PlaybackSynchronizer {
    pipeline: Arc<AcquisitionPipeline>,
    audio: Arc<dyn AudioOutput>,
    windows: HighlightWindows,
    speech_params: SpeechParams,
    active: Mutex<Active>,
    event_tx: broadcast::Sender<NarrationEvent>,
}

impl PlaybackSynchronizer {
    #[must_use]
    pub fn new(
        pipeline: Arc<AcquisitionPipeline>,
        audio: Arc<dyn AudioOutput>,
        windows: HighlightWindows,
        speech_params: SpeechParams,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            pipeline,
            audio,
            windows,
            speech_params,
            active: Mutex::new(Active {
                session: PlaybackSession::default(),
                token: CancellationToken::new(),
                playback: None,
            }),
            event_tx,
        })
    }

    /// Wire up a synchronizer with a fresh cache from loaded configuration
    #[must_use]
    pub fn from_config(
        config: &ReadalongConfig,
        remote: Option<Arc<dyn SpeechProvider>>,
        audio: Arc<dyn AudioOutput>,
        speech: Arc<dyn LocalSpeech>,
    ) -> Arc<Self> {
        let pipeline = AcquisitionPipeline::new(remote, speech, NarrationCache::new(), config.narration.clone());
        Self::new(
            Arc::new(pipeline),
            audio,
            config.highlight.windows(),
            config.local_speech.params(),
        )
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<NarrationEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Arc<AcquisitionPipeline> {
        &self.pipeline
    }

    /// Start narrating `request`, superseding whatever is live.
    ///
    /// The previous session is torn down before this returns; the new one is
    /// in `Acquiring` and continues on a background task.
    pub async fn play(self: &Arc<Self>, request: NarrationRequest) -> SessionId {
        let mut active = self.active.lock().await;
        self.teardown(&mut active);

        let id = active.session.id.next();
        let token = CancellationToken::new();
        active.session = PlaybackSession::acquiring(id, request.unit.clone());
        active.token = token.clone();
        self.emit_state(id, SessionState::Acquiring);
        drop(active);

        info!(target: LOG_TARGET, "Session {} narrating {:?}", id, request.preview());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_session(id, request, token).await;
        });
        id
    }

    /// Cancel the live session, if any. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.teardown(&mut active);
    }

    /// Snapshot of the current (or most recent) session
    pub async fn snapshot(&self) -> PlaybackSession {
        self.active.lock().await.session.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.active.lock().await.session.state
    }

    pub async fn highlight(&self) -> Option<usize> {
        self.active.lock().await.session.highlight
    }

    /// Stop output, cancel in-flight work and clear the highlight
    fn teardown(&self, active: &mut Active) {
        active.token.cancel();
        if let Some(playback) = active.playback.take() {
            playback.stop();
        }

        let id = active.session.id;
        if active.session.is_live() {
            debug!(target: LOG_TARGET, "Cancelling session {} ({})", id, active.session.state);
            active.session.state = SessionState::Cancelled;
            active.session.cancellation_requested = true;
            self.emit_state(id, SessionState::Cancelled);
        }
        if active.session.highlight.take().is_some() {
            self.emit(NarrationEvent::HighlightChanged { session: id, index: None });
        }
    }

    async fn run_session(self: Arc<Self>, id: SessionId, request: NarrationRequest, token: CancellationToken) {
        let acquisition = self.pipeline.acquire(&request, &token).await;
        if token.is_cancelled() {
            debug!(target: LOG_TARGET, "Session {} superseded during acquisition", id);
            return;
        }

        let result = match acquisition.into_result() {
            Ok(result) => result,
            Err(e) => {
                error!(target: LOG_TARGET, "Narration failed for session {}: {}", id, e);
                self.finish(id, SessionState::Failed).await;
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let started = match self.start_output(&request, result, tx, &token).await {
            Ok(started) => started,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!(target: LOG_TARGET, "Playback could not start for session {}: {}", id, e);
                self.finish(id, SessionState::Failed).await;
                return;
            }
        };
        let (playback, tier, timings, clock) = started;

        let Some(started_at) = self.attach(id, playback, tier, Arc::clone(&timings)).await else {
            return;
        };
        self.drive(id, &token, timings, rx, clock, started_at).await;
    }

    /// Start audio for remote results, speech for local ones.
    ///
    /// Remote audio that fails to start falls back to local speech.
    async fn start_output(
        &self,
        request: &NarrationRequest,
        result: NarrationResult,
        events: OutputEvents,
        token: &CancellationToken,
    ) -> Result<(Box<dyn Playback>, SourceTier, Arc<[WordTiming]>, Clock)> {
        if let Some(clip) = &result.audio {
            let rate = self.pipeline.config().audio_playback_rate;
            match until_cancelled(token, self.audio.play(clip, rate, events.clone())).await {
                Ok(playback) => return Ok((playback, result.tier, result.timings, Clock::Reported)),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        "Audio failed to start ({}), falling back to local speech", e
                    );
                }
            }
        }

        let local = match result.tier {
            SourceTier::LocalSynthesis => result,
            _ => self.pipeline.local_narration(request)?,
        };
        let speech = self.pipeline.local_speech();
        let playback = until_cancelled(
            token,
            speech.speak(request.unit.text(), &self.speech_params, events),
        )
        .await?;
        Ok((playback, local.tier, local.timings, Clock::WallClock))
    }

    /// Hand a started playback to the session and return its recorded start.
    ///
    /// Stops the playback and returns `None` if the session is gone.
    async fn attach(
        &self,
        id: SessionId,
        playback: Box<dyn Playback>,
        tier: SourceTier,
        timings: Arc<[WordTiming]>,
    ) -> Option<Instant> {
        let mut active = self.active.lock().await;
        if active.session.id != id || active.token.is_cancelled() || !active.session.is_live() {
            debug!(target: LOG_TARGET, "Session {} is stale, stopping late playback", id);
            playback.stop();
            return None;
        }

        let started_at = Instant::now();
        active.playback = Some(playback);
        active.session.state = SessionState::Playing;
        active.session.started_at = Some(started_at);
        self.emit(NarrationEvent::TimingsReady {
            session: id,
            tier,
            timings,
        });
        self.emit_state(id, SessionState::Playing);
        info!(target: LOG_TARGET, "Session {} playing ({})", id, tier);
        Some(started_at)
    }

    async fn drive(
        &self,
        id: SessionId,
        token: &CancellationToken,
        timings: Arc<[WordTiming]>,
        mut events: mpsc::UnboundedReceiver<OutputEvent>,
        clock: Clock,
        started_at: Instant,
    ) {
        let mut tracker = HighlightTracker::new(timings, self.windows);
        let mut ticker = (clock == Clock::WallClock).then(|| {
            let mut interval = tokio::time::interval(self.pipeline.config().tick_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let outcome = loop {
            tokio::select! {
                () = token.cancelled() => return,
                event = events.recv() => match event {
                    Some(OutputEvent::Position(position)) => {
                        self.update_highlight(id, &mut tracker, position).await;
                    }
                    Some(OutputEvent::Ended) => break SessionState::Completed,
                    Some(OutputEvent::Error(message)) => {
                        warn!(target: LOG_TARGET, "Output error in session {}: {}", id, message);
                        break SessionState::Failed;
                    }
                    None => {
                        warn!(target: LOG_TARGET, "Output for session {} closed without ending", id);
                        break SessionState::Failed;
                    }
                },
                () = tick(&mut ticker) => {
                    let position = started_at.elapsed().as_secs_f64();
                    self.update_highlight(id, &mut tracker, position).await;
                }
            }
        };

        self.finish(id, outcome).await;
    }

    async fn update_highlight(&self, id: SessionId, tracker: &mut HighlightTracker, position: f64) {
        let Some(index) = tracker.update(position) else {
            return;
        };
        let mut active = self.active.lock().await;
        if active.session.id != id || active.session.state != SessionState::Playing {
            return;
        }
        active.session.highlight = Some(index);
        self.emit(NarrationEvent::HighlightChanged {
            session: id,
            index: Some(index),
        });
    }

    /// Move a live session to a terminal state
    async fn finish(&self, id: SessionId, state: SessionState) {
        let mut active = self.active.lock().await;
        if active.session.id != id || !active.session.is_live() {
            return;
        }

        if let Some(playback) = active.playback.take() {
            if state != SessionState::Completed {
                playback.stop();
            }
        }
        if active.session.highlight.take().is_some() {
            self.emit(NarrationEvent::HighlightChanged { session: id, index: None });
        }
        active.session.state = state;
        self.emit_state(id, state);
        info!(target: LOG_TARGET, "Session {} {}", id, state);
    }

    fn emit_state(&self, session: SessionId, state: SessionState) {
        self.emit(NarrationEvent::StateChanged { session, state });
    }

    fn emit(&self, event: NarrationEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NarrationConfig;
    use crate::testing::{FakeAudioOutput, FakeLocalSpeech, FakeProvider, Script};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    struct Harness {
        sync: Arc<PlaybackSynchronizer>,
        remote: Arc<FakeProvider>,
        audio: Arc<FakeAudioOutput>,
        speech: Arc<FakeLocalSpeech>,
        events: broadcast::Receiver<NarrationEvent>,
    }

    fn harness(remote: Arc<FakeProvider>, audio: Arc<FakeAudioOutput>, speech: Arc<FakeLocalSpeech>) -> Harness {
        let pipeline = AcquisitionPipeline::new(
            Some(remote.clone() as Arc<dyn SpeechProvider>),
            speech.clone(),
            NarrationCache::new(),
            NarrationConfig::default(),
        );
        let sync = PlaybackSynchronizer::new(
            Arc::new(pipeline),
            audio.clone(),
            HighlightWindows::default(),
            SpeechParams::default(),
        );
        let events = sync.subscribe();
        Harness {
            sync,
            remote,
            audio,
            speech,
            events,
        }
    }

    fn default_harness() -> Harness {
        harness(
            FakeProvider::new(Script::Succeed, Script::Succeed),
            FakeAudioOutput::new(),
            FakeLocalSpeech::available(),
        )
    }

    fn request(text: &str) -> NarrationRequest {
        NarrationRequest::new(text, "voice", "model")
    }

    async fn wait_for_state(events: &mut broadcast::Receiver<NarrationEvent>, id: SessionId, wanted: SessionState) {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                if let NarrationEvent::StateChanged { session, state } = events.recv().await.unwrap() {
                    if session == id && state == wanted {
                        return;
                    }
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session {id} never reached {wanted}"));
    }

    fn drain(events: &mut broadcast::Receiver<NarrationEvent>) -> Vec<NarrationEvent> {
        let mut seen = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => seen.push(event),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return seen,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
    }

    /// Let spawned tasks drain their queues
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_highlights_and_completes() {
        let mut h = default_harness();
        let id = h.sync.play(request("hi you")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;

        let audio = h.audio.last();
        assert_eq!(audio.label, "hi you");
        assert!((audio.rate - 0.95).abs() < f32::EPSILON);

        audio.send(OutputEvent::Position(0.05));
        settle().await;
        assert_eq!(h.sync.highlight().await, Some(0));

        audio.send(OutputEvent::Position(0.5));
        settle().await;
        assert_eq!(h.sync.highlight().await, Some(1));

        audio.send(OutputEvent::Ended);
        wait_for_state(&mut h.events, id, SessionState::Completed).await;
        assert_eq!(h.sync.highlight().await, None);
        assert!(!audio.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_highlight_change_events_are_deduplicated() {
        let mut h = default_harness();
        let id = h.sync.play(request("hi you")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;
        drain(&mut h.events);

        let audio = h.audio.last();
        for position in [0.0, 0.05, 0.1, 0.15] {
            audio.send(OutputEvent::Position(position));
        }
        settle().await;

        let changes: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, NarrationEvent::HighlightChanged { .. }))
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_supersedes_previous() {
        let mut h = default_harness();
        let first = h.sync.play(request("first page")).await;
        wait_for_state(&mut h.events, first, SessionState::Playing).await;
        let first_audio = h.audio.last();
        first_audio.send(OutputEvent::Position(0.1));
        settle().await;

        let second = h.sync.play(request("second page")).await;
        assert!(first_audio.is_stopped());
        wait_for_state(&mut h.events, second, SessionState::Playing).await;

        let live: Vec<_> = h.audio.started().into_iter().filter(|s| !s.is_stopped()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].label, "second page");

        // Late events from the old output are ignored
        first_audio.send(OutputEvent::Ended);
        settle().await;
        let snapshot = h.sync.snapshot().await;
        assert_eq!(snapshot.id, second);
        assert_eq!(snapshot.state, SessionState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_acquisition_never_plays() {
        let mut h = harness(
            FakeProvider::new(Script::Delay(Duration::from_secs(2)), Script::Succeed),
            FakeAudioOutput::new(),
            FakeLocalSpeech::available(),
        );
        let id = h.sync.play(request("slow page")).await;
        settle().await;
        h.sync.stop().await;
        assert_eq!(h.sync.state().await, SessionState::Cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.audio.started().is_empty());
        assert!(h.speech.spoken().is_empty());
        assert_eq!(h.sync.highlight().await, None);
        assert_eq!(h.remote.plain_calls(), 0);

        let states: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                NarrationEvent::StateChanged { session, state } if session == id => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, [SessionState::Acquiring, SessionState::Cancelled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut h = default_harness();
        let id = h.sync.play(request("page")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;

        h.sync.stop().await;
        h.sync.stop().await;
        assert!(h.audio.last().is_stopped());

        let cancels = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, NarrationEvent::StateChanged { state: SessionState::Cancelled, .. }))
            .count();
        assert_eq!(cancels, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_completion_is_noop() {
        let mut h = default_harness();
        let id = h.sync.play(request("page")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;
        h.audio.last().send(OutputEvent::Ended);
        wait_for_state(&mut h.events, id, SessionState::Completed).await;

        h.sync.stop().await;
        assert_eq!(h.sync.state().await, SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_error_fails_session() {
        let mut h = default_harness();
        let id = h.sync.play(request("page")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;

        h.audio.last().send(OutputEvent::Error("decoder gave up".to_string()));
        wait_for_state(&mut h.events, id, SessionState::Failed).await;
        assert!(h.audio.last().is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_start_failure_falls_back_to_local_speech() {
        let mut h = harness(
            FakeProvider::new(Script::Succeed, Script::Succeed),
            FakeAudioOutput::failing(),
            FakeLocalSpeech::available(),
        );
        let id = h.sync.play(request("Pip felt scared.")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;

        let spoken = h.speech.last();
        assert_eq!(spoken.label, "Pip felt scared.");
        assert_eq!(h.speech.last_params(), Some(SpeechParams::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_speech_drives_highlight_from_wall_clock() {
        let mut h = harness(
            FakeProvider::new(Script::Reject(500), Script::Reject(500)),
            FakeAudioOutput::new(),
            FakeLocalSpeech::available(),
        );
        let id = h.sync.play(request("one two three")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;
        assert!(h.audio.started().is_empty());

        let started_at = h.sync.snapshot().await.started_at.unwrap();

        // At 3 words/s the first word spans roughly 0.1s..0.43s of the session clock
        tokio::time::sleep_until(started_at + Duration::from_millis(200)).await;
        assert_eq!(h.sync.highlight().await, Some(0));

        tokio::time::sleep_until(started_at + Duration::from_millis(1700)).await;
        assert_eq!(h.sync.highlight().await, Some(2));

        h.speech.last().send(OutputEvent::Ended);
        wait_for_state(&mut h.events, id, SessionState::Completed).await;
        assert_eq!(h.sync.highlight().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tiers_failing_fails_session() {
        let mut h = harness(
            FakeProvider::new(Script::Reject(500), Script::Reject(500)),
            FakeAudioOutput::new(),
            FakeLocalSpeech::unavailable(),
        );
        let id = h.sync.play(request("page")).await;
        wait_for_state(&mut h.events, id, SessionState::Failed).await;
        assert_eq!(h.sync.highlight().await, None);
        assert!(h.audio.started().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timings_ready_precedes_playing() {
        let mut h = default_harness();
        let id = h.sync.play(request("hi you")).await;
        wait_for_state(&mut h.events, id, SessionState::Playing).await;

        let mut rx = h.sync.subscribe();
        let next = h.sync.play(request("hi you")).await;
        wait_for_state(&mut h.events, next, SessionState::Playing).await;

        let ready = drain(&mut rx).into_iter().find_map(|e| match e {
            NarrationEvent::TimingsReady { session, tier, timings } => Some((session, tier, timings)),
            _ => None,
        });
        let (session, tier, timings) = ready.unwrap();
        assert_eq!(session, next);
        assert_eq!(tier, SourceTier::Aligned);
        assert_eq!(timings.len(), 2);
        // Second play of the same text came from the cache
        assert_eq!(h.remote.aligned_calls(), 1);
    }
}
