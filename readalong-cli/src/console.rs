//! Console stand-ins for the platform audio and speech outputs.
//!
//! Neither plays sound. Audio clips are "played" on a timer sized from the
//! clip's duration hint (optionally saving the clip to disk); local speech is
//! timed from the same estimate the engine highlights with.

use async_trait::async_trait;
use readalong_core::{
    estimate_word_timings, AudioClip, AudioOutput, CoreError, EstimateParams, LocalSpeech,
    OutputEvent, OutputEvents, Playback, SecondsExt, SpeechParams, WordTiming,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "readalong::console";

/// Interval between position reports
const POSITION_INTERVAL: Duration = Duration::from_millis(50);

/// Bitrate assumed for clips without a duration hint (mp3, 128 kbit/s)
const ASSUMED_BYTES_PER_SEC: f64 = 16_000.0;

/// A simulated playback, stopped by cancelling its token
struct TimedPlayback {
    token: CancellationToken,
}

impl Playback for TimedPlayback {
    fn stop(&self) {
        self.token.cancel();
    }
}

/// Audio output that reports progress in real time without producing sound
pub struct ConsoleAudioOutput {
    save_dir: Option<PathBuf>,
    saved: AtomicUsize,
}

impl ConsoleAudioOutput {
    #[must_use]
    pub const fn new(save_dir: Option<PathBuf>) -> Self {
        Self {
            save_dir,
            saved: AtomicUsize::new(0),
        }
    }

    async fn save(&self, clip: &AudioClip) -> Result<(), CoreError> {
        let Some(dir) = &self.save_dir else {
            return Ok(());
        };
        let n = self.saved.fetch_add(1, Ordering::Relaxed) + 1;
        let path = dir.join(format!("narration-{n:03}.mp3"));
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, clip.bytes()).await?;
        info!(target: LOG_TARGET, "Saved {} bytes of audio to {}", clip.len(), path.display());
        Ok(())
    }
}

/// Playback length of `clip` at `rate`
fn clip_duration(clip: &AudioClip, rate: f32) -> Duration {
    let natural = clip.duration_hint().map_or_else(
        || {
            let len = u32::try_from(clip.len()).unwrap_or(u32::MAX);
            f64::from(len) / ASSUMED_BYTES_PER_SEC
        },
        |hint| hint.as_secs_f64(),
    );
    let rate = if rate > 0.0 { f64::from(rate) } else { 1.0 };
    (natural / rate).to_duration()
}

#[async_trait]
impl AudioOutput for ConsoleAudioOutput {
    async fn play(&self, clip: &AudioClip, rate: f32, events: OutputEvents) -> Result<Box<dyn Playback>, CoreError> {
        if clip.is_empty() {
            return Err(CoreError::PlaybackStartFailure {
                reason: "audio clip is empty".to_string(),
            });
        }
        if let Err(e) = self.save(clip).await {
            // Saving is a side channel; playback goes on
            warn!(target: LOG_TARGET, "Could not save audio clip: {}", e);
        }

        let duration = clip_duration(clip, rate);
        let rate = f64::from(rate);
        debug!(target: LOG_TARGET, "Playing {} byte clip for {:?}", clip.len(), duration);

        let token = CancellationToken::new();
        let stopped = token.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(POSITION_INTERVAL);
            loop {
                tokio::select! {
                    () = stopped.cancelled() => return,
                    _ = ticker.tick() => {
                        let elapsed = started.elapsed();
                        if elapsed >= duration {
                            let _ = events.send(OutputEvent::Ended);
                            return;
                        }
                        // Media time runs at the playback rate
                        if events.send(OutputEvent::Position(elapsed.as_secs_f64() * rate)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::new(TimedPlayback { token }))
    }
}

/// Local speech stand-in that "speaks" for the estimated narration length
pub struct ConsoleSpeech {
    estimate: EstimateParams,
}

impl ConsoleSpeech {
    #[must_use]
    pub const fn new(estimate: EstimateParams) -> Self {
        Self { estimate }
    }

    fn speaking_time(&self, text: &str) -> Duration {
        let timings: Vec<WordTiming> = estimate_word_timings(text, self.estimate);
        timings.last().map_or(0.0, |w| w.end).to_duration()
    }
}

#[async_trait]
impl LocalSpeech for ConsoleSpeech {
    fn is_available(&self) -> bool {
        true
    }

    async fn speak(&self, text: &str, params: &SpeechParams, events: OutputEvents) -> Result<Box<dyn Playback>, CoreError> {
        let duration = self.speaking_time(text);
        debug!(
            target: LOG_TARGET,
            "Speaking for {:?} (rate {}, pitch {}, volume {})",
            duration,
            params.rate,
            params.pitch,
            params.volume
        );

        let token = CancellationToken::new();
        let stopped = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = stopped.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    let _ = events.send(OutputEvent::Ended);
                }
            }
        });

        Ok(Box::new(TimedPlayback { token }))
    }
}
