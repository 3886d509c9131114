//! Audio and speech output seams.
//!
//! The engine never plays sound itself. A platform layer implements
//! [`AudioOutput`] for decoded remote audio and [`LocalSpeech`] for the
//! built-in speech capability. Both report progress back on an
//! [`OutputEvents`] channel that belongs to the session which started them.

use crate::error::Result;
use crate::narration::AudioClip;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Progress report from an output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Current playback position in seconds (audio time-update)
    Position(f64),
    /// Natural end of playback
    Ended,
    /// Playback broke off
    Error(String),
}

/// Sender half handed to an output for one playback
pub type OutputEvents = mpsc::UnboundedSender<OutputEvent>;

/// A single started playback.
///
/// `stop` must silence this playback only, immediately, and be idempotent.
/// Outputs should stop sending events once stopped.
pub trait Playback: Send + Sync {
    fn stop(&self);
}

/// Plays encoded audio clips
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Load `clip` and start playing it at `rate`.
    ///
    /// Resolves once audio is ready and actually playing. Position updates,
    /// the end of playback and playback errors are reported on `events`.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackStartFailure` if the clip cannot be loaded or started.
    async fn play(
        &self,
        clip: &AudioClip,
        rate: f32,
        events: OutputEvents,
    ) -> Result<Box<dyn Playback>>;
}

/// Voice parameters for the platform speech capability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// The platform's built-in speech synthesis
#[async_trait]
pub trait LocalSpeech: Send + Sync {
    /// Whether speech can be produced at all on this platform
    fn is_available(&self) -> bool;

    /// Start speaking `text`.
    ///
    /// Local speech reports only lifecycle events (`Ended`, `Error`); the
    /// engine keeps its own clock for highlighting.
    ///
    /// # Errors
    ///
    /// Returns `LocalSynthesisUnavailable` if speech cannot be started.
    async fn speak(
        &self,
        text: &str,
        params: &SpeechParams,
        events: OutputEvents,
    ) -> Result<Box<dyn Playback>>;
}
