//! Resolved narration: audio plus word timings, tagged by the tier that produced it.

use crate::error::CoreError;
use crate::time::SecondsExt;
use crate::timing::{timings_end, WordTiming};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fallback level that produced a narration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTier {
    /// Remote audio with exact character alignment
    Aligned,
    /// Remote audio, estimated timings
    PlainAudio,
    /// Platform speech, estimated timings, no audio clip
    LocalSynthesis,
}

impl SourceTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aligned => "aligned",
            Self::PlainAudio => "plain_audio",
            Self::LocalSynthesis => "local_synthesis",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded audio ready to hand to an [`AudioOutput`](crate::output::AudioOutput).
///
/// Backed by [`Bytes`], so clones share the buffer and the clip can be replayed
/// any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Bytes,
    /// Expected play length, derived from the word timings
    duration_hint: Option<Duration>,
}

impl AudioClip {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            duration_hint: None,
        }
    }

    #[must_use]
    pub fn with_duration_hint(mut self, hint: Duration) -> Self {
        self.duration_hint = Some(hint);
        self
    }

    #[must_use]
    pub const fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    #[must_use]
    pub const fn duration_hint(&self) -> Option<Duration> {
        self.duration_hint
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Audio and timing for one text unit.
///
/// Immutable once built; the cache and the active session each hold a cheap clone.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationResult {
    pub tier: SourceTier,
    /// `None` for [`SourceTier::LocalSynthesis`], where speaking is the playback
    pub audio: Option<AudioClip>,
    pub timings: Arc<[WordTiming]>,
}

impl NarrationResult {
    /// Remote audio result; the clip gets a duration hint from the timings
    #[must_use]
    pub fn remote(tier: SourceTier, audio: AudioClip, timings: Vec<WordTiming>) -> Self {
        let end = timings_end(&timings);
        let audio = if end > 0.0 {
            audio.with_duration_hint(end.to_duration())
        } else {
            audio
        };
        Self {
            tier,
            audio: Some(audio),
            timings: timings.into(),
        }
    }

    #[must_use]
    pub fn local(timings: Vec<WordTiming>) -> Self {
        Self {
            tier: SourceTier::LocalSynthesis,
            audio: None,
            timings: timings.into(),
        }
    }

    /// Whether this result may be stored in the narration cache
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.tier != SourceTier::LocalSynthesis && self.audio.is_some()
    }
}

/// Outcome of running the acquisition fallback chain
#[derive(Debug)]
pub enum Acquisition {
    Aligned(NarrationResult),
    PlainAudio(NarrationResult),
    LocalSynthesis(NarrationResult),
    Failed(CoreError),
}

impl Acquisition {
    /// Wrap a result under the variant matching its tier
    #[must_use]
    pub fn from_result(result: NarrationResult) -> Self {
        match result.tier {
            SourceTier::Aligned => Self::Aligned(result),
            SourceTier::PlainAudio => Self::PlainAudio(result),
            SourceTier::LocalSynthesis => Self::LocalSynthesis(result),
        }
    }

    #[must_use]
    pub const fn tier(&self) -> Option<SourceTier> {
        match self {
            Self::Aligned(_) => Some(SourceTier::Aligned),
            Self::PlainAudio(_) => Some(SourceTier::PlainAudio),
            Self::LocalSynthesis(_) => Some(SourceTier::LocalSynthesis),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn result(&self) -> Option<&NarrationResult> {
        match self {
            Self::Aligned(r) | Self::PlainAudio(r) | Self::LocalSynthesis(r) => Some(r),
            Self::Failed(_) => None,
        }
    }

    /// Convert into a plain `Result`
    ///
    /// # Errors
    ///
    /// Returns the terminal error if every tier failed.
    pub fn into_result(self) -> Result<NarrationResult, CoreError> {
        match self {
            Self::Aligned(r) | Self::PlainAudio(r) | Self::LocalSynthesis(r) => Ok(r),
            Self::Failed(e) => Err(e),
        }
    }
}
