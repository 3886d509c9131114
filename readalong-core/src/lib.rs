pub mod advance;
pub mod cache;
pub mod config;
pub mod error;
pub mod highlight;
pub mod narration;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod playback;
pub mod provider;
pub mod sync;
pub mod time;
pub mod timing;
pub mod unit;

#[cfg(test)]
mod testing;

pub use advance::{AutoAdvanceController, ReaderEvent};
pub use cache::NarrationCache;
pub use config::{
    AutoAdvanceConfig, HighlightConfig, LocalSpeechConfig, LoggingConfig, NarrationConfig,
    ReadalongConfig, SpeechConfig, VoiceSettings, API_KEY_ENV,
};
pub use error::{CoreError, Result};
pub use highlight::{resolve_highlight, HighlightTracker, HighlightWindows};
pub use narration::{Acquisition, AudioClip, NarrationResult, SourceTier};
pub use output::{AudioOutput, LocalSpeech, OutputEvent, OutputEvents, Playback, SpeechParams};
pub use paths::{config_dir, config_path, log_file_path, CONFIG_DIR_NAME, CONFIG_FILE_NAME, LOG_FILE_NAME};
pub use pipeline::AcquisitionPipeline;
pub use playback::{PlaybackSession, SessionId, SessionState};
pub use provider::{AlignedSpeech, SpeechProvider};
pub use sync::{NarrationEvent, PlaybackSynchronizer};
pub use time::{DurationExt, SecondsExt};
pub use timing::{
    estimate_word_timings, extract_word_timings, CharacterAlignment, EstimateParams, WordTiming,
};
pub use unit::{NarrationRequest, TextUnit};
