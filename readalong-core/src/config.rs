use crate::error::{CoreError, Result};
use crate::highlight::HighlightWindows;
use crate::output::SpeechParams;
use crate::timing::EstimateParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides `speech.api_key`
pub const API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadalongConfig {
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub highlight: HighlightConfig,
    #[serde(default)]
    pub auto_advance: AutoAdvanceConfig,
    #[serde(default)]
    pub local_speech: LocalSpeechConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote speech source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Without a key the remote tiers are skipped
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub voice_settings: VoiceSettings,
}

fn default_voice_id() -> String {
    "2OEeJcYw2f3bWMzzjVMU".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

const fn default_request_timeout() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    1
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            voice_settings: VoiceSettings::default(),
        }
    }
}

impl SpeechConfig {
    /// API key from the environment, falling back to the config file.
    /// Blank keys count as missing.
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| self.api_key.clone())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Voice tuning sent with every remote request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_style")]
    pub style: f32,
    #[serde(default)]
    pub use_speaker_boost: bool,
}

const fn default_stability() -> f32 {
    0.5
}

const fn default_similarity_boost() -> f32 {
    0.8
}

const fn default_style() -> f32 {
    0.3
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: default_style(),
            use_speaker_boost: false,
        }
    }
}

/// Acquisition and playback tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationConfig {
    #[serde(default = "default_aligned_timeout")]
    pub aligned_timeout_ms: u64,
    #[serde(default = "default_plain_audio_timeout")]
    pub plain_audio_timeout_ms: u64,
    #[serde(default = "default_plain_audio_wps")]
    pub plain_audio_words_per_second: f64,
    #[serde(default = "default_local_wps")]
    pub local_words_per_second: f64,
    #[serde(default = "default_playback_rate")]
    pub audio_playback_rate: f32,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_leading_delay")]
    pub leading_delay_secs: f64,
    #[serde(default = "default_word_gap")]
    pub word_gap_secs: f64,
}

const fn default_aligned_timeout() -> u64 {
    3000
}

const fn default_plain_audio_timeout() -> u64 {
    10_000
}

const fn default_plain_audio_wps() -> f64 {
    2.5
}

const fn default_local_wps() -> f64 {
    3.0
}

const fn default_playback_rate() -> f32 {
    0.95
}

const fn default_tick_interval() -> u64 {
    50
}

const fn default_leading_delay() -> f64 {
    EstimateParams::DEFAULT_LEADING_DELAY
}

const fn default_word_gap() -> f64 {
    EstimateParams::DEFAULT_WORD_GAP
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            aligned_timeout_ms: default_aligned_timeout(),
            plain_audio_timeout_ms: default_plain_audio_timeout(),
            plain_audio_words_per_second: default_plain_audio_wps(),
            local_words_per_second: default_local_wps(),
            audio_playback_rate: default_playback_rate(),
            tick_interval_ms: default_tick_interval(),
            leading_delay_secs: default_leading_delay(),
            word_gap_secs: default_word_gap(),
        }
    }
}

impl NarrationConfig {
    #[must_use]
    pub const fn aligned_timeout(&self) -> Duration {
        Duration::from_millis(self.aligned_timeout_ms)
    }

    #[must_use]
    pub const fn plain_audio_timeout(&self) -> Duration {
        Duration::from_millis(self.plain_audio_timeout_ms)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Estimation parameters for remote audio without alignment
    #[must_use]
    pub const fn plain_audio_estimate(&self) -> EstimateParams {
        EstimateParams {
            words_per_second: self.plain_audio_words_per_second,
            leading_delay: self.leading_delay_secs,
            word_gap: self.word_gap_secs,
        }
    }

    /// Estimation parameters for local speech
    #[must_use]
    pub const fn local_estimate(&self) -> EstimateParams {
        EstimateParams {
            words_per_second: self.local_words_per_second,
            leading_delay: self.leading_delay_secs,
            word_gap: self.word_gap_secs,
        }
    }
}

/// Tolerances of the highlight matcher, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightConfig {
    #[serde(default = "default_lead")]
    pub lead_secs: f64,
    #[serde(default = "default_trail")]
    pub trail_secs: f64,
    #[serde(default = "default_lookahead")]
    pub lookahead_secs: f64,
    #[serde(default = "default_lookbehind")]
    pub lookbehind_secs: f64,
    #[serde(default = "default_max_midpoint_distance")]
    pub max_midpoint_distance_secs: f64,
}

const fn default_lead() -> f64 {
    0.15
}

const fn default_trail() -> f64 {
    0.25
}

const fn default_lookahead() -> f64 {
    0.3
}

const fn default_lookbehind() -> f64 {
    0.2
}

const fn default_max_midpoint_distance() -> f64 {
    1.0
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            lead_secs: default_lead(),
            trail_secs: default_trail(),
            lookahead_secs: default_lookahead(),
            lookbehind_secs: default_lookbehind(),
            max_midpoint_distance_secs: default_max_midpoint_distance(),
        }
    }
}

impl HighlightConfig {
    #[must_use]
    pub const fn windows(&self) -> HighlightWindows {
        HighlightWindows {
            lead: self.lead_secs,
            trail: self.trail_secs,
            lookahead: self.lookahead_secs,
            lookbehind: self.lookbehind_secs,
            max_midpoint_distance: self.max_midpoint_distance_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAdvanceConfig {
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_failure_settle_delay")]
    pub failure_settle_delay_ms: u64,
}

const fn default_settle_delay() -> u64 {
    1500
}

const fn default_failure_settle_delay() -> u64 {
    2000
}

impl Default for AutoAdvanceConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            failure_settle_delay_ms: default_failure_settle_delay(),
        }
    }
}

impl AutoAdvanceConfig {
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub const fn failure_settle_delay(&self) -> Duration {
        Duration::from_millis(self.failure_settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSpeechConfig {
    #[serde(default = "default_speech_rate")]
    pub rate: f32,
    #[serde(default = "default_unity")]
    pub pitch: f32,
    #[serde(default = "default_unity")]
    pub volume: f32,
}

const fn default_speech_rate() -> f32 {
    0.9
}

const fn default_unity() -> f32 {
    1.0
}

impl Default for LocalSpeechConfig {
    fn default() -> Self {
        Self {
            rate: default_speech_rate(),
            pitch: default_unity(),
            volume: default_unity(),
        }
    }
}

impl LocalSpeechConfig {
    #[must_use]
    pub const fn params(&self) -> SpeechParams {
        SpeechParams {
            rate: self.rate,
            pitch: self.pitch,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a file in the config directory
    #[serde(default)]
    pub enabled: bool,
}

impl ReadalongConfig {
    /// Get the config file path (~/.config/readalong/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run
    ///
    /// # Errors
    ///
    /// Returns `ConfigNotFound` after writing a template on first run, or an
    /// error if the file cannot be read, parsed or validated.
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate config from TOML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigParseError` for invalid TOML or `ConfigInvalid` /
    /// `ConfigMissingField` for values that fail validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.speech.voice_id.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "speech.voice_id".to_string(),
            });
        }
        if self.speech.model_id.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "speech.model_id".to_string(),
            });
        }

        let narration = &self.narration;
        if !is_positive(narration.plain_audio_words_per_second) {
            return Err(invalid("narration.plain_audio_words_per_second must be positive"));
        }
        if !is_positive(narration.local_words_per_second) {
            return Err(invalid("narration.local_words_per_second must be positive"));
        }
        if !is_positive(f64::from(narration.audio_playback_rate)) {
            return Err(invalid("narration.audio_playback_rate must be positive"));
        }
        if narration.tick_interval_ms == 0 {
            return Err(invalid("narration.tick_interval_ms must be at least 1"));
        }
        if !is_non_negative(narration.leading_delay_secs) || !is_non_negative(narration.word_gap_secs) {
            return Err(invalid("narration delays must not be negative"));
        }

        let h = &self.highlight;
        let windows = [
            h.lead_secs,
            h.trail_secs,
            h.lookahead_secs,
            h.lookbehind_secs,
            h.max_midpoint_distance_secs,
        ];
        if !windows.into_iter().all(is_non_negative) {
            return Err(invalid("highlight windows must not be negative"));
        }

        if !is_positive(f64::from(self.local_speech.rate)) {
            return Err(invalid("local_speech.rate must be positive"));
        }

        Ok(())
    }
}

/// False for NaN
fn is_positive(value: f64) -> bool {
    value > 0.0
}

/// False for NaN
fn is_non_negative(value: f64) -> bool {
    value >= 0.0
}

fn invalid(message: &str) -> CoreError {
    CoreError::ConfigInvalid {
        message: message.to_string(),
    }
}

const CONFIG_TEMPLATE: &str = r#"# Readalong Configuration
# ~/.config/readalong/config.toml

[speech]
# ElevenLabs API key. Leave empty to narrate with the system voice only.
# The ELEVENLABS_API_KEY environment variable takes precedence.
api_key = ""
voice_id = "2OEeJcYw2f3bWMzzjVMU"
model_id = "eleven_multilingual_v2"
base_url = "https://api.elevenlabs.io"
request_timeout_secs = 10
max_retries = 1

[speech.voice_settings]
stability = 0.5
similarity_boost = 0.8
style = 0.3
use_speaker_boost = false

[narration]
# How long to wait for audio with word alignment before falling back
aligned_timeout_ms = 3000
plain_audio_timeout_ms = 10000
# Speaking speed assumed when word timing has to be estimated
plain_audio_words_per_second = 2.5
local_words_per_second = 3.0
audio_playback_rate = 0.95
tick_interval_ms = 50
leading_delay_secs = 0.1
word_gap_secs = 0.05

[highlight]
lead_secs = 0.15
trail_secs = 0.25
lookahead_secs = 0.3
lookbehind_secs = 0.2
max_midpoint_distance_secs = 1.0

[auto_advance]
# Pause before turning the page once narration ends
settle_delay_ms = 1500
failure_settle_delay_ms = 2000

[local_speech]
rate = 0.9
pitch = 1.0
volume = 1.0

[logging]
# Also write logs to ~/.config/readalong/readalong.log
enabled = false
"#;
