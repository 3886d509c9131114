use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please review it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Acquisition errors
    #[error("Speech request timed out after {timeout_ms}ms")]
    AcquisitionTimeout { timeout_ms: u64 },

    #[error("Speech provider {provider} rejected the request (status {status}): {message}")]
    AcquisitionRejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Malformed alignment: {reason}")]
    MalformedAlignment { reason: String },

    #[error("No remote speech source is configured")]
    RemoteUnavailable,

    #[error("Local speech synthesis unavailable: {reason}")]
    LocalSynthesisUnavailable { reason: String },

    #[error("Speech provider {provider} returned no audio")]
    EmptyAudio { provider: String },

    #[error("Nothing to narrate")]
    EmptyUnit,

    #[error("Acquisition cancelled")]
    Cancelled,

    #[error("Failed to decode audio payload: {0}")]
    AudioDecode(#[from] base64::DecodeError),

    // Playback errors
    #[error("Playback failed to start: {reason}")]
    PlaybackStartFailure { reason: String },

    // Network errors
    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    // Content errors
    #[error("Invalid story file {path}: {reason}")]
    StoryInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this error means the session was superseded rather than failed
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
