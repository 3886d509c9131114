use crate::error::CoreError;
use crate::timing::CharacterAlignment;
use crate::unit::NarrationRequest;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

/// Audio plus character alignment, as returned by an aligned speech request
#[derive(Debug, Clone, Deserialize)]
pub struct AlignedSpeech {
    /// Base64-encoded audio
    pub audio_base64: String,
    /// Absent when the source could not align the text
    #[serde(default)]
    pub alignment: Option<CharacterAlignment>,
}

/// Trait for remote speech sources
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Request audio with per-character alignment
    async fn synthesize_with_alignment(
        &self,
        request: &NarrationRequest,
    ) -> Result<AlignedSpeech, CoreError>;

    /// Request audio only
    async fn synthesize(&self, request: &NarrationRequest) -> Result<Bytes, CoreError>;
}
