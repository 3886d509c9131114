use async_trait::async_trait;
use bytes::Bytes;
use readalong_core::{AlignedSpeech, CoreError, NarrationRequest, SpeechConfig, SpeechProvider, VoiceSettings};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const LOG_TARGET: &str = "readalong::elevenlabs";

const PROVIDER_NAME: &str = "elevenlabs";
const API_KEY_HEADER: &str = "xi-api-key";

/// Streaming tuning for the plain audio endpoint
const STREAM_LATENCY: &str = "4";
const STREAM_FORMAT: &str = "mp3_44100_128";

/// Error bodies are cut to this many characters in log lines and errors
const MAX_ERROR_CHARS: usize = 200;

/// ElevenLabs text-to-speech source
pub struct ElevenLabsProvider {
    client: ClientWithMiddleware,
    base_url: Url,
    voice_settings: VoiceSettings,
}

/// JSON body shared by both endpoints
#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

impl ElevenLabsProvider {
    /// Create a provider from speech settings and an API key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the base URL or key is unusable, or an error
    /// if the HTTP client cannot be created.
    pub fn new(config: &SpeechConfig, api_key: &str) -> Result<Self, CoreError> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut key = HeaderValue::from_str(api_key.trim()).map_err(|_| CoreError::ConfigInvalid {
            message: "speech.api_key contains characters not allowed in a header".to_string(),
        })?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        // Base client with timeout
        let base_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .default_headers(headers)
            .user_agent("Readalong/0.1")
            .build()?;

        // Wrap with retry middleware (exponential backoff)
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url,
            voice_settings: config.voice_settings,
        })
    }

    /// Build a provider only when an API key is available.
    ///
    /// Returns `Ok(None)` without a key so the caller narrates with local speech.
    ///
    /// # Errors
    ///
    /// See [`ElevenLabsProvider::new`].
    pub fn from_config(config: &SpeechConfig) -> Result<Option<Self>, CoreError> {
        match config.resolved_api_key() {
            Some(key) => Self::new(config, &key).map(Some),
            None => {
                info!(target: LOG_TARGET, "No ElevenLabs API key configured, remote narration disabled");
                Ok(None)
            }
        }
    }

    fn endpoint(&self, voice_id: &str, suffix: &str) -> Result<Url, CoreError> {
        let path = format!("v1/text-to-speech/{}{}", urlencoding::encode(voice_id), suffix);
        self.base_url.join(&path).map_err(|e| CoreError::ConfigInvalid {
            message: format!("cannot build speech URL: {e}"),
        })
    }

    fn aligned_url(&self, voice_id: &str) -> Result<Url, CoreError> {
        self.endpoint(voice_id, "/with-timestamps")
    }

    fn stream_url(&self, voice_id: &str) -> Result<Url, CoreError> {
        let mut url = self.endpoint(voice_id, "/stream")?;
        url.query_pairs_mut()
            .append_pair("optimize_streaming_latency", STREAM_LATENCY)
            .append_pair("output_format", STREAM_FORMAT);
        Ok(url)
    }

    fn body<'a>(&'a self, request: &'a NarrationRequest) -> SpeechBody<'a> {
        SpeechBody {
            text: request.unit.text(),
            model_id: &request.model_id,
            voice_settings: &self.voice_settings,
        }
    }

    /// Turn a non-success response into `AcquisitionRejected`
    async fn reject(response: reqwest::Response) -> CoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        warn!(target: LOG_TARGET, "ElevenLabs returned status {}: {}", status, message);
        CoreError::AcquisitionRejected {
            provider: PROVIDER_NAME.to_string(),
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn synthesize_with_alignment(&self, request: &NarrationRequest) -> Result<AlignedSpeech, CoreError> {
        let url = self.aligned_url(&request.voice_id)?;
        debug!(target: LOG_TARGET, "POST {} for {:?}", url, request.preview());

        let response = self.client.post(url).json(&self.body(request)).send().await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let speech: AlignedSpeech = response.json().await?;
        debug!(
            target: LOG_TARGET,
            "Aligned speech: {} base64 chars, {} aligned characters",
            speech.audio_base64.len(),
            speech.alignment.as_ref().map_or(0, |a| a.characters.len())
        );
        Ok(speech)
    }

    async fn synthesize(&self, request: &NarrationRequest) -> Result<Bytes, CoreError> {
        let url = self.stream_url(&request.voice_id)?;
        debug!(target: LOG_TARGET, "POST {} for {:?}", url, request.preview());

        let response = self
            .client
            .post(url)
            .header(ACCEPT, "audio/mpeg")
            .json(&self.body(request))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let audio = response.bytes().await?;
        debug!(target: LOG_TARGET, "Plain speech: {} bytes", audio.len());
        Ok(audio)
    }
}

/// Parse the configured base URL; a trailing slash keeps `join` from dropping path segments
fn parse_base_url(raw: &str) -> Result<Url, CoreError> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized).map_err(|e| CoreError::ConfigInvalid {
        message: format!("speech.base_url {raw:?} is not a valid URL: {e}"),
    })
}

/// Best human-readable message from an error body.
///
/// ElevenLabs wraps errors as `{"detail": {"message": ...}}` or `{"detail": "..."}`.
fn error_message(body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/detail/message")
            .or_else(|| value.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let message = detail.unwrap_or_else(|| body.trim().to_string());
    if message.chars().count() > MAX_ERROR_CHARS {
        message.chars().take(MAX_ERROR_CHARS).collect()
    } else {
        message
    }
}
