//! Tiered narration acquisition.
//!
//! Aligned remote audio, then plain remote audio with estimated timings, then
//! platform speech with estimated timings. Intermediate tier failures are
//! logged and swallowed; only exhaustion of every tier is reported.

use crate::cache::NarrationCache;
use crate::config::NarrationConfig;
use crate::error::{CoreError, Result};
use crate::narration::{Acquisition, AudioClip, NarrationResult, SourceTier};
use crate::output::LocalSpeech;
use crate::provider::SpeechProvider;
use crate::time::DurationExt;
use crate::timing::{estimate_word_timings, extract_word_timings};
use crate::unit::NarrationRequest;
use base64::Engine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "readalong::pipeline";

/// Resolves a [`NarrationRequest`] into audio plus word timings
pub struct AcquisitionPipeline {
    remote: Option<Arc<dyn SpeechProvider>>,
    speech: Arc<dyn LocalSpeech>,
    cache: Arc<NarrationCache>,
    config: NarrationConfig,
}

impl AcquisitionPipeline {
    /// Create a pipeline.
    ///
    /// # Arguments
    /// * `remote` - Remote speech source; `None` skips straight to local speech
    /// * `speech` - Platform speech, the last tier
    /// * `cache` - Cache shared with prefetching
    /// * `config` - Timeouts and estimation rates
    pub fn new(
        remote: Option<Arc<dyn SpeechProvider>>,
        speech: Arc<dyn LocalSpeech>,
        cache: Arc<NarrationCache>,
        config: NarrationConfig,
    ) -> Self {
        Self {
            remote,
            speech,
            cache,
            config,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<NarrationCache> {
        &self.cache
    }

    #[must_use]
    pub const fn config(&self) -> &NarrationConfig {
        &self.config
    }

    #[must_use]
    pub const fn local_speech(&self) -> &Arc<dyn LocalSpeech> {
        &self.speech
    }

    #[must_use]
    pub const fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Run the fallback chain for `request`, consulting the cache first.
    ///
    /// Cancelling `token` abandons whichever tier is in flight and yields
    /// `Failed(Cancelled)`; nothing is cached for a cancelled acquisition.
    pub async fn acquire(&self, request: &NarrationRequest, token: &CancellationToken) -> Acquisition {
        if request.unit.is_blank() {
            return Acquisition::Failed(CoreError::EmptyUnit);
        }

        if let Some(cached) = self.cached(request).await {
            return Acquisition::from_result(cached);
        }

        // A prefetch already paying for this unit is cheaper to wait on than a second request
        let waited = until_cancelled(token, async { Ok(self.cache.wait_pending(request.key()).await) }).await;
        match waited {
            Ok(true) => {
                if let Some(cached) = self.cached(request).await {
                    return Acquisition::from_result(cached);
                }
            }
            Ok(false) => {}
            Err(e) => return Acquisition::Failed(e),
        }

        let acquisition = self.resolve(request, token).await;
        if let Some(result) = acquisition.result() {
            if result.is_cacheable() && !token.is_cancelled() {
                self.cache.put(request.key(), result.clone()).await;
            }
        }
        acquisition
    }

    async fn cached(&self, request: &NarrationRequest) -> Option<NarrationResult> {
        let cached = self.cache.get(request.key()).await?;
        info!(
            target: LOG_TARGET,
            "Using cached {} narration for {:?}",
            cached.tier,
            request.preview()
        );
        Some(cached)
    }

    /// Run the fallback chain without touching the cache
    pub async fn resolve(&self, request: &NarrationRequest, token: &CancellationToken) -> Acquisition {
        let remote_error = match self.resolve_remote(request, token).await {
            Ok(result) => return Acquisition::from_result(result),
            Err(e) if e.is_cancelled() => return Acquisition::Failed(e),
            Err(e) => e,
        };
        debug!(
            target: LOG_TARGET,
            "Remote tiers exhausted for {:?} ({}), trying local speech",
            request.preview(),
            remote_error
        );

        match self.local_narration(request) {
            Ok(result) => {
                info!(
                    target: LOG_TARGET,
                    "Narrating {:?} with local speech ({} estimated words)",
                    request.preview(),
                    result.timings.len()
                );
                Acquisition::from_result(result)
            }
            Err(e) => {
                warn!(
                    target: LOG_TARGET,
                    "All narration tiers failed for {:?}: {}",
                    request.preview(),
                    e
                );
                Acquisition::Failed(e)
            }
        }
    }

    /// Run only the remote tiers (aligned, then plain audio).
    ///
    /// # Errors
    ///
    /// Returns `RemoteUnavailable` without a remote source, `Cancelled` if
    /// `token` fires, or the plain-audio tier's error once both tiers failed.
    pub async fn resolve_remote(&self, request: &NarrationRequest, token: &CancellationToken) -> Result<NarrationResult> {
        let Some(remote) = self.remote.as_deref() else {
            return Err(CoreError::RemoteUnavailable);
        };

        match until_cancelled(token, self.aligned_tier(remote, request)).await {
            Ok(result) => {
                info!(
                    target: LOG_TARGET,
                    "Aligned narration from {} for {:?} ({} words)",
                    remote.name(),
                    request.preview(),
                    result.timings.len()
                );
                return Ok(result);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(
                    target: LOG_TARGET,
                    "Aligned tier failed for {:?}: {}",
                    request.preview(),
                    e
                );
            }
        }

        match until_cancelled(token, self.plain_audio_tier(remote, request)).await {
            Ok(result) => {
                info!(
                    target: LOG_TARGET,
                    "Plain audio from {} for {:?}, timings estimated",
                    remote.name(),
                    request.preview()
                );
                Ok(result)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(
                        target: LOG_TARGET,
                        "Plain audio tier failed for {:?}: {}",
                        request.preview(),
                        e
                    );
                }
                Err(e)
            }
        }
    }

    /// Local speech narration with estimated timings.
    ///
    /// # Errors
    ///
    /// Returns `LocalSynthesisUnavailable` if the platform cannot speak.
    pub fn local_narration(&self, request: &NarrationRequest) -> Result<NarrationResult> {
        if !self.speech.is_available() {
            return Err(CoreError::LocalSynthesisUnavailable {
                reason: "platform speech is not available".to_string(),
            });
        }
        let timings = estimate_word_timings(request.unit.text(), self.config.local_estimate());
        Ok(NarrationResult::local(timings))
    }

    /// Warm the cache for `request` in the background.
    ///
    /// Only the remote tiers are tried. Returns `None` when nothing was started:
    /// no remote source, a blank unit, or the key is cached or already in flight.
    pub async fn prefetch(self: &Arc<Self>, request: NarrationRequest) -> Option<JoinHandle<()>> {
        if self.remote.is_none() || request.unit.is_blank() {
            return None;
        }
        let key = request.key().to_string();
        let pipeline = Arc::clone(self);
        let handle = self
            .cache
            .prefetch(&key, move || async move {
                pipeline.resolve_remote(&request, &CancellationToken::new()).await
            })
            .await;
        if handle.is_some() {
            debug!(target: LOG_TARGET, "Prefetching narration for {:?}", key);
        }
        handle
    }

    async fn aligned_tier(&self, remote: &dyn SpeechProvider, request: &NarrationRequest) -> Result<NarrationResult> {
        let speech = with_timeout(
            self.config.aligned_timeout(),
            remote.synthesize_with_alignment(request),
        )
        .await?;

        let alignment = speech
            .alignment
            .filter(|a| !a.is_empty())
            .ok_or_else(|| CoreError::MalformedAlignment {
                reason: "response carried no character alignment".to_string(),
            })?;
        let timings = extract_word_timings(&alignment)?;

        let audio = base64::engine::general_purpose::STANDARD.decode(speech.audio_base64.as_bytes())?;
        if audio.is_empty() {
            return Err(CoreError::EmptyAudio {
                provider: remote.name().to_string(),
            });
        }

        Ok(NarrationResult::remote(SourceTier::Aligned, AudioClip::new(audio), timings))
    }

    async fn plain_audio_tier(&self, remote: &dyn SpeechProvider, request: &NarrationRequest) -> Result<NarrationResult> {
        let audio = with_timeout(self.config.plain_audio_timeout(), remote.synthesize(request)).await?;
        if audio.is_empty() {
            return Err(CoreError::EmptyAudio {
                provider: remote.name().to_string(),
            });
        }

        let timings = estimate_word_timings(request.unit.text(), self.config.plain_audio_estimate());
        Ok(NarrationResult::remote(SourceTier::PlainAudio, AudioClip::new(audio), timings))
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CoreError::AcquisitionTimeout {
            timeout_ms: limit.as_millis_u64(),
        })?
}

/// Race `fut` against `token`; cancellation wins ties
pub(crate) async fn until_cancelled<T>(token: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(CoreError::Cancelled),
        result = fut => result,
    }
}
