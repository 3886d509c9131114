use crate::error::Result;
use crate::narration::NarrationResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const LOG_TARGET: &str = "readalong::cache";

/// Session-scoped narration cache.
///
/// Maps a text unit's key (its trimmed text) to the resolved narration.
/// Entries are immutable once stored; the map is unbounded and lives as long
/// as the engine that owns it.
#[derive(Debug, Default)]
pub struct NarrationCache {
    entries: RwLock<HashMap<String, NarrationResult>>,
    /// Keys with a prefetch in flight. The receiver resolves once the
    /// prefetch task drops its sender.
    pending: RwLock<HashMap<String, watch::Receiver<()>>>,
}

impl NarrationCache {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Look up a narration by key
    pub async fn get(&self, key: &str) -> Option<NarrationResult> {
        let hit = self.entries.read().await.get(key).cloned();
        debug!(
            target: LOG_TARGET,
            "Cache {} for {:?}",
            if hit.is_some() { "hit" } else { "miss" },
            key
        );
        hit
    }

    /// Store a narration; an existing entry for the key is replaced
    pub async fn put(&self, key: impl Into<String>, result: NarrationResult) {
        let key = key.into();
        debug!(
            target: LOG_TARGET,
            "Storing {} narration ({} words) for {:?}",
            result.tier,
            result.timings.len(),
            key
        );
        self.entries.write().await.insert(key, result);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Fire-and-forget acquisition for a key that is not cached yet.
    ///
    /// `acquire` runs on a background task; a successful result is stored and a
    /// failure is logged and dropped. Returns `None` without spawning when the
    /// key is already cached or a prefetch for it is in flight.
    pub async fn prefetch<F, Fut>(self: &Arc<Self>, key: &str, acquire: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<NarrationResult>> + Send + 'static,
    {
        if key.is_empty() || self.contains(key).await {
            return None;
        }
        let (done_tx, done_rx) = watch::channel(());
        {
            let mut pending = self.pending.write().await;
            if pending.contains_key(key) {
                debug!(target: LOG_TARGET, "Prefetch already in flight for {:?}", key);
                return None;
            }
            pending.insert(key.to_string(), done_rx);
        }

        let cache = Arc::clone(self);
        let key = key.to_string();
        Some(tokio::spawn(async move {
            match acquire().await {
                Ok(result) if result.is_cacheable() => {
                    info!(target: LOG_TARGET, "Prefetched {} narration for {:?}", result.tier, key);
                    cache.put(key.clone(), result).await;
                }
                Ok(result) => {
                    debug!(target: LOG_TARGET, "Prefetch for {:?} produced uncacheable {} result", key, result.tier);
                }
                Err(e) => {
                    debug!(target: LOG_TARGET, "Prefetch for {:?} failed: {}", key, e);
                }
            }
            cache.pending.write().await.remove(&key);
            drop(done_tx);
        }))
    }

    /// Wait for an in-flight prefetch of `key` to settle.
    ///
    /// Returns false at once when no prefetch is running for the key.
    pub async fn wait_pending(&self, key: &str) -> bool {
        let Some(mut done) = self.pending.read().await.get(key).cloned() else {
            return false;
        };
        debug!(target: LOG_TARGET, "Waiting on in-flight prefetch for {:?}", key);
        // Errors once the sender is gone, which is the only signal sent
        let _ = done.changed().await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::narration::{AudioClip, SourceTier};
    use crate::timing::WordTiming;

    fn aligned(word: &str) -> NarrationResult {
        NarrationResult::remote(
            SourceTier::Aligned,
            AudioClip::new(word.as_bytes().to_vec()),
            vec![WordTiming::new(word, 0.0, 0.4)],
        )
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = NarrationCache::new();
        let result = aligned("hello");
        cache.put("hello", result.clone()).await;

        let cached = cache.get("hello").await.unwrap();
        assert_eq!(cached, result);
        assert_eq!(cached.audio.unwrap().bytes().as_ref(), b"hello");
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let cache = NarrationCache::new();
        assert!(cache.get("nothing").await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = NarrationCache::new();
        cache.put("page", aligned("one")).await;
        cache.put("page", aligned("two")).await;
        assert_eq!(cache.get("page").await.unwrap().timings[0].word, "two");
    }

    #[tokio::test]
    async fn test_prefetch_stores_result() {
        let cache = NarrationCache::new();
        let handle = cache
            .prefetch("next page", || async { Ok(aligned("next")) })
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(cache.contains("next page").await);
    }

    #[tokio::test]
    async fn test_prefetch_swallows_failure() {
        let cache = NarrationCache::new();
        let handle = cache
            .prefetch("next page", || async {
                Err(CoreError::AcquisitionTimeout { timeout_ms: 3000 })
            })
            .await
            .unwrap();
        handle.await.unwrap();

        assert!(!cache.contains("next page").await);
        // A failed prefetch can be retried
        assert!(cache
            .prefetch("next page", || async { Ok(aligned("next")) })
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_prefetch_skips_cached_key() {
        let cache = NarrationCache::new();
        cache.put("page", aligned("page")).await;
        assert!(cache
            .prefetch("page", || async { Ok(aligned("other")) })
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_prefetch_skips_in_flight_key() {
        let cache = NarrationCache::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let first = cache
            .prefetch("page", || async move {
                let _ = release_rx.await;
                Ok(aligned("page"))
            })
            .await
            .unwrap();

        assert!(cache
            .prefetch("page", || async { Ok(aligned("dup")) })
            .await
            .is_none());

        release_tx.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(cache.get("page").await.unwrap().timings[0].word, "page");
    }

    #[tokio::test]
    async fn test_wait_pending_resolves_after_store() {
        let cache = NarrationCache::new();
        assert!(!cache.wait_pending("page").await);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = cache
            .prefetch("page", || async move {
                let _ = release_rx.await;
                Ok(aligned("page"))
            })
            .await
            .unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.wait_pending("page").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        release_tx.send(()).unwrap();
        assert!(waiter.await.unwrap());
        // The result is stored before waiters wake
        assert!(cache.contains("page").await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_prefetch_ignores_local_result() {
        let cache = NarrationCache::new();
        let handle = cache
            .prefetch("page", || async {
                Ok(NarrationResult::local(vec![WordTiming::new("page", 0.1, 0.5)]))
            })
            .await
            .unwrap();
        handle.await.unwrap();
        assert!(!cache.contains("page").await);
    }
}
