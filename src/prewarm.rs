//! URL Prewarm Cache (§4.1): pre-fetches and holds short-lived signed URLs
//! to the Agent provider so WebSocket setup overlaps with ringing instead of
//! stacking after it. Mutex-guarded like the teacher's `CallRegistry`;
//! acquisition I/O happens without holding the lock (§5, "Shared resources").

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

const TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_TARGET: usize = 3;

struct SignedUrlEntry {
    url: String,
    acquired_at: Instant,
}

impl SignedUrlEntry {
    fn is_fresh(&self) -> bool {
        self.acquired_at.elapsed() < TTL
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrewarmError {
    #[error("signed URL acquisition rejected by upstream: {0}")]
    UpstreamAuth(String),
}

/// Minted by calling the Agent provider's "get signed URL" endpoint.
///
/// Implemented as a trait so the cache itself stays free of any particular
/// HTTP client wiring; `crate::agent::client::SignedUrlMinter` is the real one.
#[async_trait::async_trait]
pub trait SignedUrlSource: Send + Sync {
    async fn mint(&self) -> Result<String, PrewarmError>;
}

pub struct UrlPrewarmCache<S: SignedUrlSource> {
    source: Arc<S>,
    entries: Arc<Mutex<VecDeque<SignedUrlEntry>>>,
    target: AtomicUsize,
}

impl<S: SignedUrlSource + 'static> UrlPrewarmCache<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            entries: Arc::new(Mutex::new(VecDeque::new())),
            target: AtomicUsize::new(DEFAULT_TARGET),
        }
    }

    /// Adjust the target cache size (driven by the Call-Rate Predictor, §4.6).
    pub fn set_target(&self, target: usize) {
        self.target.store(target, Ordering::Relaxed);
    }

    pub fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Pop one fresh signed URL, or synchronously mint one on a cold cache.
    /// Never fails the call: prewarm failures just mean synchronous fallback,
    /// whose own failure surfaces to the caller as `PrewarmError`.
    pub async fn get_url(&self) -> Result<String, PrewarmError> {
        let popped = {
            let mut entries = self.entries.lock().await;
            while let Some(front) = entries.front() {
                if front.is_fresh() {
                    break;
                }
                entries.pop_front();
            }
            entries.pop_front()
        };

        if let Some(entry) = popped {
            self.schedule_replenish();
            return Ok(entry.url);
        }

        tracing::debug!("URL prewarm cache empty, minting synchronously");
        self.source.mint().await
    }

    /// Fire-and-forget replenishment of one slot, up to `target()`.
    fn schedule_replenish(&self) {
        let source = self.source.clone();
        let entries = self.entries.clone();
        let target = self.target();
        tokio::spawn(async move {
            let len = entries.lock().await.len();
            if len >= target {
                return;
            }
            match source.mint().await {
                Ok(url) => {
                    entries.lock().await.push_back(SignedUrlEntry {
                        url,
                        acquired_at: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Prewarm replenishment failed: {e}");
                }
            }
        });
    }

    /// Top the cache up to its target size; called at startup and can be
    /// scheduled periodically.
    pub async fn fill(&self) {
        let deficit = {
            let entries = self.entries.lock().await;
            self.target().saturating_sub(entries.len())
        };
        for _ in 0..deficit {
            match self.source.mint().await {
                Ok(url) => {
                    self.entries.lock().await.push_back(SignedUrlEntry {
                        url,
                        acquired_at: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Prewarm fill failed: {e}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SignedUrlSource for CountingSource {
        async fn mint(&self) -> Result<String, PrewarmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("wss://example/signed/{n}"))
        }
    }

    #[tokio::test]
    async fn falls_back_to_synchronous_mint_when_empty() {
        let cache = UrlPrewarmCache::new(Arc::new(CountingSource {
            calls: AtomicU32::new(0),
        }));
        let url = cache.get_url().await.unwrap();
        assert_eq!(url, "wss://example/signed/0");
    }

    #[tokio::test]
    async fn fill_respects_target() {
        let cache = UrlPrewarmCache::new(Arc::new(CountingSource {
            calls: AtomicU32::new(0),
        }));
        cache.set_target(3);
        cache.fill().await;
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn stale_entries_are_not_handed_out() {
        let cache = UrlPrewarmCache::new(Arc::new(CountingSource {
            calls: AtomicU32::new(0),
        }));
        cache.entries.lock().await.push_back(SignedUrlEntry {
            url: "wss://stale".into(),
            acquired_at: Instant::now() - Duration::from_secs(6 * 60),
        });
        let url = cache.get_url().await.unwrap();
        assert_ne!(url, "wss://stale");
    }
}
