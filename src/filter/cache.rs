use lru::LruCache;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::Instant;

/// Minutes a rejected detail page stays rejected, drawn uniformly per rejection.
pub const REJECT_COOLDOWN_MINUTES: RangeInclusive<u64> = 10..=30;

#[derive(Debug, Clone, Copy)]
struct Rejection {
    rejected_at: Instant,
    retry_at: Instant,
}

/// Process-wide verdict cache keyed by detail-page URL.
///
/// Rejections expire after a randomized cooldown so that a large batch
/// rejected in one pass is re-checked gradually rather than all at once.
/// Acceptances do not expire: once a detail page passed, the item is trusted
/// for the lifetime of the process.
pub struct DecisionCache {
    rejected: Mutex<HashMap<String, Rejection>>,
    accepted: Mutex<LruCache<String, ()>>,
    cooldown: RangeInclusive<u64>,
}

impl Default for DecisionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionCache {
    /// Unbounded acceptance set with the standard 10–30 minute rejection cooldown.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Bounds the acceptance set to `capacity` URLs (0 = unbounded).
    ///
    /// When full, the least recently used acceptance is forgotten and that
    /// detail page is simply verified again the next time it shows up.
    pub fn with_capacity(capacity: usize) -> Self {
        let accepted = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            rejected: Mutex::new(HashMap::new()),
            accepted: Mutex::new(accepted),
            cooldown: REJECT_COOLDOWN_MINUTES,
        }
    }

    /// Overrides the cooldown range in minutes.
    pub fn with_cooldown(mut self, minutes: RangeInclusive<u64>) -> Self {
        self.cooldown = minutes;
        self
    }

    pub fn record_rejected(&self, url: &str) -> Duration {
        let minutes = rand::thread_rng().gen_range(self.cooldown.clone());
        let cooldown = Duration::from_secs(minutes * 60);
        let now = Instant::now();
        self.rejected.lock().insert(
            url.to_string(),
            Rejection {
                rejected_at: now,
                retry_at: now + cooldown,
            },
        );
        cooldown
    }

    pub fn record_accepted(&self, url: &str) {
        self.rejected.lock().remove(url);
        self.accepted.lock().put(url.to_string(), ());
    }

    /// True while the URL is inside its rejection cooldown.
    ///
    /// An expired rejection is removed here, so the next filter pass fetches
    /// the detail page again.
    pub fn is_rejected(&self, url: &str) -> bool {
        let mut rejected = self.rejected.lock();
        let Some(entry) = rejected.get(url).copied() else {
            return false;
        };
        if Instant::now() < entry.retry_at {
            return true;
        }
        rejected.remove(url);
        tracing::info!(
            url = %url,
            rejected_secs = entry.rejected_at.elapsed().as_secs(),
            "Removed from rejection cache for retry"
        );
        false
    }

    pub fn is_accepted(&self, url: &str) -> bool {
        self.accepted.lock().get(url).is_some()
    }

    /// Drops every rejection whose cooldown has elapsed. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut rejected = self.rejected.lock();
        let before = rejected.len();
        rejected.retain(|_, entry| now < entry.retry_at);
        before - rejected.len()
    }

    pub fn rejected_len(&self) -> usize {
        self.rejected.lock().len()
    }

    pub fn accepted_len(&self) -> usize {
        self.accepted.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://chdbits.co/details.php?id=1";

    #[tokio::test(start_paused = true)]
    async fn test_rejection_within_cooldown() {
        let cache = DecisionCache::new();
        let cooldown = cache.record_rejected(URL);

        assert!(cooldown >= Duration::from_secs(10 * 60));
        assert!(cooldown <= Duration::from_secs(30 * 60));
        assert!(cache.is_rejected(URL));
        assert!(!cache.is_accepted(URL));

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        assert!(cache.is_rejected(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_expires_after_cooldown() {
        let cache = DecisionCache::new();
        cache.record_rejected(URL);

        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        assert!(!cache.is_rejected(URL));
        assert_eq!(cache.rejected_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_drawn_from_range() {
        let cache = DecisionCache::new().with_cooldown(5..=5);
        let cooldown = cache.record_rejected(URL);
        assert_eq!(cooldown, Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.is_rejected(URL));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.is_rejected(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_only_removes_elapsed() {
        let cache = DecisionCache::new().with_cooldown(10..=10);
        cache.record_rejected("https://a/1");
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        cache.record_rejected("https://a/2");
        tokio::time::advance(Duration::from_secs(6 * 60)).await;

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_rejected("https://a/2"));
        assert!(!cache.is_rejected("https://a/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acceptance_never_expires() {
        let cache = DecisionCache::new();
        cache.record_accepted(URL);

        tokio::time::advance(Duration::from_secs(7 * 24 * 3600)).await;
        assert!(cache.is_accepted(URL));
        assert_eq!(cache.accepted_len(), 1);
    }

    #[test]
    fn test_acceptance_clears_rejection() {
        let cache = DecisionCache::new();
        cache.record_rejected(URL);
        cache.record_accepted(URL);
        assert!(!cache.is_rejected(URL));
        assert!(cache.is_accepted(URL));
    }

    #[test]
    fn test_bounded_acceptance_forgets_least_recent() {
        let cache = DecisionCache::with_capacity(2);
        cache.record_accepted("https://a/1");
        cache.record_accepted("https://a/2");
        assert!(cache.is_accepted("https://a/1"));
        cache.record_accepted("https://a/3");

        assert!(cache.is_accepted("https://a/1"));
        assert!(!cache.is_accepted("https://a/2"));
        assert!(cache.is_accepted("https://a/3"));
    }
}
