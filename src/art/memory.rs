use super::ArtCache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How hard the platform is squeezing us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimLevel {
    /// Give back half of the cache budget.
    Moderate,
    /// Give back everything.
    Critical,
}

/// Reacts to memory pressure by shrinking the album art cache, and clears it
/// periodically so long sessions don't pin covers nobody is looking at.
#[derive(Debug)]
pub struct MemoryManager {
    cache: Arc<ArtCache>,
    cleanup_interval: Duration,
    last_cleanup: Option<Instant>,
}

impl MemoryManager {
    pub fn new(cache: Arc<ArtCache>, cleanup_interval: Duration) -> Self {
        Self {
            cache,
            cleanup_interval,
            last_cleanup: None,
        }
    }

    /// Periodic housekeeping. Clears the cache if the last cleanup is older
    /// than the interval (or never happened) and returns whether it did.
    pub fn check(&mut self, now: Instant) -> bool {
        let due = match self.last_cleanup {
            Some(last) => now.saturating_duration_since(last) > self.cleanup_interval,
            None => true,
        };
        if due {
            self.cleanup(now);
        }
        due
    }

    fn cleanup(&mut self, now: Instant) {
        let stats = self.cache.stats();
        let dropped = self.cache.clear();
        self.last_cleanup = Some(now);
        debug!(
            dropped,
            freed_bytes = stats.occupied_bytes,
            hits = stats.hits,
            misses = stats.misses,
            "periodic album art cleanup"
        );
    }

    /// The platform's low-memory callback lands here.
    pub fn on_low_memory(&self) -> usize {
        warn!("low memory - clearing album art cache");
        self.cache.clear()
    }

    pub fn on_trim(&self, level: TrimLevel) -> usize {
        match level {
            TrimLevel::Moderate => {
                let evicted = self.cache.trim_to(self.cache.capacity_bytes() / 2);
                info!(evicted, occupied = self.cache.occupied_bytes(), "trimmed album art cache");
                evicted
            }
            TrimLevel::Critical => self.on_low_memory(),
        }
    }

    /// Clear the cache once per interval until the handle is aborted.
    pub fn spawn_periodic(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.cleanup_interval.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                self.cleanup(Instant::now());
            }
        })
    }
}
