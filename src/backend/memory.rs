use crate::backend::Backend;
use dashmap::DashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A [Backend] that uses [Dashmap](dashmap::DashMap) to store windows in memory.
///
/// Suitable for single process deployments and tests; windows do not survive a restart.
/// Clones share the same map.
///
/// Without an [expiry](InMemoryBackendBuilder::expiry) a window is only pruned when its own key
/// is seen again, so a stream of distinct keys grows the map without bound.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    map: Arc<DashMap<String, Vec<u64>>>,
    expiry: Option<u64>,
    last_purge: Arc<AtomicU64>,
}

impl InMemoryBackend {
    /// A backend that never drops windows on its own.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder { expiry: None }
    }

    /// Number of windows currently held.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drop every window whose newest event is older than the expiry, as of `now` (seconds since
    /// the Unix epoch). Returns how many were dropped; always 0 without an expiry.
    pub fn purge_expired(&self, now: u64) -> usize {
        let Some(expiry) = self.expiry else {
            return 0;
        };
        let before = self.map.len();
        self.map.retain(|_key, events| newest(events).saturating_add(expiry) >= now);
        before.saturating_sub(self.map.len())
    }

    // Saves carry the admission time, so the map is swept at most once per expiry period of
    // event time, whatever clock the limiter uses.
    fn maybe_purge(&self, now: u64) {
        let Some(expiry) = self.expiry else {
            return;
        };
        let last = self.last_purge.load(Ordering::Relaxed);
        if now < last.saturating_add(expiry) {
            return;
        }
        if self
            .last_purge
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let purged = self.purge_expired(now);
            if purged > 0 {
                log::debug!("Purged {purged} expired rate limit windows");
            }
        }
    }
}

pub struct InMemoryBackendBuilder {
    expiry: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Forget a window once its newest event is older than `expiry`.
    ///
    /// Set this to at least the limiter's window size, otherwise windows may disappear while they
    /// still hold valid events. Rounded up to whole seconds. Expired windows are swept during
    /// saves, or on demand with [InMemoryBackend::purge_expired].
    pub fn expiry(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn build(self) -> InMemoryBackend {
        InMemoryBackend {
            map: Arc::new(DashMap::new()),
            expiry: self
                .expiry
                .map(|expiry| expiry.as_secs() + u64::from(expiry.subsec_nanos() > 0)),
            last_purge: Arc::new(AtomicU64::new(0)),
        }
    }
}

fn newest(events: &[u64]) -> u64 {
    events.iter().copied().max().unwrap_or(0)
}

impl Backend for InMemoryBackend {
    type Error = Infallible;

    async fn load(&self, key: &str) -> Result<Vec<u64>, Self::Error> {
        Ok(self
            .map
            .get(key)
            .map(|events| events.value().clone())
            .unwrap_or_default())
    }

    async fn save(&self, key: &str, events: &[u64]) -> Result<(), Self::Error> {
        self.map.insert(key.to_owned(), events.to_vec());
        self.maybe_purge(newest(events));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.map.remove(key);
        Ok(())
    }
}
