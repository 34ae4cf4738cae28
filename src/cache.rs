//! Shared audio cache.
//!
//! Audio is keyed by a fingerprint of the clean text and the speech
//! provider's identity and configuration. Each key is synthesized at most
//! once: concurrent requests for a key that is still being produced wait for
//! the producing call and share its result, success or failure. A failure is
//! not stored, so a later request runs the producer again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::error::{NarrationError, Result};
use crate::{AudioAsset, SpeechProvider};

/// Fingerprint of `(clean_text, provider identity, provider config)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// SHA-256 of the canonical JSON
    /// `{"input_text": .., "service_kwargs": .., "service_name": ..}`, keys
    /// sorted and without whitespace. `hash_len > 0` truncates the hex digest.
    pub fn new(text: &str, identity: &str, config: &serde_json::Value, hash_len: i32) -> Self {
        let data = serde_json::json!({
            "input_text": text,
            "service_name": identity,
            "service_kwargs": config,
        });
        let digest = Sha256::digest(data.to_string().as_bytes());
        let mut hex = hex::encode(digest);
        if hash_len > 0 {
            hex.truncate(hash_len as usize);
        }
        Self(hex)
    }

    /// Fails when the provider cannot render its configuration.
    pub fn for_provider(text: &str, provider: &dyn SpeechProvider, hash_len: i32) -> Result<Self> {
        let config = provider.config()?;
        Ok(Self::new(text, provider.identity(), &config, hash_len))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a stored asset.
    pub hits: u64,
    /// Requests that ran the producer.
    pub misses: u64,
    /// Requests that waited for another caller's producer.
    pub joined: u64,
    /// Producer runs that failed.
    pub failures: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

/// Result slot shared by the producing caller and everyone waiting on it.
struct Flight {
    outcome: Mutex<Option<Result<Arc<AudioAsset>>>>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Result<Arc<AudioAsset>>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<Arc<AudioAsset>> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.done.wait(&mut slot);
        }
    }
}

enum Entry {
    Ready { asset: Arc<AudioAsset>, last_used: u64 },
    Pending(Arc<Flight>),
}

enum Role {
    Lead(Arc<Flight>),
    Join(Arc<Flight>),
}

/// Publishes a failure if the producer unwinds, so waiters never hang and the
/// key is left free for a retry.
struct Leader<'a> {
    cache: &'a AudioCache,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    finished: bool,
}

impl Leader<'_> {
    fn finish(mut self, outcome: Result<Arc<AudioAsset>>) -> Result<Arc<AudioAsset>> {
        self.finished = true;
        self.cache.settle(self.key, &outcome);
        self.flight.publish(outcome.clone());
        outcome
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let outcome = Err(NarrationError::Synthesis(
                "speech synthesis was interrupted".to_string(),
            ));
            self.cache.settle(self.key, &outcome);
            self.flight.publish(outcome);
        }
    }
}

/// In-memory audio cache with single-flight population and optional LRU
/// eviction.
pub struct AudioCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
    max_entries: Option<usize>,
    hash_len: i32,
    clock: AtomicU64,
    counters: Counters,
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCache {
    /// Unbounded cache with full-length fingerprints.
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: config.max_entries.filter(|&n| n > 0),
            hash_len: config.hash_len,
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Fingerprint for `text` spoken by `provider` under this cache's settings.
    pub fn key_for(&self, text: &str, provider: &dyn SpeechProvider) -> Result<CacheKey> {
        CacheKey::for_provider(text, provider, self.hash_len)
    }

    /// Return the asset stored under `key`, running `producer` only if no
    /// asset is stored and no other caller is already producing one.
    pub fn get_or_synthesize<F>(&self, key: &CacheKey, producer: F) -> Result<Arc<AudioAsset>>
    where
        F: FnOnce() -> Result<AudioAsset>,
    {
        let role = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(Entry::Ready { asset, last_used }) => {
                    *last_used = self.tick();
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Returning speech from cache: {key}");
                    return Ok(Arc::clone(asset));
                }
                Some(Entry::Pending(flight)) => Role::Join(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(Flight::new());
                    entries.insert(key.clone(), Entry::Pending(Arc::clone(&flight)));
                    Role::Lead(flight)
                }
            }
        };

        match role {
            Role::Join(flight) => {
                self.counters.joined.fetch_add(1, Ordering::Relaxed);
                log::debug!("Waiting for in-flight synthesis: {key}");
                flight.wait()
            }
            Role::Lead(flight) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let leader = Leader {
                    cache: self,
                    key,
                    flight,
                    finished: false,
                };
                let outcome = producer().map(Arc::new);
                leader.finish(outcome)
            }
        }
    }

    /// Store a finished producer run: keep successes, forget failures.
    fn settle(&self, key: &CacheKey, outcome: &Result<Arc<AudioAsset>>) {
        let mut entries = self.entries.lock();
        match outcome {
            Ok(asset) => {
                log::info!(
                    "Cached {:.2}s of speech under {key}",
                    asset.duration()
                );
                let last_used = self.tick();
                entries.insert(
                    key.clone(),
                    Entry::Ready {
                        asset: Arc::clone(asset),
                        last_used,
                    },
                );
                self.evict_over_capacity(&mut entries, key);
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("Synthesis for {key} failed, not caching: {err}");
                entries.remove(key);
            }
        }
    }

    fn evict_over_capacity(&self, entries: &mut HashMap<CacheKey, Entry>, keep: &CacheKey) {
        let Some(max) = self.max_entries else {
            return;
        };
        loop {
            let ready = entries
                .values()
                .filter(|e| matches!(e, Entry::Ready { .. }))
                .count();
            if ready <= max {
                return;
            }
            let oldest = entries
                .iter()
                .filter(|(k, _)| *k != keep)
                .filter_map(|(k, e)| match e {
                    Entry::Ready { last_used, .. } => Some((k.clone(), *last_used)),
                    Entry::Pending(_) => None,
                })
                .min_by_key(|(_, used)| *used);
            let Some((victim, _)) = oldest else {
                return;
            };
            log::debug!("Evicting least recently used speech {victim}");
            entries.remove(&victim);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Stored asset for `key`, without producing one.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AudioAsset>> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(Entry::Ready { asset, last_used }) => {
                *last_used = self.tick();
                Some(Arc::clone(asset))
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        matches!(self.entries.lock().get(key), Some(Entry::Ready { .. }))
    }

    /// Number of stored assets.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, Entry::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored asset. In-flight syntheses are unaffected.
    pub fn clear(&self) {
        self.entries
            .lock()
            .retain(|_, e| matches!(e, Entry::Pending(_)));
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn asset(duration: f64) -> AudioAsset {
        AudioAsset::new(vec![7; 8], 24_000, duration).unwrap()
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::new(text, "test", &serde_json::json!({"voice": "a"}), -1)
    }

    #[test]
    fn key_is_stable_and_sensitive_to_every_part() {
        let config = serde_json::json!({"voice": "a", "speed": 1.0});
        let reordered = serde_json::json!({"speed": 1.0, "voice": "a"});
        let base = CacheKey::new("Hi there", "tone", &config, -1);
        assert_eq!(base, CacheKey::new("Hi there", "tone", &reordered, -1));
        assert_eq!(base.as_str().len(), 64);
        assert_ne!(base, CacheKey::new("Hi there!", "tone", &config, -1));
        assert_ne!(base, CacheKey::new("Hi there", "other", &config, -1));
        assert_ne!(
            base,
            CacheKey::new("Hi there", "tone", &serde_json::json!({"voice": "b"}), -1)
        );
    }

    #[test]
    fn key_can_be_truncated() {
        let full = CacheKey::new("Hi", "tone", &serde_json::Value::Null, 0);
        let short = CacheKey::new("Hi", "tone", &serde_json::Value::Null, 12);
        assert_eq!(short.as_str().len(), 12);
        assert!(full.as_str().starts_with(short.as_str()));
    }

    #[test]
    fn producer_runs_once_per_key() {
        let cache = AudioCache::new();
        let calls = AtomicUsize::new(0);
        let produce = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(asset(2.0))
        };
        let first = cache.get_or_synthesize(&key("a"), produce).unwrap();
        let second = cache.get_or_synthesize(&key("a"), produce).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = AudioCache::new();
        let err = cache
            .get_or_synthesize(&key("a"), || {
                Err(NarrationError::Synthesis("offline".into()))
            })
            .unwrap_err();
        assert_eq!(err, NarrationError::Synthesis("offline".into()));
        assert!(!cache.contains(&key("a")));

        let retried = cache.get_or_synthesize(&key("a"), || Ok(asset(1.0))).unwrap();
        assert_eq!(retried.duration(), 1.0);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn concurrent_requests_share_one_synthesis() {
        let cache = Arc::new(AudioCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_synthesize(&key("shared"), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(asset(3.0))
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert_eq!(result.as_ref().unwrap().duration(), 3.0);
        }
    }

    #[test]
    fn waiters_receive_the_same_failure() {
        let cache = Arc::new(AudioCache::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let cache = Arc::clone(&cache);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                cache.get_or_synthesize(&key("x"), || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Err(NarrationError::Synthesis("quota exceeded".into()))
                })
            })
        };
        started.wait();
        let joined = cache.get_or_synthesize(&key("x"), || Ok(asset(1.0)));

        let led = leader.join().unwrap();
        assert_eq!(led, Err(NarrationError::Synthesis("quota exceeded".into())));
        assert_eq!(joined, led);
        assert_eq!(cache.stats().joined, 1);
        assert!(!cache.contains(&key("x")));
    }

    #[test]
    fn panicking_producer_releases_the_key() {
        let cache = AudioCache::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.get_or_synthesize(&key("p"), || panic!("model crashed"));
        }));
        assert!(result.is_err());
        let asset = cache.get_or_synthesize(&key("p"), || Ok(asset(1.0))).unwrap();
        assert_eq!(asset.duration(), 1.0);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = AudioCache::with_config(&CacheConfig {
            max_entries: Some(2),
            ..Default::default()
        });
        cache.get_or_synthesize(&key("a"), || Ok(asset(1.0))).unwrap();
        cache.get_or_synthesize(&key("b"), || Ok(asset(2.0))).unwrap();
        // touch "a" so "b" becomes the oldest
        cache.get_or_synthesize(&key("a"), || Ok(asset(9.0))).unwrap();
        cache.get_or_synthesize(&key("c"), || Ok(asset(3.0))).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn clear_drops_stored_assets() {
        let cache = AudioCache::new();
        cache.get_or_synthesize(&key("a"), || Ok(asset(1.0))).unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get(&key("a")), None);
    }
}
