//! [`BoundedCache`]: namespaced TTL store with entry-count and voice
//! byte-budget bounds.
//!
//! # Bounds
//!
//! * **Entry count**: inserting a new key into a full cache evicts the
//!   single least-recently-touched entry, whatever its namespace.
//! * **Voice bytes**: entries in the [`VOICE_NAMESPACE`] carrying
//!   [`VoiceMetadata`](super::VoiceMetadata) are byte-accounted; inserting
//!   one evicts the least-recently-touched voice entries until the new entry
//!   fits the budget.
//!
//! Bounds are enforced by eviction, never by rejecting a `set`.  Expired
//! entries are dropped on read and by the periodic [`sweep`](BoundedCache::sweep),
//! which also recomputes the voice byte total from scratch.
//!
//! Every operation takes the store lock once, so count and byte invariants
//! hold between any two calls.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::entry::{check_expiry, CacheEntry, EntryMetadata};

/// Namespace whose entries are byte-accounted.
pub const VOICE_NAMESPACE: &str = "voice";

/// Namespace of cached text-generation responses.
pub const AI_RESPONSE_NAMESPACE: &str = "ai-responses";

// ---------------------------------------------------------------------------
// CacheLimits / SetOptions
// ---------------------------------------------------------------------------

/// Static bounds of a [`BoundedCache`].
#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub default_ttl: Duration,
    pub max_entries: usize,
    pub max_voice_bytes: u64,
}

impl From<&crate::config::CacheConfig> for CacheLimits {
    fn from(config: &crate::config::CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl(),
            max_entries: config.max_entries,
            max_voice_bytes: config.max_voice_cache_bytes,
        }
    }
}

/// Optional parameters of [`BoundedCache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub namespace: Option<String>,
    pub metadata: Option<EntryMetadata>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Snapshot returned by [`BoundedCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub voice_entries: usize,
    pub ai_response_entries: usize,
    pub voice_bytes: u64,
}

/// Compose the storage key `"{namespace}:{key}"`.
pub fn full_key(key: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{ns}:{key}"),
        None => key.to_string(),
    }
}

fn in_namespace(full_key: &str, namespace: &str) -> bool {
    full_key
        .strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(':'))
}

// ---------------------------------------------------------------------------
// Store (lock-protected state)
// ---------------------------------------------------------------------------

struct Store<V> {
    entries: HashMap<String, CacheEntry<V>>,
    voice_bytes: u64,
    next_seq: u64,
}

impl<V> Store<V> {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn accounted(key: &str, entry: &CacheEntry<V>) -> u64 {
        if in_namespace(key, VOICE_NAMESPACE) {
            entry.voice_size()
        } else {
            0
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.voice_bytes = self
            .voice_bytes
            .saturating_sub(Self::accounted(key, &entry));
        Some(entry)
    }

    /// Evict voice entries, oldest touch first, until `incoming` fits.
    fn make_voice_room(&mut self, incoming: u64, budget: u64) {
        if self.voice_bytes + incoming <= budget {
            return;
        }

        let mut voice: Vec<(String, (Instant, u64))> = self
            .entries
            .iter()
            .filter(|(k, _)| in_namespace(k, VOICE_NAMESPACE))
            .map(|(k, e)| (k.clone(), e.recency()))
            .collect();
        voice.sort_by_key(|(_, recency)| *recency);

        for (key, _) in voice {
            if self.voice_bytes + incoming <= budget {
                break;
            }
            log::debug!("cache: evicting voice entry {key:?} for byte budget");
            self.remove(&key);
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.recency())
            .map(|(k, _)| k.clone());

        if let Some(key) = oldest {
            log::debug!("cache: evicting {key:?} (entry limit)");
            self.remove(&key);
        }
    }
}

// ---------------------------------------------------------------------------
// BoundedCache
// ---------------------------------------------------------------------------

/// Thread-safe bounded TTL cache.
///
/// ```
/// use std::time::Duration;
/// use voice_assistant::cache::{BoundedCache, CacheLimits, SetOptions};
///
/// let cache = BoundedCache::new(CacheLimits {
///     default_ttl: Duration::from_secs(60),
///     max_entries: 10,
///     max_voice_bytes: 1024,
/// });
/// cache.set("x", 42, SetOptions::new());
/// assert_eq!(cache.get("x", None, false), Some(42));
/// ```
pub struct BoundedCache<V> {
    limits: CacheLimits,
    store: Mutex<Store<V>>,
    /// Per-key locks serialising concurrent `get_or_set` misses.
    in_flight: FlightMap,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            store: Mutex::new(Store {
                entries: HashMap::new(),
                voice_bytes: 0,
                next_seq: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store<V>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or overwrite `key`, expiring after `options.ttl` (or the
    /// default TTL).
    pub fn set(&self, key: &str, value: V, options: SetOptions) {
        let full = full_key(key, options.namespace.as_deref());
        let ttl = options.ttl.unwrap_or(self.limits.default_ttl);
        let now = Instant::now();

        let mut store = self.lock();

        // Overwrites release the previous entry's bytes and slot first.
        store.remove(&full);

        let incoming = if in_namespace(&full, VOICE_NAMESPACE) {
            options
                .metadata
                .as_ref()
                .and_then(EntryMetadata::voice_size)
                .unwrap_or(0)
        } else {
            0
        };
        if incoming > 0 {
            store.make_voice_room(incoming, self.limits.max_voice_bytes);
        }

        if store.entries.len() >= self.limits.max_entries.max(1) {
            store.evict_oldest();
        }

        let seq = store.next_seq();
        let entry = CacheEntry::new(value, now, ttl, seq, options.metadata);
        store.voice_bytes += incoming;
        store.entries.insert(full, entry);
    }

    /// Remove `key`; returns whether an entry existed.
    pub fn delete(&self, key: &str, namespace: Option<&str>) -> bool {
        let full = full_key(key, namespace);
        self.lock().remove(&full).is_some()
    }

    /// Remove every entry of `namespace`, or everything when `None`.
    pub fn clear(&self, namespace: Option<&str>) {
        let mut store = self.lock();
        match namespace {
            Some(ns) => {
                let keys: Vec<String> = store
                    .entries
                    .keys()
                    .filter(|k| in_namespace(k, ns))
                    .cloned()
                    .collect();
                for key in keys {
                    store.remove(&key);
                }
            }
            None => {
                store.entries.clear();
                store.voice_bytes = 0;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Value of `key` if present and unexpired.  `touch` refreshes its
    /// recency for eviction ordering.
    pub fn get(&self, key: &str, namespace: Option<&str>, touch: bool) -> Option<V> {
        self.get_with_metadata(key, namespace, touch)
            .map(|(value, _)| value)
    }

    /// Like [`get`](Self::get) but also returns the entry metadata.
    pub fn get_with_metadata(
        &self,
        key: &str,
        namespace: Option<&str>,
        touch: bool,
    ) -> Option<(V, Option<EntryMetadata>)> {
        let full = full_key(key, namespace);
        let now = Instant::now();
        let mut store = self.lock();

        let live = store
            .entries
            .get(&full)
            .map(|entry| check_expiry(entry, now).is_some())?;

        if !live {
            store.remove(&full);
            return None;
        }

        let seq = if touch { Some(store.next_seq()) } else { None };
        let entry = store.entries.get_mut(&full)?;
        if let Some(seq) = seq {
            entry.touched_at = now;
            entry.touch_seq = seq;
        }
        Some((entry.value.clone(), entry.metadata.clone()))
    }

    /// Whether `key` is present and unexpired.  Does not touch.
    pub fn has(&self, key: &str, namespace: Option<&str>) -> bool {
        self.get(key, namespace, false).is_some()
    }

    /// Return the cached value, or run `factory`, store its value and return it.
    ///
    /// Concurrent misses on the same key are serialised: the first caller
    /// runs the factory and later callers observe its stored value.  Factory
    /// errors are returned and nothing is stored.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        options: SetOptions,
        factory: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let namespace = options.namespace.clone();
        if let Some(value) = self.get(key, namespace.as_deref(), false) {
            return Ok(value);
        }

        let flight = Flight::join(&self.in_flight, full_key(key, namespace.as_deref()));
        let _turn = flight.lock.lock().await;
        match self.get(key, namespace.as_deref(), false) {
            Some(value) => Ok(value),
            None => {
                let value = factory().await?;
                self.set(key, value.clone(), options);
                Ok(value)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection / maintenance
    // -----------------------------------------------------------------------

    /// Number of stored entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked byte total of the voice namespace.
    pub fn voice_bytes(&self) -> u64 {
        self.lock().voice_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.lock();
        let count = |ns: &str| store.entries.keys().filter(|k| in_namespace(k, ns)).count();
        CacheStats {
            total_entries: store.entries.len(),
            voice_entries: count(VOICE_NAMESPACE),
            ai_response_entries: count(AI_RESPONSE_NAMESPACE),
            voice_bytes: store.voice_bytes,
        }
    }

    /// Drop every expired entry and recompute the voice byte total.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut store = self.lock();

        let before = store.entries.len();
        store
            .entries
            .retain(|_, entry| check_expiry(entry, now).is_some());
        let removed = before - store.entries.len();

        store.voice_bytes = store
            .entries
            .iter()
            .map(|(k, e)| Store::accounted(k, e))
            .sum();

        if removed > 0 {
            log::debug!("cache: sweep removed {removed} expired entries");
        }
        removed
    }
}

impl<V: Clone + Send + 'static> BoundedCache<V> {
    /// Run [`sweep`](Self::sweep) every `interval` on the tokio runtime until
    /// the returned handle is dropped or stopped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let cache = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        });
        SweepHandle { task: Some(task) }
    }
}

// ---------------------------------------------------------------------------
// SweepHandle
// ---------------------------------------------------------------------------

/// Owns the background sweep task; dropping it cancels the sweep.
pub struct SweepHandle {
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Flight
// ---------------------------------------------------------------------------

type FlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// One caller's share of a key's `get_or_set` lock.  Dropping it (also when
/// the caller's future is dropped mid-wait) removes the map entry once no
/// other caller holds it.
struct Flight<'a> {
    map: &'a FlightMap,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(map: &'a FlightMap, key: String) -> Self {
        let lock = {
            let mut flights = map.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(flights.entry(key.clone()).or_default())
        };
        Self { map, key, lock }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // Map + this caller hold the only references: nobody else is waiting.
        if Arc::strong_count(&self.lock) <= 2 {
            flights.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
