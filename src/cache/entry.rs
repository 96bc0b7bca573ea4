//! Cache entries, per-namespace metadata and the pure expiry check.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Free-form attributes attached to non-voice entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub attributes: BTreeMap<String, String>,
}

impl Metadata {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Attributes of a synthesized-audio entry.  `size_bytes` feeds the voice
/// byte budget.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMetadata {
    pub size_bytes: u64,
    pub duration_hint: Option<Duration>,
    pub emotion: Option<String>,
    pub rate: Option<f32>,
}

impl VoiceMetadata {
    pub fn sized(size_bytes: u64) -> Self {
        Self {
            size_bytes,
            duration_hint: None,
            emotion: None,
            rate: None,
        }
    }
}

/// Metadata carried by an entry, tagged by the kind of payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryMetadata {
    Generic(Metadata),
    Voice(VoiceMetadata),
}

impl EntryMetadata {
    /// Bytes this metadata declares, if it is voice metadata.
    pub fn voice_size(&self) -> Option<u64> {
        match self {
            EntryMetadata::Voice(v) => Some(v.size_bytes),
            EntryMetadata::Generic(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// A stored value with its lifetime and recency bookkeeping.
///
/// Invariant: `expires_at > created_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Last insert or touching read.
    pub touched_at: Instant,
    /// Monotonic recency counter; breaks ties between equal `touched_at`.
    pub touch_seq: u64,
    pub metadata: Option<EntryMetadata>,
}

impl<V> CacheEntry<V> {
    /// Build an entry living for `ttl` from `now`.  A zero TTL is stretched
    /// to one millisecond so the lifetime invariant holds.
    pub fn new(
        value: V,
        now: Instant,
        ttl: Duration,
        touch_seq: u64,
        metadata: Option<EntryMetadata>,
    ) -> Self {
        let ttl = ttl.max(Duration::from_millis(1));
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
            touched_at: now,
            touch_seq,
            metadata,
        }
    }

    /// Recency key used for eviction ordering (oldest first).
    pub fn recency(&self) -> (Instant, u64) {
        (self.touched_at, self.touch_seq)
    }

    /// Size declared by voice metadata, zero otherwise.
    pub fn voice_size(&self) -> u64 {
        self.metadata
            .as_ref()
            .and_then(EntryMetadata::voice_size)
            .unwrap_or(0)
    }
}

/// The value of `entry` if it is still visible at `now`.
///
/// `None` means the caller must evict the entry.
pub fn check_expiry<V>(entry: &CacheEntry<V>, now: Instant) -> Option<&V> {
    (now < entry.expires_at).then_some(&entry.value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_strictly_before_expiry() {
        let now = Instant::now();
        let entry = CacheEntry::new(42, now, Duration::from_millis(100), 0, None);

        assert_eq!(check_expiry(&entry, now), Some(&42));
        assert_eq!(check_expiry(&entry, now + Duration::from_millis(99)), Some(&42));
        assert_eq!(check_expiry(&entry, now + Duration::from_millis(100)), None);
        assert_eq!(check_expiry(&entry, now + Duration::from_secs(5)), None);
    }

    #[test]
    fn zero_ttl_still_expires_after_creation() {
        let now = Instant::now();
        let entry = CacheEntry::new("v", now, Duration::ZERO, 0, None);
        assert!(entry.expires_at > entry.created_at);
    }

    #[test]
    fn voice_size_only_counts_voice_metadata() {
        let now = Instant::now();
        let voice = CacheEntry::new(
            (),
            now,
            Duration::from_secs(1),
            0,
            Some(EntryMetadata::Voice(VoiceMetadata::sized(60))),
        );
        let generic = CacheEntry::new(
            (),
            now,
            Duration::from_secs(1),
            1,
            Some(EntryMetadata::Generic(Metadata::default().with("context", "{}"))),
        );
        let bare = CacheEntry::new((), now, Duration::from_secs(1), 2, None);

        assert_eq!(voice.voice_size(), 60);
        assert_eq!(generic.voice_size(), 0);
        assert_eq!(bare.voice_size(), 0);
    }

    #[test]
    fn recency_orders_by_time_then_sequence() {
        let now = Instant::now();
        let a = CacheEntry::new((), now, Duration::from_secs(1), 1, None);
        let b = CacheEntry::new((), now, Duration::from_secs(1), 2, None);
        assert!(a.recency() < b.recency());
    }
}
