use std::fmt;
use std::time::Duration;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Downloaded file payload.
#[derive(Debug, Clone)]
struct CacheEntry {
    key: String,
    payload: Bytes,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    /// Front is evicted first; hits and inserts move to the back.
    order: Vec<CacheEntry>,
    bytes: u64,
}

impl Entries {
    fn position(&self, key: &str) -> Option<usize> {
        self.order.iter().position(|entry| entry.key == key)
    }

    fn remove(&mut self, index: usize) -> CacheEntry {
        let entry = self.order.remove(index);
        self.bytes -= entry.payload.len() as u64;
        entry
    }

    fn push(&mut self, entry: CacheEntry) {
        self.bytes += entry.payload.len() as u64;
        self.order.push(entry);
    }
}

/// Size- and time-bounded store of file payloads keyed by file locator.
///
/// Total payload bytes stay at or below the capacity after every `put`,
/// unless a single entry alone exceeds it.
pub struct ContentCache {
    entries: Mutex<Entries>,
    capacity: u64,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity,
            ttl,
        }
    }

    /// Inserts or replaces `key`, then evicts from the front while over capacity.
    pub fn put(&self, key: &str, payload: Bytes) {
        let mut entries = self.entries.lock();
        if let Some(index) = entries.position(key) {
            entries.remove(index);
        }
        entries.push(CacheEntry {
            key: key.to_string(),
            payload,
            fetched_at: Instant::now(),
        });

        while entries.bytes > self.capacity && entries.order.len() > 1 {
            let evicted = entries.remove(0);
            info!("Evicted {} from content cache", evicted.key);
        }
        info!(
            "Content cache holds {} bytes in {} entries",
            entries.bytes,
            entries.order.len()
        );
    }

    /// Returns a fresh payload and marks it most recently used.
    ///
    /// An expired entry reads as absent but stays in place until a later
    /// `put` evicts or replaces it.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        let index = entries.position(key)?;
        if entries.order[index].fetched_at.elapsed() > self.ttl {
            debug!("Cached {} expired", key);
            return None;
        }
        let entry = entries.remove(index);
        let payload = entry.payload.clone();
        entries.push(entry);
        Some(payload)
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.order.len(),
            bytes: entries.bytes,
            expired: entries
                .order
                .iter()
                .filter(|entry| entry.fetched_at.elapsed() > self.ttl)
                .count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub expired: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "content cache: {} entries, {} bytes, {} expired",
            self.entries, self.bytes, self.expired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn payload(len: usize) -> Bytes {
        Bytes::from(vec![7u8; len])
    }

    #[test]
    fn test_cache_basic() {
        let cache = ContentCache::new(100, Duration::from_secs(60));
        assert_eq!(cache.get("a"), None);

        cache.put("a", Bytes::from_static(b"hello"));
        assert_eq!(cache.get("a"), Some(Bytes::from_static(b"hello")));

        cache.put("a", Bytes::from_static(b"bye"));
        assert_eq!(cache.get("a"), Some(Bytes::from_static(b"bye")));
        assert_eq!(cache.stats().bytes, 3);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ContentCache::new(10, Duration::from_secs(60));
        cache.put("a", payload(4));
        cache.put("b", payload(4));
        cache.put("c", payload(4));

        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().bytes, 8);
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let cache = ContentCache::new(10, Duration::from_secs(60));
        cache.put("a", payload(4));
        cache.put("b", payload(4));
        assert!(cache.get("a").is_some());

        cache.put("c", payload(4));
        assert!(cache.get("a").is_some());
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_single_oversized_entry_is_kept() {
        let cache = ContentCache::new(10, Duration::from_secs(60));
        cache.put("small", payload(3));
        cache.put("huge", payload(50));

        assert_eq!(cache.get("small"), None);
        assert_eq!(cache.get("huge").map(|p| p.len()), Some(50));
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_capacity_invariant_over_puts() {
        let cache = ContentCache::new(64, Duration::from_secs(60));
        for (i, len) in [10, 30, 5, 70, 1, 1, 40, 64, 20, 33].into_iter().enumerate() {
            cache.put(&format!("f{}", i % 4), payload(len));
            let stats = cache.stats();
            assert!(stats.bytes <= 64 || stats.entries == 1, "{}", stats);
        }
    }

    #[test]
    fn test_expired_entry_is_masked_not_purged() {
        let cache = ContentCache::new(100, Duration::from_millis(20));
        cache.put("a", payload(5));
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.get("a"), None);
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.expired, 1);

        cache.put("a", payload(6));
        assert_eq!(cache.get("a").map(|p| p.len()), Some(6));
    }
}
