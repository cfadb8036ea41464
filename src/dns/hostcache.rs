//! Host resolution cache.
//!
//! Chromium mapping: net/dns/host_cache.h (simplified in-memory version)
//!
//! Entries carry an absolute expiry computed from the TTL at insertion time.
//! Callers pass `now` explicitly so lookups are deterministic in tests.

use crate::base::neterror::NetError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// DNS record type a lookup asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DnsQueryType {
    /// A and AAAA.
    #[default]
    Unspecified,
    A,
    Aaaa,
    Txt,
    Ptr,
    Srv,
    Https,
}

/// Cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostCacheKey {
    pub hostname: String,
    pub query_type: DnsQueryType,
    /// Whether the result came from a secure (DoH) lookup.
    pub secure: bool,
}

impl HostCacheKey {
    pub fn new(hostname: impl Into<String>, query_type: DnsQueryType) -> Self {
        Self { hostname: hostname.into().to_ascii_lowercase(), query_type, secure: false }
    }

    /// Mark the key as belonging to a secure lookup.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntrySource {
    #[default]
    Unknown,
    Dns,
    Hosts,
}

/// Cached result: either addresses or the error the lookup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCacheEntry {
    pub error: Option<NetError>,
    pub addresses: Vec<SocketAddr>,
    pub source: EntrySource,
}

impl HostCacheEntry {
    pub fn new(addresses: Vec<SocketAddr>, source: EntrySource) -> Self {
        Self { error: None, addresses, source }
    }

    /// A negative entry.
    pub fn from_error(error: NetError, source: EntrySource) -> Self {
        Self { error: Some(error), addresses: Vec::new(), source }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    entry: HostCacheEntry,
    /// `None` when `now + ttl` is past what `Instant` can represent.
    expires: Option<Instant>,
}

impl StoredEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires.map_or(true, |expires| now < expires)
    }
}

/// Concurrent host cache.
#[derive(Debug)]
pub struct HostCache {
    entries: DashMap<HostCacheKey, StoredEntry>,
    max_entries: usize,
}

impl Default for HostCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCache {
    /// Default entry limit.
    pub const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self { entries: DashMap::new(), max_entries }
    }

    /// Insert or replace an entry valid for `ttl` from `now`.
    pub fn set(&self, key: HostCacheKey, entry: HostCacheEntry, now: Instant, ttl: Duration) {
        if self.max_entries == 0 {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict(now);
        }
        let expires = now.checked_add(ttl);
        self.entries.insert(key, StoredEntry { entry, expires });
    }

    /// Fresh entry for `key`, if any.
    pub fn lookup(&self, key: &HostCacheKey, now: Instant) -> Option<HostCacheEntry> {
        self.entries
            .get(key)
            .filter(|stored| stored.is_fresh(now))
            .map(|stored| stored.entry.clone())
    }

    /// Drop every entry.
    pub fn invalidate(&self) {
        let count = self.entries.len();
        self.entries.clear();
        tracing::debug!(count, "host cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Remove stale entries; if none were stale, remove the one expiring first.
    fn evict(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.is_fresh(now));
        if self.entries.len() < before {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|e| (e.value().expires.is_none(), e.value().expires))
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> HostCacheEntry {
        HostCacheEntry::new(vec!["93.184.216.34:0".parse().unwrap()], EntrySource::Dns)
    }

    #[test]
    fn test_set_and_lookup() {
        let cache = HostCache::new();
        let now = Instant::now();
        let key = HostCacheKey::new("Example.COM", DnsQueryType::Unspecified);

        cache.set(key.clone(), entry(), now, Duration::from_secs(10));
        assert_eq!(cache.lookup(&key, now), Some(entry()));
        assert_eq!(key.hostname, "example.com");
    }

    #[test]
    fn test_expiry() {
        let cache = HostCache::new();
        let now = Instant::now();
        let key = HostCacheKey::new("example.com", DnsQueryType::A);

        cache.set(key.clone(), entry(), now, Duration::from_secs(10));
        assert!(cache.lookup(&key, now + Duration::from_secs(9)).is_some());
        assert!(cache.lookup(&key, now + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let cache = HostCache::with_max_entries(2);
        let now = Instant::now();
        let forever = HostCacheKey::new("forever.example", DnsQueryType::A);
        let short = HostCacheKey::new("short.example", DnsQueryType::A);

        cache.set(forever.clone(), entry(), now, Duration::MAX);
        cache.set(short.clone(), entry(), now, Duration::from_secs(10));
        assert!(cache.lookup(&forever, now + Duration::from_secs(86_400)).is_some());

        // Full and nothing stale: the bounded entry is evicted first
        let other = HostCacheKey::new("other.example", DnsQueryType::A);
        cache.set(other.clone(), entry(), now, Duration::from_secs(60));
        assert!(cache.lookup(&forever, now).is_some());
        assert!(cache.lookup(&short, now).is_none());
    }

    #[test]
    fn test_secure_keys_are_distinct() {
        let cache = HostCache::new();
        let now = Instant::now();
        let insecure = HostCacheKey::new("example.com", DnsQueryType::A);
        let secure = insecure.clone().secure(true);

        cache.set(secure.clone(), entry(), now, Duration::from_secs(10));
        assert!(cache.lookup(&secure, now).is_some());
        assert!(cache.lookup(&insecure, now).is_none());
    }

    #[test]
    fn test_negative_entry() {
        let cache = HostCache::new();
        let now = Instant::now();
        let key = HostCacheKey::new("nx.example", DnsQueryType::A);
        cache.set(
            key.clone(),
            HostCacheEntry::from_error(NetError::NameNotResolved, EntrySource::Dns),
            now,
            Duration::from_secs(5),
        );
        assert_eq!(cache.lookup(&key, now).unwrap().error, Some(NetError::NameNotResolved));
    }

    #[test]
    fn test_invalidate() {
        let cache = HostCache::new();
        let now = Instant::now();
        let key = HostCacheKey::new("example.com", DnsQueryType::A);
        cache.set(key.clone(), entry(), now, Duration::from_secs(10));

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.lookup(&key, now).is_none());
    }

    #[test]
    fn test_eviction_prefers_expired_then_oldest() {
        let cache = HostCache::with_max_entries(2);
        let now = Instant::now();
        let a = HostCacheKey::new("a.example", DnsQueryType::A);
        let b = HostCacheKey::new("b.example", DnsQueryType::A);
        let c = HostCacheKey::new("c.example", DnsQueryType::A);

        cache.set(a.clone(), entry(), now, Duration::from_secs(1));
        cache.set(b.clone(), entry(), now, Duration::from_secs(100));

        // `a` expired by now
        let later = now + Duration::from_secs(5);
        cache.set(c.clone(), entry(), later, Duration::from_secs(100));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&b, later).is_some());
        assert!(cache.lookup(&c, later).is_some());

        // Nothing expired: the soonest-expiring entry goes
        let d = HostCacheKey::new("d.example", DnsQueryType::A);
        cache.set(d.clone(), entry(), later, Duration::from_secs(200));
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&b, later).is_none());
        assert!(cache.lookup(&d, later).is_some());
    }
}
