// src/client/cache.rs

use std::time::{Duration, Instant};

use dashmap::DashMap;
use url::Url;

use crate::client::provider::{base_uri, AuthenticationResult};

/// How long a stored result is reused after it was written.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Maximum number of stored results.
pub const DEFAULT_CAPACITY: usize = 10_000;

struct Entry {
    result: AuthenticationResult,
    written: Instant,
}

/// Successful authentication results, reusable for a short while.
///
/// Results are keyed by their base URI. A lookup returns the result stored
/// under the longest URI that covers the requested one, i.e. is equal to it
/// or a parent path of it.
pub struct ResultCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    capacity: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        ResultCache::new()
    }
}

impl ResultCache {
    pub fn new() -> Self {
        ResultCache::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        ResultCache {
            entries: DashMap::new(),
            ttl,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Store `result`, replacing any result for the same URI.
    pub fn store(&self, result: AuthenticationResult) {
        let key = result.uri().as_str().to_owned();
        log::trace!("caching authentication for {}", key);
        self.entries.insert(
            key,
            Entry {
                result,
                written: Instant::now(),
            },
        );
        if self.entries.len() > self.capacity {
            self.evict();
        }
    }

    /// The freshest applicable result for a request to `uri`.
    pub fn lookup(&self, uri: &Url) -> Option<AuthenticationResult> {
        let target = base_uri(uri);
        let target = target.as_str();

        let mut best: Option<(usize, AuthenticationResult)> = None;
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            if self.is_expired(entry.value()) {
                expired.push(entry.key().clone());
                continue;
            }
            let key = entry.key();
            if covers(key, target) && best.as_ref().map_or(true, |(len, _)| key.len() > *len) {
                best = Some((key.len(), entry.value().result.clone()));
            }
        }

        // Removal takes shard write locks; the iterator above must be gone.
        for key in expired {
            self.entries.remove_if(&key, |_, entry| self.is_expired(entry));
        }

        best.map(|(_, result)| result)
    }

    /// Drop the result stored for exactly `uri`. Returns whether one existed.
    pub fn invalidate(&self, uri: &Url) -> bool {
        let removed = self.entries.remove(base_uri(uri).as_str()).is_some();
        if removed {
            log::debug!("invalidated authentication for {}", uri);
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        entry.written.elapsed() >= self.ttl
    }

    fn evict(&self) {
        self.entries.retain(|_, entry| !self.is_expired(entry));

        let excess = self.entries.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.value().written, entry.key().clone()))
            .collect();
        by_age.sort_unstable();
        for (_, key) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("len", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Whether `key` is `target` or one of its parents.
fn covers(key: &str, target: &str) -> bool {
    match target.strip_prefix(key) {
        Some("") => true,
        Some(rest) => key.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn result(uri: &str, value: &'static str) -> AuthenticationResult {
        AuthenticationResult::new(&Url::parse(uri).unwrap(), HeaderValue::from_static(value))
    }

    fn lookup(cache: &ResultCache, uri: &str) -> Option<&'static str> {
        cache
            .lookup(&Url::parse(uri).unwrap())
            .map(|r| match r.header_value().to_str().unwrap() {
                "Negotiate root" => "root",
                "Negotiate api" => "api",
                "Negotiate other" => "other",
                other => panic!("unexpected header {other}"),
            })
    }

    #[test]
    fn test_longest_prefix() {
        let cache = ResultCache::new();
        cache.store(result("https://svc.example.com/", "Negotiate root"));
        cache.store(result("https://svc.example.com/api/v1", "Negotiate api"));

        assert_eq!(lookup(&cache, "https://svc.example.com/api/v1/resource/42"), Some("api"));
        assert_eq!(lookup(&cache, "https://svc.example.com/api/v1?page=3"), Some("api"));
        assert_eq!(lookup(&cache, "https://svc.example.com/api/v10"), Some("root"));
        assert_eq!(lookup(&cache, "https://svc.example.com/other"), Some("root"));
        assert_eq!(lookup(&cache, "https://other.example.com/api/v1"), None);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResultCache::new();
        cache.store(result("https://svc.example.com/api/v1", "Negotiate api"));
        cache.store(result("https://other.example.com/", "Negotiate other"));

        assert!(cache.invalidate(&Url::parse("https://svc.example.com/api/v1").unwrap()));
        assert!(!cache.invalidate(&Url::parse("https://svc.example.com/api/v1").unwrap()));
        assert_eq!(lookup(&cache, "https://svc.example.com/api/v1/x"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(lookup(&cache, "https://other.example.com/"), None);
    }

    #[test]
    fn test_expiry() {
        let cache = ResultCache::with_ttl(Duration::from_millis(20));
        cache.store(result("https://svc.example.com/api/v1", "Negotiate api"));
        assert_eq!(lookup(&cache, "https://svc.example.com/api/v1"), Some("api"));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(lookup(&cache, "https://svc.example.com/api/v1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ResultCache::new().with_capacity(2);
        cache.store(result("https://a.example.com/", "Negotiate root"));
        std::thread::sleep(Duration::from_millis(2));
        cache.store(result("https://b.example.com/", "Negotiate api"));
        std::thread::sleep(Duration::from_millis(2));
        cache.store(result("https://c.example.com/", "Negotiate other"));

        assert_eq!(cache.len(), 2);
        assert_eq!(lookup(&cache, "https://a.example.com/"), None);
        assert_eq!(lookup(&cache, "https://b.example.com/"), Some("api"));
        assert_eq!(lookup(&cache, "https://c.example.com/"), Some("other"));
    }

    #[test]
    fn test_concurrent_store() {
        let cache = std::sync::Arc::new(ResultCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let uri = format!("https://svc.example.com/{i}");
                    cache.store(result(&uri, "Negotiate api"));
                    assert!(cache.lookup(&Url::parse(&uri).unwrap()).is_some());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
