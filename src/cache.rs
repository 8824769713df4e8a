//! Namespaced key-value persistence contract.
//!
//! The engine and backend never touch storage directly; everything goes
//! through this five-method contract so a durable store (an embedded database,
//! say) is a drop-in replacement for the memory-backed reference
//! implementation.

use std::collections::HashMap;
use std::fmt::Debug;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// Namespaces scope all keys; an empty namespace fails fast rather than
    /// silently sharing a default bucket.
    #[error("Namespace must not be empty")]
    EmptyNamespace,
}

/// Namespace-scoped key-value store. Values are serialized byte sequences;
/// callers serialize structured records before storing.
///
/// A namespace is created lazily on the first write and lives for the life of
/// the cache instance.
pub trait PersistCache: Send + Debug {
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn set(&mut self, ns: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError>;
    fn has(&self, ns: &str, key: &str) -> Result<bool, CacheError>;
    fn remove(&mut self, ns: &str, key: &str) -> Result<(), CacheError>;
    fn keys(&self, ns: &str) -> Result<Vec<String>, CacheError>;
}

#[derive(Debug, Default)]
/// Memory-backed reference implementation; process-lifetime only.
pub struct MemoryCache {
    namespaces: HashMap<String, HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_ns(ns: &str) -> Result<(), CacheError> {
    if ns.is_empty() {
        return Err(CacheError::EmptyNamespace);
    }

    Ok(())
}

impl PersistCache for MemoryCache {
    fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        check_ns(ns)?;

        Ok(self
            .namespaces
            .get(ns)
            .and_then(|bucket| bucket.get(key))
            .cloned())
    }

    fn set(&mut self, ns: &str, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        check_ns(ns)?;

        self.namespaces
            .entry(ns.to_string())
            .or_default()
            .insert(key.to_string(), value);

        Ok(())
    }

    fn has(&self, ns: &str, key: &str) -> Result<bool, CacheError> {
        check_ns(ns)?;

        Ok(self
            .namespaces
            .get(ns)
            .map(|bucket| bucket.contains_key(key))
            .unwrap_or(false))
    }

    fn remove(&mut self, ns: &str, key: &str) -> Result<(), CacheError> {
        check_ns(ns)?;

        if let Some(bucket) = self.namespaces.get_mut(ns) {
            bucket.remove(key);
        }

        Ok(())
    }

    fn keys(&self, ns: &str) -> Result<Vec<String>, CacheError> {
        check_ns(ns)?;

        Ok(self
            .namespaces
            .get(ns)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_get_has_remove_keys() {
        let mut cache = MemoryCache::new();

        cache.set("peers", "a", b"one".to_vec()).unwrap();
        cache.set("peers", "b", b"two".to_vec()).unwrap();

        assert_eq!(cache.get("peers", "a").unwrap(), Some(b"one".to_vec()));
        assert!(cache.has("peers", "b").unwrap());
        assert!(!cache.has("peers", "c").unwrap());

        let mut keys = cache.keys("peers").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        cache.remove("peers", "a").unwrap();
        assert_eq!(cache.get("peers", "a").unwrap(), None);
        // Removing a missing key is fine.
        cache.remove("peers", "a").unwrap();
    }

    #[test]
    fn namespaces_are_isolated() {
        let mut cache = MemoryCache::new();

        cache.set("peers", "k", b"p".to_vec()).unwrap();
        cache.set("data", "k", b"d".to_vec()).unwrap();

        assert_eq!(cache.get("peers", "k").unwrap(), Some(b"p".to_vec()));
        assert_eq!(cache.get("data", "k").unwrap(), Some(b"d".to_vec()));
    }

    #[test]
    fn empty_namespace_fails_fast() {
        let mut cache = MemoryCache::new();

        assert!(matches!(
            cache.set("", "k", vec![]),
            Err(CacheError::EmptyNamespace)
        ));
        assert!(matches!(
            cache.get("", "k"),
            Err(CacheError::EmptyNamespace)
        ));
        assert!(matches!(cache.keys(""), Err(CacheError::EmptyNamespace)));
    }

    #[test]
    fn reads_from_unwritten_namespace_are_empty() {
        let cache = MemoryCache::new();

        assert_eq!(cache.get("never", "k").unwrap(), None);
        assert!(!cache.has("never", "k").unwrap());
        assert!(cache.keys("never").unwrap().is_empty());
    }
}
