//! Capability environment caching.
//!
//! Building a [`CapabilitySet`] is cheap but not free, and every sandbox
//! with the same module list would build an identical one. This cache hands
//! out one shared `Arc` per distinct module list.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::runtime::environment::CapabilitySet;

/// A thread-safe cache of capability environments, keyed by the sorted,
/// deduplicated allowed-module list.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use restricted_python_sandbox::sandbox::cache::EnvironmentCache;
///
/// let cache = EnvironmentCache::new();
/// let first = cache.get_or_build(["math", "json"]);
/// let second = cache.get_or_build(["json", "math"]);
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug, Default)]
pub struct EnvironmentCache {
    cache: RwLock<HashMap<Vec<String>, Arc<CapabilitySet>>>,
}

fn cache_key<I, S>(modules: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    modules
        .into_iter()
        .map(|m| m.as_ref().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl EnvironmentCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the environment for a module list, building it on first use.
    pub fn get_or_build<I, S>(&self, modules: I) -> Arc<CapabilitySet>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = cache_key(modules);

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(env) = cache.get(&key) {
                return Arc::clone(env);
            }
        }

        // Build outside any lock
        let env = Arc::new(CapabilitySet::build(&key));

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have built the same environment meanwhile
        if let Some(existing) = cache.get(&key) {
            return Arc::clone(existing);
        }
        tracing::debug!(modules = ?key, "caching capability environment");
        cache.insert(key, Arc::clone(&env));
        env
    }

    /// Check if an environment for this module list is cached.
    pub fn contains<I, S>(&self, modules: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = cache_key(modules);
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
    }

    /// Clear all cached environments.
    pub fn clear(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Get the number of cached environments.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL_CACHE: LazyLock<EnvironmentCache> = LazyLock::new(EnvironmentCache::new);

/// The process-wide cache used by sandboxes created with caching enabled
/// (the default).
pub fn global_cache() -> &'static EnvironmentCache {
    &GLOBAL_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_new() {
        let cache = EnvironmentCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_key_ignores_order_and_duplicates() {
        let cache = EnvironmentCache::new();
        let a = cache.get_or_build(["math", "json", "math"]);
        let b = cache.get_or_build(vec!["json".to_string(), "math".to_string()]);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(["json", "math"]));
    }

    #[test]
    fn test_distinct_lists_get_distinct_environments() {
        let cache = EnvironmentCache::new();
        let a = cache.get_or_build(["math"]);
        let b = cache.get_or_build(["math", "random"]);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(b.contains("random"));
        assert!(!a.contains("random"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
