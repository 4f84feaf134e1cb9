use moka::sync::Cache;

use crate::model::ServiceRecord;
use crate::storage::{CatalogStore, StorageResult};

/// Read-through cache of service code → service record.
///
/// Entries never expire on their own; the catalog is static after seeding,
/// so staleness is bounded by explicit [`ServiceCatalogCache::invalidate`]
/// calls (or a [`CacheInvalidator`] handed to provisioning code). Lookups
/// return owned clones, never references into the cache.
#[derive(Debug, Clone)]
pub struct ServiceCatalogCache {
    entries: Cache<String, ServiceRecord>,
}

impl ServiceCatalogCache {
    pub const DEFAULT_CAPACITY: u64 = 1_024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity.max(1)).build(),
        }
    }

    /// Cached record, if any, without touching the store.
    pub fn get(&self, code: &str) -> Option<ServiceRecord> {
        self.entries.get(code)
    }

    /// Returns the record for `code`, loading it from `store` on a miss.
    /// Unknown codes are not remembered.
    pub async fn get_or_load<S>(&self, store: &S, code: &str) -> StorageResult<Option<ServiceRecord>>
    where
        S: CatalogStore + ?Sized,
    {
        if let Some(hit) = self.entries.get(code) {
            return Ok(Some(hit));
        }

        let loaded = store.find_service(code).await?;
        if let Some(record) = &loaded {
            self.entries.insert(code.to_owned(), record.clone());
        }
        Ok(loaded)
    }

    pub fn invalidate(&self) {
        self.entries.invalidate_all();
    }

    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            entries: self.entries.clone(),
        }
    }
}

impl Default for ServiceCatalogCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached handle that clears a [`ServiceCatalogCache`] it was taken from.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    entries: Cache<String, ServiceRecord>,
}

impl CacheInvalidator {
    pub fn invalidate(&self) {
        self.entries.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CountryRecord, NewCountry, NewService};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingCatalog {
        lookups: AtomicUsize,
        name: Mutex<String>,
    }

    #[async_trait]
    impl CatalogStore for CountingCatalog {
        async fn insert_country(&self, _country: NewCountry) -> StorageResult<bool> {
            Ok(false)
        }

        async fn insert_service(&self, _service: NewService) -> StorageResult<bool> {
            Ok(false)
        }

        async fn find_service(&self, code: &str) -> StorageResult<Option<ServiceRecord>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if code != "tg" {
                return Ok(None);
            }
            Ok(Some(ServiceRecord {
                id: 4,
                code: code.to_owned(),
                name: self.name.lock().unwrap().clone(),
            }))
        }

        async fn list_services(&self) -> StorageResult<Vec<ServiceRecord>> {
            Ok(Vec::new())
        }

        async fn list_countries(&self) -> StorageResult<Vec<CountryRecord>> {
            Ok(Vec::new())
        }
    }

    fn catalog(name: &str) -> CountingCatalog {
        CountingCatalog {
            lookups: AtomicUsize::new(0),
            name: Mutex::new(name.to_owned()),
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let store = catalog("Telegram");
        let cache = ServiceCatalogCache::new();

        let first = cache.get_or_load(&store, "tg").await.unwrap().unwrap();
        let second = cache.get_or_load(&store, "tg").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hits_are_copies() {
        let store = catalog("Telegram");
        let cache = ServiceCatalogCache::new();

        let mut copy = cache.get_or_load(&store, "tg").await.unwrap().unwrap();
        copy.name.push_str(" (edited)");

        assert_eq!(cache.get("tg").unwrap().name, "Telegram");
    }

    #[tokio::test]
    async fn misses_are_not_remembered() {
        let store = catalog("Telegram");
        let cache = ServiceCatalogCache::new();

        assert!(cache.get_or_load(&store, "xx").await.unwrap().is_none());
        assert!(cache.get_or_load(&store, "xx").await.unwrap().is_none());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_forces_reload() {
        let store = catalog("Telegram");
        let cache = ServiceCatalogCache::new();
        let invalidator = cache.invalidator();

        cache.get_or_load(&store, "tg").await.unwrap();
        *store.name.lock().unwrap() = "Telegram Messenger".to_owned();
        assert_eq!(
            cache.get_or_load(&store, "tg").await.unwrap().unwrap().name,
            "Telegram"
        );

        invalidator.invalidate();
        assert_eq!(
            cache.get_or_load(&store, "tg").await.unwrap().unwrap().name,
            "Telegram Messenger"
        );
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
