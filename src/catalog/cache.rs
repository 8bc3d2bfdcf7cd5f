//! Metadata cache port
//!
//! Catalog snapshots are expensive to load and cheap to share. The engine itself never
//! caches; callers put a [`MetadataCache`] in front of whatever loads snapshots.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::catalog::CatalogSnapshot;
use crate::error::Result;

/// Get/insert/evict store for catalog snapshots keyed by catalog id
pub trait MetadataCache: Send + Sync {
    fn get(&self, catalog_id: &str) -> Option<Arc<CatalogSnapshot>>;

    fn insert(&self, catalog_id: &str, snapshot: Arc<CatalogSnapshot>);

    /// Drop a cached snapshot; returns whether one was present
    fn evict(&self, catalog_id: &str) -> bool;
}

/// Return the cached snapshot for `catalog_id`, loading and caching it on a miss
///
/// Concurrent misses may each run `load`; the last insert wins, which is harmless
/// because snapshots for one catalog id are interchangeable.
pub async fn get_or_load<C, F, Fut>(
    cache: &C,
    catalog_id: &str,
    load: F,
) -> Result<Arc<CatalogSnapshot>>
where
    C: MetadataCache + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CatalogSnapshot>>,
{
    if let Some(snapshot) = cache.get(catalog_id) {
        return Ok(snapshot);
    }

    debug!(catalog_id, "metadata cache miss");
    let snapshot = Arc::new(load().await?);
    cache.insert(catalog_id, Arc::clone(&snapshot));
    Ok(snapshot)
}

/// Process-local cache backed by a `RwLock<HashMap>`
#[derive(Debug, Default)]
pub struct InMemoryMetadataCache {
    entries: RwLock<HashMap<String, Arc<CatalogSnapshot>>>,
}

impl InMemoryMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached snapshot
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataCache for InMemoryMetadataCache {
    fn get(&self, catalog_id: &str) -> Option<Arc<CatalogSnapshot>> {
        self.entries.read().ok()?.get(catalog_id).cloned()
    }

    fn insert(&self, catalog_id: &str, snapshot: Arc<CatalogSnapshot>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(catalog_id.to_string(), snapshot);
        }
    }

    fn evict(&self, catalog_id: &str) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(catalog_id).is_some())
            .unwrap_or(false)
    }
}
