//! Size- and time-bounded cache of encoded tiles.
//!
//! A tile is a pure function of the stored data, so cached payloads stay
//! valid until a dataset they could include is replaced.
//! [`TileCache::invalidate_dataset`] handles that event; the TTL bounds
//! staleness when the event is missed.
//!
//! Tiles computed while an invalidation was in flight are never kept: the
//! caller captures [`TileCache::generation`] before querying the store and
//! hands it back to [`TileCache::insert_if_current`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mica_filter::FilterSet;
use mica_spatial::TileCoord;
use moka::sync::Cache;

use crate::AggregationKind;

/// Identity of a cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub kind: AggregationKind,
    pub filters: FilterSet,
    pub tile: TileCoord,
}

/// In-process tile cache.
pub struct TileCache {
    entries: Option<Cache<TileKey, Arc<[u8]>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("enabled", &self.is_enabled())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl TileCache {
    /// Creates a cache keeping at most `max_entries` payloads for `ttl`
    /// each. A zero TTL or a zero capacity disables caching.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let entries = (!ttl.is_zero() && max_entries > 0).then(|| {
            Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build()
        });
        Self {
            entries,
            generation: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Invalidation counter. Bumped before every dataset invalidation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The payload stored for `key`, if it has not expired.
    #[must_use]
    pub fn get(&self, key: &TileKey) -> Option<Arc<[u8]>> {
        self.entries.as_ref()?.get(key)
    }

    /// Stores `payload` under `key` unconditionally.
    pub fn insert(&self, key: TileKey, payload: Arc<[u8]>) {
        if let Some(entries) = &self.entries {
            entries.insert(key, payload);
        }
    }

    /// Stores `payload` under `key` only if no invalidation started since
    /// `generation` was read. Returns whether the payload was kept.
    pub fn insert_if_current(&self, key: TileKey, payload: Arc<[u8]>, generation: u64) -> bool {
        let Some(entries) = &self.entries else {
            return false;
        };
        if self.generation() != generation {
            log::debug!("not caching {}: invalidated while computing", key.tile);
            return false;
        }
        entries.insert(key.clone(), payload);
        // An invalidation may have scanned the map just before this insert.
        if self.generation() != generation {
            entries.invalidate(&key);
            log::debug!("dropped {}: invalidated while inserting", key.tile);
            return false;
        }
        true
    }

    /// Drops every tile whose filters could include `dataset_id`, including
    /// tiles not filtered by dataset at all. Returns how many were dropped.
    pub fn invalidate_dataset(&self, dataset_id: i64) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let Some(entries) = &self.entries else {
            return 0;
        };
        let mut dropped = 0;
        for (key, _) in entries.iter() {
            if key.filters.may_include_dataset(dataset_id) {
                entries.invalidate(key.as_ref());
                dropped += 1;
            }
        }
        log::info!("Invalidated {dropped} cached tiles for dataset {dataset_id}");
        dropped
    }

    /// Number of live entries after pending evictions are applied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| {
            entries.run_pending_tasks();
            usize::try_from(entries.entry_count()).unwrap_or(usize::MAX)
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(filters: FilterSet) -> TileKey {
        TileKey {
            kind: AggregationKind::Hex,
            filters,
            tile: TileCoord::new(3, 1, 2).unwrap(),
        }
    }

    fn keyed_at(x: u32) -> TileKey {
        TileKey {
            kind: AggregationKind::Fishnet,
            filters: FilterSet::unfiltered(),
            tile: TileCoord::new(6, x, 0).unwrap(),
        }
    }

    fn payload() -> Arc<[u8]> {
        Arc::from(vec![1u8, 2, 3])
    }

    #[test]
    fn returns_stored_payload() {
        let cache = TileCache::new(Duration::from_secs(60), 100);
        cache.insert(key(FilterSet::unfiltered()), payload());
        assert_eq!(
            cache.get(&key(FilterSet::unfiltered())).as_deref(),
            Some(&[1u8, 2, 3][..])
        );
        assert!(cache.get(&key(FilterSet::unfiltered().with_species(1))).is_none());
    }

    #[test]
    fn zero_ttl_or_capacity_disables_caching() {
        for cache in [
            TileCache::disabled(),
            TileCache::new(Duration::ZERO, 100),
            TileCache::new(Duration::from_secs(60), 0),
        ] {
            cache.insert(key(FilterSet::unfiltered()), payload());
            assert!(!cache.is_enabled());
            assert!(cache.is_empty());
            assert!(cache.get(&key(FilterSet::unfiltered())).is_none());
        }
    }

    #[test]
    fn capacity_bounds_the_number_of_entries() {
        let cache = TileCache::new(Duration::from_secs(60), 8);
        for x in 0..64 {
            cache.insert(keyed_at(x), payload());
        }
        assert!(cache.len() <= 8, "cache grew to {}", cache.len());
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = TileCache::new(Duration::from_millis(20), 100);
        cache.insert(key(FilterSet::unfiltered()), payload());
        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get(&key(FilterSet::unfiltered())).is_none());
    }

    #[test]
    fn dataset_replacement_drops_affected_tiles() {
        let cache = TileCache::new(Duration::from_secs(60), 100);
        cache.insert(key(FilterSet::unfiltered()), payload());
        cache.insert(key(FilterSet::unfiltered().with_dataset(1)), payload());
        cache.insert(key(FilterSet::unfiltered().with_dataset(2)), payload());

        assert_eq!(cache.invalidate_dataset(1), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(FilterSet::unfiltered().with_dataset(2))).is_some());
    }

    #[test]
    fn payload_computed_before_an_invalidation_is_not_kept() {
        let cache = TileCache::new(Duration::from_secs(60), 100);
        let seen = cache.generation();
        cache.invalidate_dataset(5);

        assert!(!cache.insert_if_current(key(FilterSet::unfiltered()), payload(), seen));
        assert!(cache.get(&key(FilterSet::unfiltered())).is_none());

        let fresh = cache.generation();
        assert!(cache.insert_if_current(key(FilterSet::unfiltered()), payload(), fresh));
        assert!(cache.get(&key(FilterSet::unfiltered())).is_some());
    }
}
