//! Request-level tile and range computation.

use std::sync::Arc;

use mica_database::{OccurrenceStore, Predicate};
use mica_filter::FilterSet;
use mica_spatial::TileCoord;

use crate::{
    AggregationKind, CountRange, GridExtent, TileCache, TileError, TileKey, aggregate_fishnet,
    aggregate_hex, encode_tile, grid_for_zoom,
};

/// Serves vector tiles and count ranges from a store.
pub struct TileService {
    store: Arc<dyn OccurrenceStore>,
    cache: TileCache,
}

impl std::fmt::Debug for TileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TileService {
    #[must_use]
    pub fn new(store: Arc<dyn OccurrenceStore>, cache: TileCache) -> Self {
        Self { store, cache }
    }

    #[must_use]
    pub fn store(&self) -> &dyn OccurrenceStore {
        self.store.as_ref()
    }

    #[must_use]
    pub const fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// The encoded tile at `tile` for `kind`, restricted to `filters`.
    ///
    /// An empty payload means the tile has no data.
    ///
    /// # Errors
    ///
    /// * [`TileError::UnsupportedZoomLevel`] for hexagon tiles beyond the
    ///   zoom table, raised before the store is queried
    /// * [`TileError::Store`] if the store fails
    /// * [`TileError::Encode`] if encoding fails
    pub async fn tile(
        &self,
        kind: AggregationKind,
        filters: &FilterSet,
        tile: TileCoord,
    ) -> Result<Arc<[u8]>, TileError> {
        let key = TileKey {
            kind,
            filters: filters.clone(),
            tile,
        };
        if let Some(payload) = self.cache.get(&key) {
            log::debug!("tile cache hit: {kind} {tile}");
            return Ok(payload);
        }

        let generation = self.cache.generation();
        let predicate = Predicate::from_filters(filters);
        let extent = GridExtent::Tile(tile);
        let payload = match kind {
            AggregationKind::Hex => {
                let grid = grid_for_zoom(tile.zoom())?;
                let cells = aggregate_hex(self.store(), &predicate, grid, extent).await?;
                encode_tile(cells, tile)?
            }
            AggregationKind::Fishnet => {
                let cells = aggregate_fishnet(self.store(), &predicate, extent).await?;
                encode_tile(cells, tile)?
            }
        };

        let payload: Arc<[u8]> = payload.into();
        self.cache
            .insert_if_current(key, Arc::clone(&payload), generation);
        Ok(payload)
    }

    /// Min/max hexagon count over the whole data extent at `zoom`.
    ///
    /// # Errors
    ///
    /// * [`TileError::UnsupportedZoomLevel`] if `zoom` is not in the table
    /// * [`TileError::Store`] if the store fails
    pub async fn count_range(
        &self,
        filters: &FilterSet,
        zoom: u8,
    ) -> Result<CountRange, TileError> {
        let grid = grid_for_zoom(zoom)?;
        let predicate = Predicate::from_filters(filters);
        let cells = aggregate_hex(self.store(), &predicate, grid, GridExtent::Estimated).await?;
        Ok(CountRange::from_cells(cells))
    }

    /// Handles the "dataset replaced" signal from ingestion.
    pub fn dataset_replaced(&self, dataset_id: i64) -> usize {
        self.cache.invalidate_dataset(dataset_id)
    }
}
