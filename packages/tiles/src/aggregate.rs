//! Hexagon and fishnet aggregation over a store.

use geo::Rect;
use mica_database::{OccurrenceStore, Predicate};
use mica_database_models::{FishnetCount, HexCount};
use mica_spatial::{HexGrid, TileCoord};

use crate::TileError;

/// Area an aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridExtent {
    /// The estimated bounding box of all located occurrences.
    Estimated,
    /// The envelope of one tile.
    Tile(TileCoord),
}

impl GridExtent {
    /// Resolves the extent to a planar rectangle, `None` when the store has
    /// nothing to bound.
    async fn resolve(self, store: &dyn OccurrenceStore) -> Result<Option<Rect<f64>>, TileError> {
        match self {
            Self::Estimated => Ok(store.estimated_extent().await?),
            Self::Tile(tile) => Ok(Some(tile.envelope())),
        }
    }
}

/// Aggregated cells, consumed once.
///
/// Ordering carries no meaning.
#[derive(Debug)]
pub struct Cells<C> {
    inner: std::vec::IntoIter<C>,
}

impl<C> Cells<C> {
    fn empty() -> Self {
        Self {
            inner: Vec::new().into_iter(),
        }
    }
}

impl<C> From<Vec<C>> for Cells<C> {
    fn from(cells: Vec<C>) -> Self {
        Self {
            inner: cells.into_iter(),
        }
    }
}

impl<C> Iterator for Cells<C> {
    type Item = C;

    fn next(&mut self) -> Option<C> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<C> ExactSizeIterator for Cells<C> {}

/// Counts the occurrences matching `predicate` per hexagon of `grid` over
/// `extent`. Empty hexagons are dropped.
///
/// An [`GridExtent::Estimated`] extent is resolved by the store within the
/// counting query.
///
/// # Errors
///
/// Returns [`TileError::Store`] if the store fails.
pub async fn aggregate_hex(
    store: &dyn OccurrenceStore,
    predicate: &Predicate,
    grid: HexGrid,
    extent: GridExtent,
) -> Result<Cells<HexCount>, TileError> {
    let cells = match extent {
        GridExtent::Estimated => store.hex_counts_estimated(predicate, grid).await?,
        GridExtent::Tile(tile) => store.hex_counts(predicate, grid, tile.envelope()).await?,
    };
    log::debug!(
        "aggregate_hex: size={} extent={extent:?} cells={}",
        grid.size(),
        cells.len()
    );
    Ok(cells.into())
}

/// Counts the occurrences matching `predicate` in every fishnet square
/// reaching into `extent`, empty squares included.
///
/// # Errors
///
/// Returns [`TileError::Store`] if the store fails.
pub async fn aggregate_fishnet(
    store: &dyn OccurrenceStore,
    predicate: &Predicate,
    extent: GridExtent,
) -> Result<Cells<FishnetCount>, TileError> {
    let Some(rect) = extent.resolve(store).await? else {
        return Ok(Cells::empty());
    };

    let cells = store.fishnet_counts(predicate, rect).await?;
    log::debug!(
        "aggregate_fishnet: extent={extent:?} cells={}",
        cells.len()
    );
    Ok(cells.into())
}
