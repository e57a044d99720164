//! The persisted spatial store contract.

use async_trait::async_trait;
use geo::Rect;
use mica_database_models::{
    AreaSummary, DateRange, FishnetCount, HexCount, MonthlyCount, OccurrencePage, OccurrenceQuery,
};
use mica_occurrence_models::{Area, Dataset, Species};
use mica_spatial::HexGrid;

use crate::{DbError, Predicate};

/// Read-side access to occurrences, registries and grids.
///
/// Every method that selects occurrences takes a [`Predicate`] and nothing
/// else describing filters, so the map, the statistics and the table can
/// never disagree on which records are in scope. Implementations perform a
/// single round trip per aggregation and hold no per-request state.
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    /// Bounding rectangle of all located occurrences, `None` when there is
    /// nothing to bound.
    async fn estimated_extent(&self) -> Result<Option<Rect<f64>>, DbError>;

    /// Lays `grid` over `extent` and counts the located occurrences matching
    /// `predicate` per hexagon. Empty hexagons are not returned.
    async fn hex_counts(
        &self,
        predicate: &Predicate,
        grid: HexGrid,
        extent: Rect<f64>,
    ) -> Result<Vec<HexCount>, DbError>;

    /// Like [`Self::hex_counts`] over the [`Self::estimated_extent`] of the
    /// data. Nothing to bound yields no hexagons.
    ///
    /// Stores that can resolve the extent inside the counting query should
    /// override this to stay within one round trip.
    async fn hex_counts_estimated(
        &self,
        predicate: &Predicate,
        grid: HexGrid,
    ) -> Result<Vec<HexCount>, DbError> {
        match self.estimated_extent().await? {
            Some(extent) => self.hex_counts(predicate, grid, extent).await,
            None => Ok(Vec::new()),
        }
    }

    /// Counts the occurrences matching `predicate` inside every fishnet
    /// square whose bounding box intersects `extent`, empty squares
    /// included.
    async fn fishnet_counts(
        &self,
        predicate: &Predicate,
        extent: Rect<f64>,
    ) -> Result<Vec<FishnetCount>, DbError>;

    /// One page of matching occurrences.
    async fn list_occurrences(
        &self,
        predicate: &Predicate,
        query: &OccurrenceQuery,
    ) -> Result<OccurrencePage, DbError>;

    /// Number of matching occurrences, located or not.
    async fn count_occurrences(&self, predicate: &Predicate) -> Result<u64, DbError>;

    /// Earliest and latest matching observation dates.
    async fn date_range(&self, predicate: &Predicate) -> Result<DateRange, DbError>;

    /// Matching occurrences per calendar month, chronologically ordered.
    async fn monthly_histogram(&self, predicate: &Predicate)
    -> Result<Vec<MonthlyCount>, DbError>;

    /// All datasets.
    async fn datasets(&self) -> Result<Vec<Dataset>, DbError>;

    /// All species.
    async fn species(&self) -> Result<Vec<Species>, DbError>;

    /// All areas, without geometry.
    async fn areas(&self) -> Result<Vec<AreaSummary>, DbError>;

    /// One area with its geometry.
    async fn area(&self, id: i64) -> Result<Option<Area>, DbError>;
}
