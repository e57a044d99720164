//! Min/max reduction of aggregated counts, for legend scaling.

use mica_database_models::CellCount;
use serde::{Deserialize, Serialize};

/// Smallest and largest count among aggregated cells.
///
/// Both bounds are `None` exactly when there were no cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl CountRange {
    /// Reduces the counts of `cells`.
    #[must_use]
    pub fn from_cells<C: CellCount>(cells: impl IntoIterator<Item = C>) -> Self {
        cells.into_iter().map(|cell| cell.count()).collect()
    }
}

impl FromIterator<u64> for CountRange {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |range, count| Self {
            min: Some(range.min.map_or(count, |min| min.min(count))),
            max: Some(range.max.map_or(count, |max| max.max(count))),
        })
    }
}
