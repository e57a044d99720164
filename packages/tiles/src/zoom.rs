//! Zoom level to hexagon size lookup.

use mica_spatial::HexGrid;

use crate::TileError;

/// Hexagon edge length in meters, indexed by zoom level.
///
/// Sizes halve at every zoom step so that the number of hexagons per
/// viewport stays roughly constant.
const CELL_SIZE_BY_ZOOM: [f64; 17] = [
    1_280_000.0,
    640_000.0,
    320_000.0,
    160_000.0,
    80_000.0,
    40_000.0,
    20_000.0,
    10_000.0,
    5_000.0,
    2_500.0,
    1_350.0,
    670.0,
    320.0,
    160.0,
    80.0,
    40.0,
    20.0,
];

/// Highest zoom level with a configured hexagon size.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_AGGREGATION_ZOOM: u8 = (CELL_SIZE_BY_ZOOM.len() - 1) as u8;

/// Hexagon edge length used at `zoom`.
///
/// # Errors
///
/// Returns [`TileError::UnsupportedZoomLevel`] for zoom levels outside the
/// table. Sizes are never interpolated or extrapolated.
pub fn cell_size_for_zoom(zoom: u8) -> Result<f64, TileError> {
    CELL_SIZE_BY_ZOOM
        .get(usize::from(zoom))
        .copied()
        .ok_or(TileError::UnsupportedZoomLevel(zoom))
}

/// Hexagon grid used at `zoom`.
///
/// # Errors
///
/// Returns [`TileError::UnsupportedZoomLevel`] for zoom levels outside the
/// table.
pub fn grid_for_zoom(zoom: u8) -> Result<HexGrid, TileError> {
    let size = cell_size_for_zoom(zoom)?;
    HexGrid::new(size).ok_or(TileError::UnsupportedZoomLevel(zoom))
}
