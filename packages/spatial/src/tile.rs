//! Tile addressing (`zoom/x/y`, XYZ scheme) and tile envelopes.

use geo::Rect;

/// Half the width of the Web Mercator world square, in meters.
pub const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Highest zoom level a tile address may carry.
pub const MAX_TILE_ZOOM: u8 = 24;

/// Error returned when a tile address does not exist at its zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTileCoordinate {
    /// Requested zoom level.
    pub zoom: u8,
    /// Requested column.
    pub x: u32,
    /// Requested row.
    pub y: u32,
}

impl std::fmt::Display for InvalidTileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tile {}/{}/{}: x and y must be below 2^zoom (zoom at most {MAX_TILE_ZOOM})",
            self.zoom, self.x, self.y
        )
    }
}

impl std::error::Error for InvalidTileCoordinate {}

/// A validated tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    zoom: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Creates a tile address, checking that it exists at `zoom`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTileCoordinate`] if `zoom` exceeds
    /// [`MAX_TILE_ZOOM`] or `x`/`y` fall outside the `2^zoom` tile range.
    pub const fn new(zoom: u8, x: u32, y: u32) -> Result<Self, InvalidTileCoordinate> {
        if zoom > MAX_TILE_ZOOM {
            return Err(InvalidTileCoordinate { zoom, x, y });
        }
        let tiles = 1u64 << zoom;
        if (x as u64) >= tiles || (y as u64) >= tiles {
            return Err(InvalidTileCoordinate { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    #[must_use]
    pub const fn zoom(&self) -> u8 {
        self.zoom
    }

    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }

    /// Planar envelope of this tile in Web Mercator meters.
    ///
    /// Row 0 is the northernmost row.
    #[must_use]
    pub fn envelope(&self) -> Rect<f64> {
        let size = tile_size_meters(self.zoom);
        let min_x = f64::from(self.x).mul_add(size, -WEB_MERCATOR_HALF_EXTENT);
        let max_y = f64::from(self.y).mul_add(-size, WEB_MERCATOR_HALF_EXTENT);
        Rect::new((min_x, max_y - size), (min_x + size, max_y))
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Edge length of one tile at `zoom`, in meters.
#[must_use]
pub fn tile_size_meters(zoom: u8) -> f64 {
    2.0 * WEB_MERCATOR_HALF_EXTENT / f64::from(1u32 << zoom.min(31))
}
