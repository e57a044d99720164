//! Mapbox vector tile encoding of aggregated cells.
//!
//! Cell outlines are projected from Web Mercator meters into the tile's
//! local `0..4096` grid, clipped to the tile plus a buffer
//! (Sutherland-Hodgman), snapped to integers and wound the way the format
//! requires: exterior rings with a positive surveyor's-formula area in
//! tile coordinates (y pointing down), holes negative.

use geo::{LineString, Polygon, Rect};
use mica_database_models::CellCount;
use mica_spatial::TileCoord;
use mvt::{GeomEncoder, GeomType, Tile};

use crate::TileError;

/// Name of the single layer every tile carries.
pub const LAYER_NAME: &str = "default";

/// Tile-local coordinate range.
pub const TILE_EXTENT: u32 = 4096;

/// Clip margin around the tile, in tile-local units.
pub const TILE_BUFFER: f64 = 256.0;

/// Feature property carrying the occurrence count.
pub const COUNT_PROPERTY: &str = "count";

type TilePoint = (f64, f64);

/// Maps planar coordinates into tile-local space for one tile.
#[derive(Debug, Clone, Copy)]
struct TileProjection {
    envelope: Rect<f64>,
    extent: f64,
}

impl TileProjection {
    fn new(tile: TileCoord) -> Self {
        Self {
            envelope: tile.envelope(),
            extent: f64::from(TILE_EXTENT),
        }
    }

    fn project(&self, x: f64, y: f64) -> TilePoint {
        let min = self.envelope.min();
        let max = self.envelope.max();
        (
            (x - min.x) / (max.x - min.x) * self.extent,
            (max.y - y) / (max.y - min.y) * self.extent,
        )
    }

    /// Projects, clips, snaps and winds one ring. `None` if nothing usable
    /// remains.
    fn ring(&self, ring: &LineString<f64>, is_hole: bool) -> Option<Vec<TilePoint>> {
        let projected: Vec<TilePoint> = ring
            .coords()
            .filter(|c| c.x.is_finite() && c.y.is_finite())
            .map(|c| self.project(c.x, c.y))
            .collect();

        let clipped = clip_ring_to_tile(&projected, self.extent, TILE_BUFFER);
        let snapped = clean_ring(
            clipped
                .into_iter()
                .map(|(x, y)| (x.round(), y.round()))
                .collect(),
        );

        if snapped.len() < 3 || ring_signed_area(&snapped) == 0.0 {
            return None;
        }

        Some(ensure_winding_order(snapped, is_hole))
    }

    /// Adds `polygon` to `encoder`. Returns whether its exterior survived.
    fn polygon(
        &self,
        mut encoder: GeomEncoder<f64>,
        polygon: &Polygon<f64>,
    ) -> Result<(GeomEncoder<f64>, bool), TileError> {
        let Some(exterior) = self.ring(polygon.exterior(), false) else {
            return Ok((encoder, false));
        };

        encoder = push_ring(encoder, &exterior)?;
        for interior in polygon.interiors() {
            if let Some(hole) = self.ring(interior, true) {
                encoder = push_ring(encoder, &hole)?;
            }
        }

        Ok((encoder, true))
    }
}

fn push_ring(
    mut encoder: GeomEncoder<f64>,
    ring: &[TilePoint],
) -> Result<GeomEncoder<f64>, TileError> {
    for &(x, y) in ring {
        encoder = encoder.point(x, y)?;
    }
    Ok(encoder.complete()?)
}

/// Encodes `cells` as one layer of the tile at `tile`.
///
/// Every cell becomes one polygon feature with a [`COUNT_PROPERTY`]
/// property and, if the cell carries one, its extra attribute. Cells lying
/// entirely outside the buffered tile are dropped. When no feature remains
/// the payload is empty, which means "no data here" and is not an error.
///
/// # Errors
///
/// Returns [`TileError::Encode`] if the vector tile library rejects a
/// geometry.
pub fn encode_tile<C: CellCount>(
    cells: impl IntoIterator<Item = C>,
    tile: TileCoord,
) -> Result<Vec<u8>, TileError> {
    let projection = TileProjection::new(tile);
    let mut mvt_tile = Tile::new(TILE_EXTENT);
    let mut layer = mvt_tile.create_layer(LAYER_NAME);
    let mut features = 0usize;

    for cell in cells {
        let mut encoder = GeomEncoder::new(GeomType::Polygon);
        let mut has_ring = false;

        for polygon in cell.geometry() {
            let (next, kept) = projection.polygon(encoder, polygon)?;
            encoder = next;
            has_ring |= kept;
        }

        if !has_ring {
            continue;
        }

        let mut feature = layer.into_feature(encoder.encode()?);
        feature.add_tag_uint(COUNT_PROPERTY, cell.count());
        if let Some((name, value)) = cell.attribute() {
            feature.add_tag_double(name, value);
        }
        layer = feature.into_layer();
        features += 1;
    }

    if features == 0 {
        log::debug!("encode_tile: {tile} has no features");
        return Ok(Vec::new());
    }

    mvt_tile.add_layer(layer)?;
    let bytes = mvt_tile.to_bytes()?;
    log::debug!(
        "encode_tile: {tile} features={features} bytes={}",
        bytes.len()
    );
    Ok(bytes)
}

/// Clips a ring to `[-buffer, extent + buffer]` on both axes.
fn clip_ring_to_tile(ring: &[TilePoint], extent: f64, buffer: f64) -> Vec<TilePoint> {
    if ring.is_empty() {
        return Vec::new();
    }

    let min_bound = -buffer;
    let max_bound = extent + buffer;

    let mut output = ring.to_vec();

    output = clip_against_edge(
        &output,
        |p| p.0 >= min_bound,
        |p1, p2| {
            let t = (min_bound - p1.0) / (p2.0 - p1.0);
            (min_bound, t.mul_add(p2.1 - p1.1, p1.1))
        },
    );
    output = clip_against_edge(
        &output,
        |p| p.0 <= max_bound,
        |p1, p2| {
            let t = (max_bound - p1.0) / (p2.0 - p1.0);
            (max_bound, t.mul_add(p2.1 - p1.1, p1.1))
        },
    );
    output = clip_against_edge(
        &output,
        |p| p.1 >= min_bound,
        |p1, p2| {
            let t = (min_bound - p1.1) / (p2.1 - p1.1);
            (t.mul_add(p2.0 - p1.0, p1.0), min_bound)
        },
    );
    clip_against_edge(
        &output,
        |p| p.1 <= max_bound,
        |p1, p2| {
            let t = (max_bound - p1.1) / (p2.1 - p1.1);
            (t.mul_add(p2.0 - p1.0, p1.0), max_bound)
        },
    )
}

fn clip_against_edge<F, I>(polygon: &[TilePoint], inside: F, intersect: I) -> Vec<TilePoint>
where
    F: Fn(&TilePoint) -> bool,
    I: Fn(&TilePoint, &TilePoint) -> TilePoint,
{
    let n = polygon.len();
    let mut output = Vec::with_capacity(n + 4);

    for i in 0..n {
        let current = &polygon[i];
        let next = &polygon[(i + 1) % n];

        match (inside(current), inside(next)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(intersect(current, next)),
            (false, true) => {
                output.push(intersect(current, next));
                output.push(*next);
            }
            (false, false) => {}
        }
    }

    output
}

/// Surveyor's formula. Positive for clockwise rings in y-down space.
fn ring_signed_area(ring: &[TilePoint]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.0.mul_add(b.1, -(b.0 * a.1))
        })
        .sum::<f64>()
        / 2.0
}

/// Drops consecutive duplicates and the closing point.
fn clean_ring(ring: Vec<TilePoint>) -> Vec<TilePoint> {
    let mut cleaned: Vec<TilePoint> = Vec::with_capacity(ring.len());
    for point in ring {
        if cleaned.last() != Some(&point) {
            cleaned.push(point);
        }
    }
    if cleaned.len() > 1 && cleaned.first() == cleaned.last() {
        cleaned.pop();
    }
    if cleaned.len() < 3 {
        return Vec::new();
    }
    cleaned
}

fn ensure_winding_order(ring: Vec<TilePoint>, is_hole: bool) -> Vec<TilePoint> {
    let is_clockwise = ring_signed_area(&ring) > 0.0;
    if is_clockwise == is_hole {
        ring.into_iter().rev().collect()
    } else {
        ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_keeps_inner_ring_untouched() {
        let ring = vec![(10.0, 10.0), (100.0, 10.0), (100.0, 100.0), (10.0, 100.0)];
        let clipped = clip_ring_to_tile(&ring, 4096.0, 256.0);
        assert_eq!(clipped.len(), 4);
        assert!(ring.iter().all(|p| clipped.contains(p)));
    }

    #[test]
    fn clip_interpolates_on_the_buffer_edge() {
        let ring = vec![(-1000.0, 0.0), (1000.0, 0.0), (1000.0, 100.0), (-1000.0, 100.0)];
        let clipped = clip_ring_to_tile(&ring, 4096.0, 256.0);
        assert!(clipped.iter().all(|p| p.0 >= -256.0));
        assert!(clipped.contains(&(-256.0, 0.0)));
        assert!(clipped.contains(&(-256.0, 100.0)));
    }

    #[test]
    fn ring_fully_outside_is_dropped() {
        let ring = vec![(5000.0, 5000.0), (6000.0, 5000.0), (6000.0, 6000.0)];
        assert!(clip_ring_to_tile(&ring, 4096.0, 256.0).is_empty());
    }

    #[test]
    fn clean_ring_removes_duplicates_and_closing_point() {
        let ring = vec![(0.0, 0.0), (0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 0.0)];
        assert_eq!(clean_ring(ring), vec![(0.0, 0.0), (5.0, 0.0), (5.0, 5.0)]);
        assert!(clean_ring(vec![(1.0, 1.0), (1.0, 1.0), (2.0, 2.0)]).is_empty());
    }

    #[test]
    fn exterior_rings_are_clockwise_in_tile_space() {
        let counter_clockwise = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        assert!(ring_signed_area(&counter_clockwise) < 0.0);

        let exterior = ensure_winding_order(counter_clockwise.clone(), false);
        assert!(ring_signed_area(&exterior) > 0.0);

        let hole = ensure_winding_order(counter_clockwise, true);
        assert!(ring_signed_area(&hole) < 0.0);
    }

    #[test]
    fn projects_tile_corners() {
        let tile = TileCoord::new(1, 1, 0).unwrap();
        let projection = TileProjection::new(tile);
        let env = tile.envelope();

        let (x, y) = projection.project(env.min().x, env.max().y);
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);

        let (x, y) = projection.project(env.max().x, env.min().y);
        assert!((x - 4096.0).abs() < 1e-6 && (y - 4096.0).abs() < 1e-6);
    }
}
