#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Planar geometry primitives shared by the stores and the tile encoder.
//!
//! Everything here works in Web Mercator meters (`EPSG:3857`), the single
//! planar reference all stored geometries use. [`projection`] converts to
//! and from WGS84 for the API edges only.

pub mod hex;
pub mod projection;
pub mod tile;

pub use hex::{HexCell, HexGrid};
pub use tile::{InvalidTileCoordinate, TileCoord};

use geo::{BoundingRect, MultiPolygon, Rect};
use geojson::GeoJson;
use rstar::AABB;

/// Parse a `GeoJSON` geometry string into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
#[must_use]
pub fn parse_geojson_to_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    if let GeoJson::Geometry(geom) = geojson {
        let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
        match geo_geom {
            geo::Geometry::MultiPolygon(mp) => Some(mp),
            geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
            other => {
                log::debug!("Expected a polygonal geometry, got {other:?}");
                None
            }
        }
    } else {
        None
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
#[must_use]
pub fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

/// Converts a [`Rect`] into an R-tree query envelope.
#[must_use]
pub fn rect_to_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Grows a rectangle by `margin` on every side.
#[must_use]
pub fn expand_rect(rect: &Rect<f64>, margin: f64) -> Rect<f64> {
    Rect::new(
        (rect.min().x - margin, rect.min().y - margin),
        (rect.max().x + margin, rect.max().y + margin),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polygon_geojson() {
        let mp = parse_geojson_to_multipolygon(
            r#"{"type":"Polygon","coordinates":[[[0,0],[10,0],[10,10],[0,10],[0,0]]]}"#,
        )
        .unwrap();
        assert_eq!(mp.0.len(), 1);

        let env = compute_envelope(&mp);
        assert_eq!(env.lower(), [0.0, 0.0]);
        assert_eq!(env.upper(), [10.0, 10.0]);
    }

    #[test]
    fn rejects_non_polygon_geojson() {
        assert!(parse_geojson_to_multipolygon(r#"{"type":"Point","coordinates":[1,2]}"#).is_none());
        assert!(parse_geojson_to_multipolygon("not json").is_none());
    }

    #[test]
    fn expands_rect_on_all_sides() {
        let rect = expand_rect(&Rect::new((0.0, 0.0), (1.0, 2.0)), 5.0);
        assert!((rect.min().x - -5.0).abs() < f64::EPSILON);
        assert!((rect.max().y - 7.0).abs() < f64::EPSILON);
    }
}
