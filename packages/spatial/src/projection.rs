//! Web Mercator (`EPSG:3857`) ⇄ WGS84 (`EPSG:4326`) transforms.
//!
//! Only used at the edges: incoming longitude/latitude values are projected
//! before they meet stored geometries, outgoing geometries are unprojected
//! for display.

use std::f64::consts::PI;

use geo::{Coord, MapCoords, MultiPolygon, Point};

/// WGS84 semi-major axis used by spherical Web Mercator, in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude beyond which Web Mercator is undefined.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Projects a WGS84 longitude/latitude pair to planar meters.
#[must_use]
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    Point::new(x, y)
}

/// Unprojects planar meters to a WGS84 `(longitude, latitude)` pair.
#[must_use]
pub fn mercator_to_lonlat(point: Point<f64>) -> (f64, f64) {
    let lon = (point.x() / EARTH_RADIUS).to_degrees();
    let lat = 2.0f64
        .mul_add((point.y() / EARTH_RADIUS).exp().atan(), -PI / 2.0)
        .to_degrees();
    (lon, lat)
}

/// Unprojects every vertex of a planar multipolygon to WGS84.
#[must_use]
pub fn multipolygon_to_wgs84(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    mp.map_coords(|c| {
        let (x, y) = mercator_to_lonlat(Point::from(c));
        Coord { x, y }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-7;

    #[test]
    fn origin_maps_to_origin() {
        let p = lonlat_to_mercator(0.0, 0.0);
        assert!(p.x().abs() < EPS);
        assert!(p.y().abs() < EPS);
    }

    #[test]
    fn round_trips_brussels() {
        let p = lonlat_to_mercator(4.3517, 50.8503);
        assert!((p.x() - 484_434.0).abs() < 10.0);
        let (lon, lat) = mercator_to_lonlat(p);
        assert!((lon - 4.3517).abs() < EPS);
        assert!((lat - 50.8503).abs() < EPS);
    }

    #[test]
    fn clamps_polar_latitudes() {
        let p = lonlat_to_mercator(0.0, 90.0);
        assert!(p.y().is_finite());
    }
}
