//! Hexagonal grid anchored at the planar origin.
//!
//! Hexagons are flat-topped with an edge length of `size` meters. Column
//! `i` is centred at `x = 1.5·size·i`; row `j` of that column is centred at
//! `y = √3·size·(j + ½·(i mod 2))`. Placement depends only on `size`, never
//! on the data, so the same point always falls in the same cell.

use geo::{Coord, Intersects, LineString, Point, Polygon, Rect};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Address of one hexagon in the grid (offset coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexCell {
    /// Column index, negative west of the origin.
    pub col: i64,
    /// Row index within the column, negative south of the origin.
    pub row: i64,
}

/// A hexagon tiling with a fixed edge length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexGrid {
    size: f64,
}

impl HexGrid {
    /// Creates a grid of hexagons with `size`-meter edges.
    ///
    /// Returns `None` if `size` is not a finite positive number.
    #[must_use]
    pub fn new(size: f64) -> Option<Self> {
        (size.is_finite() && size > 0.0).then_some(Self { size })
    }

    /// Edge length (and circumradius) in meters.
    #[must_use]
    pub const fn size(&self) -> f64 {
        self.size
    }

    /// Centre of `cell`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self, cell: HexCell) -> Coord<f64> {
        let parity = cell.col.rem_euclid(2) as f64;
        Coord {
            x: 1.5 * self.size * cell.col as f64,
            y: SQRT_3 * self.size * 0.5f64.mul_add(parity, cell.row as f64),
        }
    }

    /// The hexagon containing `point`.
    ///
    /// Every point maps to exactly one cell; points on a shared edge go to
    /// the cell picked by cube rounding, deterministically.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn cell_at(&self, point: Point<f64>) -> HexCell {
        // Axial coordinates of a flat-topped layout.
        let q = (2.0 / 3.0) * point.x() / self.size;
        let r = (SQRT_3 / 3.0).mul_add(point.y(), -point.x() / 3.0) / self.size;
        let (q, r) = cube_round(q, r);

        HexCell {
            col: q,
            row: r + q.div_euclid(2),
        }
    }

    /// Closed outline of `cell`, counter-clockwise, starting east.
    #[must_use]
    pub fn polygon(&self, cell: HexCell) -> Polygon<f64> {
        let center = self.center(cell);
        let ring: Vec<Coord<f64>> = (0..=6)
            .map(|k| {
                let angle = f64::from(k % 6) * std::f64::consts::FRAC_PI_3;
                Coord {
                    x: self.size.mul_add(angle.cos(), center.x),
                    y: self.size.mul_add(angle.sin(), center.y),
                }
            })
            .collect();
        Polygon::new(LineString::from(ring), vec![])
    }

    /// Whether the hexagon of `cell` touches `extent`.
    #[must_use]
    pub fn intersects(&self, cell: HexCell, extent: &Rect<f64>) -> bool {
        self.polygon(cell).intersects(extent)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cube_round(q: f64, r: f64) -> (i64, i64) {
    let s = -q - r;
    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());

    let dq = (rq - q).abs();
    let dr = (rr - r).abs();
    let ds = (rs - s).abs();

    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }

    (rq as i64, rr as i64)
}

#[cfg(test)]
mod tests {
    use geo::Contains;

    use super::*;

    #[test]
    fn rejects_non_positive_sizes() {
        assert!(HexGrid::new(0.0).is_none());
        assert!(HexGrid::new(-5.0).is_none());
        assert!(HexGrid::new(f64::NAN).is_none());
        assert!(HexGrid::new(10.0).is_some());
    }

    #[test]
    fn origin_is_centre_of_cell_zero() {
        let grid = HexGrid::new(100.0).unwrap();
        let cell = grid.cell_at(Point::new(0.0, 0.0));
        assert_eq!(cell, HexCell { col: 0, row: 0 });
        assert_eq!(grid.center(cell), Coord { x: 0.0, y: 0.0 });
    }

    #[test]
    fn cell_centres_map_back_to_their_cell() {
        let grid = HexGrid::new(250.0).unwrap();
        for col in -4..=4 {
            for row in -4..=4 {
                let cell = HexCell { col, row };
                let centre = grid.center(cell);
                assert_eq!(grid.cell_at(Point::from(centre)), cell, "{cell:?}");
            }
        }
    }

    #[test]
    fn assigned_cell_contains_the_point() {
        let grid = HexGrid::new(37.5).unwrap();
        let mut x = -1_000.0;
        while x < 1_000.0 {
            let mut y = -1_000.0;
            while y < 1_000.0 {
                let p = Point::new(x, y);
                let cell = grid.cell_at(p);
                let centre = grid.center(cell);
                let distance = (x - centre.x).hypot(y - centre.y);
                // Nearest centre wins, so the point is within one circumradius.
                assert!(distance <= grid.size() + 1e-9);
                if distance < grid.size() * 0.8 {
                    assert!(grid.polygon(cell).contains(&p));
                }
                y += 13.7;
            }
            x += 11.3;
        }
    }

    #[test]
    fn neighbouring_columns_are_offset_by_half_a_row() {
        let grid = HexGrid::new(10.0).unwrap();
        let even = grid.center(HexCell { col: 0, row: 0 });
        let odd = grid.center(HexCell { col: 1, row: 0 });
        assert!((odd.x - 15.0).abs() < 1e-9);
        assert!((odd.y - even.y - SQRT_3 * 5.0).abs() < 1e-9);
    }

    #[test]
    fn polygon_is_closed_hexagon() {
        let grid = HexGrid::new(10.0).unwrap();
        let polygon = grid.polygon(HexCell { col: 2, row: -1 });
        assert_eq!(polygon.exterior().0.len(), 7);
        assert_eq!(polygon.exterior().0.first(), polygon.exterior().0.last());
    }
}
