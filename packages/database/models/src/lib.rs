#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aggregation results, listing rows and query parameter definitions.
//!
//! These types describe what the occurrence store hands back. They are
//! distinct from the API response types in `mica_server_models` and the
//! domain entities in `mica_occurrence_models`.

use std::str::FromStr;

use chrono::NaiveDate;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default page size of the tabular listing.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size the tabular listing accepts.
pub const MAX_PAGE_SIZE: u32 = 1_000;

/// One aggregated grid cell, ready to be encoded or reduced.
pub trait CellCount {
    /// Planar outline of the cell.
    fn geometry(&self) -> &MultiPolygon<f64>;

    /// Number of matching occurrences in the cell.
    fn count(&self) -> u64;

    /// Secondary numeric attribute carried by the cell, if any.
    fn attribute(&self) -> Option<(&'static str, f64)> {
        None
    }
}

/// A non-empty hexagon of the dynamic grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HexCount {
    /// Hexagon outline.
    pub geometry: MultiPolygon<f64>,
    /// Matching occurrences intersecting the hexagon (always at least 1).
    pub count: u64,
}

impl CellCount for HexCount {
    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    fn count(&self) -> u64 {
        self.count
    }
}

/// A cell of the auxiliary (fishnet) grid with its occurrence count.
#[derive(Debug, Clone, PartialEq)]
pub struct FishnetCount {
    /// Fishnet square id.
    pub id: i64,
    /// Cell outline.
    pub geometry: MultiPolygon<f64>,
    /// Matching occurrences inside the cell, possibly zero.
    pub count: u64,
    /// External attribute: waterway length inside the cell, in meters.
    pub waterway_length_in_meters: f64,
}

/// Tile property name of [`FishnetCount::waterway_length_in_meters`].
pub const WATER_SCORE_PROPERTY: &str = "water_score";

impl CellCount for FishnetCount {
    fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn attribute(&self) -> Option<(&'static str, f64)> {
        Some((WATER_SCORE_PROPERTY, self.waterway_length_in_meters))
    }
}

/// Column the tabular listing can be sorted by.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum OrderField {
    /// Insertion order.
    Id,
    /// External identifier.
    GbifId,
    /// Observation date.
    #[default]
    Date,
    /// Species scientific name.
    SpeciesName,
    /// Dataset name.
    DatasetName,
}

/// Sort order of the tabular listing, written `field` or `-field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OccurrenceOrder {
    /// Sort column.
    pub field: OrderField,
    /// Whether the order is reversed.
    pub descending: bool,
}

impl FromStr for OccurrenceOrder {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, field) = s
            .strip_prefix('-')
            .map_or((false, s), |field| (true, field));
        Ok(Self {
            field: field.parse()?,
            descending,
        })
    }
}

impl std::fmt::Display for OccurrenceOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.descending {
            write!(f, "-{}", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

/// Paging and ordering of the tabular listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccurrenceQuery {
    /// Sort order.
    pub order: OccurrenceOrder,
    /// Rows per page, between 1 and [`MAX_PAGE_SIZE`].
    pub limit: u32,
    /// Requested 1-based page; clamped into range.
    pub page_number: u32,
}

impl Default for OccurrenceQuery {
    fn default() -> Self {
        Self {
            order: OccurrenceOrder::default(),
            limit: DEFAULT_PAGE_SIZE,
            page_number: 1,
        }
    }
}

/// Window of a listing page after clamping the requested page into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Page actually served (1-based).
    pub page: u32,
    /// Number of pages, at least 1 even when there are no results.
    pub num_pages: u32,
    /// Rows to skip.
    pub offset: u64,
    /// Rows to take.
    pub limit: u32,
}

impl PageWindow {
    /// Computes the page to serve for `total` matching rows.
    ///
    /// Pages past the end clamp to the last page and page `0` to the first.
    #[must_use]
    pub fn new(total: u64, limit: u32, requested_page: u32) -> Self {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let num_pages = u32::try_from(total.div_ceil(u64::from(limit)))
            .unwrap_or(u32::MAX)
            .max(1);
        let page = requested_page.clamp(1, num_pages);
        Self {
            page,
            num_pages,
            offset: u64::from(page - 1) * u64::from(limit),
            limit,
        }
    }
}

/// An occurrence as listed in the tabular view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceRow {
    /// Primary key.
    pub id: i64,
    /// Stable external identifier.
    pub gbif_id: String,
    /// Species id.
    pub species_id: i64,
    /// Species scientific name.
    pub species_name: String,
    /// Dataset id.
    pub dataset_id: i64,
    /// Dataset name.
    pub dataset_name: String,
    /// Number of individuals.
    pub individual_count: u32,
    /// Observation date.
    pub date: NaiveDate,
    /// WGS84 longitude, if the record is located.
    pub lon: Option<f64>,
    /// WGS84 latitude, if the record is located.
    pub lat: Option<f64>,
    /// Positional uncertainty in meters.
    pub coordinates_uncertainty: Option<f64>,
    /// Municipality free text.
    pub municipality: Option<String>,
    /// Georeference remarks free text.
    pub georeference_remarks: Option<String>,
    /// Catch (`true`) or sighting (`false`).
    pub is_catch: bool,
}

/// One page of the tabular listing.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrencePage {
    /// Rows of the served page.
    pub results: Vec<OccurrenceRow>,
    /// Page window that was served.
    pub window: PageWindow,
    /// Total rows matching the filters.
    pub total_count: u64,
}

/// Earliest and latest matching observation date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest date, `None` when nothing matched.
    pub min: Option<NaiveDate>,
    /// Latest date, `None` when nothing matched.
    pub max: Option<NaiveDate>,
}

/// Matching occurrences in one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthlyCount {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1-12.
    pub month: u32,
    /// Number of matching occurrences.
    pub count: u64,
}

/// An area as listed by the registry, without its geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaSummary {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ascending_and_descending_order() {
        let asc: OccurrenceOrder = "speciesName".parse().unwrap();
        assert_eq!(asc.field, OrderField::SpeciesName);
        assert!(!asc.descending);

        let desc: OccurrenceOrder = "-date".parse().unwrap();
        assert_eq!(desc.field, OrderField::Date);
        assert!(desc.descending);
        assert_eq!(desc.to_string(), "-date");

        assert!("location".parse::<OccurrenceOrder>().is_err());
    }

    #[test]
    fn page_window_clamps_requested_page() {
        let window = PageWindow::new(45, 20, 7);
        assert_eq!(window.num_pages, 3);
        assert_eq!(window.page, 3);
        assert_eq!(window.offset, 40);

        let first = PageWindow::new(45, 20, 0);
        assert_eq!(first.page, 1);
        assert_eq!(first.offset, 0);
    }

    #[test]
    fn empty_listing_still_has_one_page() {
        let window = PageWindow::new(0, 20, 3);
        assert_eq!(window.num_pages, 1);
        assert_eq!(window.page, 1);
        assert_eq!(window.offset, 0);
    }

    #[test]
    fn fishnet_cells_expose_water_score() {
        let cell = FishnetCount {
            id: 1,
            geometry: MultiPolygon(vec![]),
            count: 0,
            waterway_length_in_meters: 12.5,
        };
        assert_eq!(cell.attribute(), Some((WATER_SCORE_PROPERTY, 12.5)));
    }
}
