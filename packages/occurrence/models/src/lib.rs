#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Occurrence, dataset, species and area domain types.
//!
//! All geometries are planar and expressed in Web Mercator meters
//! (`EPSG:3857`). Geographic coordinates only appear at the edges of the
//! system (API serialization) and are produced by `mica_spatial`.

use chrono::{DateTime, NaiveDate, Utc};
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Spatial reference identifier shared by every stored geometry.
pub const PLANAR_SRID: i32 = 3857;

/// Whether a record comes from a trapping campaign or a field sighting.
///
/// Parsed from the `recordsType` request parameter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordsType {
    /// Individuals caught (`is_catch = true`).
    Catches,
    /// Individuals seen (`is_catch = false`).
    Observations,
}

impl RecordsType {
    /// The `is_catch` value a record must carry to be of this type.
    #[must_use]
    pub const fn is_catch(self) -> bool {
        matches!(self, Self::Catches)
    }
}

/// A named source of occurrences, keyed by its external (GBIF) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Primary key.
    pub id: i64,
    /// Human-readable dataset name.
    pub name: String,
    /// Stable external identifier.
    pub gbif_id: String,
}

/// A named taxon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Species {
    /// Primary key.
    pub id: i64,
    /// Scientific name.
    pub name: String,
}

/// One ingestion run.
///
/// Every occurrence references the import that produced it; replacing a
/// dataset retargets its occurrences to a new import atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImport {
    /// Primary key.
    pub id: i64,
    /// When the run started.
    pub start: DateTime<Utc>,
    /// When the run committed its occurrences, if it did.
    pub end: Option<DateTime<Utc>>,
    /// External download identifier.
    pub gbif_download_id: Option<String>,
    /// Predicate sent with the download request.
    pub gbif_predicate: Option<String>,
}

impl DataImport {
    /// Whether the run has committed its occurrences.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.end.is_some()
    }
}

/// An observed or captured individual (or group of individuals).
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    /// Primary key.
    pub id: i64,
    /// Stable external identifier.
    pub gbif_id: String,
    /// Referenced species.
    pub species_id: i64,
    /// Owning dataset.
    pub dataset_id: i64,
    /// Import batch that produced this record.
    pub data_import_id: i64,
    /// Number of individuals, at least 1.
    pub individual_count: u32,
    /// Observation date. Partial dates are normalized upstream.
    pub date: NaiveDate,
    /// Planar location, absent when the source had no usable coordinates.
    pub location: Option<Point<f64>>,
    /// Positional uncertainty in meters.
    pub coordinates_uncertainty: Option<f64>,
    /// Municipality free text.
    pub municipality: Option<String>,
    /// Georeference remarks free text.
    pub georeference_remarks: Option<String>,
    /// `true` for trapped individuals, `false` for sightings.
    pub is_catch: bool,
}

impl Occurrence {
    /// Whether this record belongs to the given records type.
    #[must_use]
    pub const fn is_records_type(&self, records_type: RecordsType) -> bool {
        self.is_catch == records_type.is_catch()
    }
}

/// A named polygon usable as a filter mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Area {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Planar geometry.
    pub mpoly: MultiPolygon<f64>,
}

/// A cell of the precomputed auxiliary grid ("fishnet").
#[derive(Debug, Clone, PartialEq)]
pub struct FishnetSquare {
    /// Primary key.
    pub id: i64,
    /// Planar geometry.
    pub mpoly: MultiPolygon<f64>,
    /// Total waterway length inside the cell, in meters.
    pub waterway_length_in_meters: f64,
}
