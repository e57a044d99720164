#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Occurrence aggregation and vector tile serving.
//!
//! A request flows through [`zoom`] (hexagon size for the zoom level),
//! [`aggregate`] (hexagon or fishnet counts from the store), then either
//! [`encode`] (vector tile) or [`range`] (min/max for the legend).
//! [`service::TileService`] ties the steps together and fronts them with
//! the [`cache::TileCache`].

pub mod aggregate;
pub mod cache;
pub mod encode;
pub mod range;
pub mod service;
pub mod zoom;

pub use aggregate::{Cells, GridExtent, aggregate_fishnet, aggregate_hex};
pub use cache::{TileCache, TileKey};
pub use encode::encode_tile;
pub use range::CountRange;
pub use service::TileService;
pub use zoom::{cell_size_for_zoom, grid_for_zoom};

use mica_database::DbError;
use mica_spatial::InvalidTileCoordinate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors that can occur while aggregating or encoding tiles.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    /// No hexagon size is configured for the zoom level.
    #[error("Unsupported zoom level: {0}")]
    UnsupportedZoomLevel(u8),

    /// The tile address does not exist.
    #[error(transparent)]
    InvalidTileCoordinate(#[from] InvalidTileCoordinate),

    /// The aggregation kind in the request is not known.
    #[error("Unknown aggregation kind: {0}")]
    UnknownAggregationKind(String),

    /// The vector tile library rejected a geometry.
    #[error("Tile encoding error: {0}")]
    Encode(#[from] mvt::Error),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] DbError),
}

impl TileError {
    /// Whether the error is caused by the request rather than the backend.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedZoomLevel(_)
                | Self::InvalidTileCoordinate(_)
                | Self::UnknownAggregationKind(_)
        )
    }
}

/// Grid a tile aggregates occurrences into.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AggregationKind {
    /// Hexagons sized by zoom level.
    Hex,
    /// The precomputed fishnet, carrying a water score.
    Fishnet,
}

impl AggregationKind {
    /// Parses a request path segment.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::UnknownAggregationKind`] for anything other
    /// than `hex` or `fishnet`.
    pub fn parse(value: &str) -> Result<Self, TileError> {
        value
            .parse()
            .map_err(|_| TileError::UnknownAggregationKind(value.to_string()))
    }
}
