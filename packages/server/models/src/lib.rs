#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! JSON response types for the occurrence map API.
//!
//! Registry records, date ranges and histogram buckets are served as the
//! store returns them; only the shapes that differ from the store's live
//! here.

use mica_database_models::{OccurrencePage, OccurrenceRow};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// One page of the tabular occurrence listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOccurrencePage {
    /// Rows of the served page.
    pub results: Vec<OccurrenceRow>,
    /// Always 1.
    pub first_page: u32,
    /// One past the last valid page number, so `firstPage..lastPage` spans
    /// every page. Clients show `lastPage - 1` as the page count.
    pub last_page: u32,
    /// Page actually served after clamping.
    pub page_number: u32,
    /// Number of matching occurrences over all pages.
    pub total_results_count: u64,
}

impl From<OccurrencePage> for ApiOccurrencePage {
    fn from(page: OccurrencePage) -> Self {
        Self {
            results: page.results,
            first_page: 1,
            last_page: page.window.num_pages.saturating_add(1),
            page_number: page.window.page,
            total_results_count: page.total_count,
        }
    }
}

/// Number of matching occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCount {
    pub count: u64,
}

/// Acknowledgement of a "dataset replaced" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInvalidation {
    /// The replaced dataset.
    pub dataset_id: i64,
    /// Cached tiles dropped.
    pub invalidated_tiles: usize,
}

/// Error body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Offending request parameter, for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}
