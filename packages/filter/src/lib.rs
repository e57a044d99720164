#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Typed request-parameter parsing.
//!
//! Every endpoint that filters occurrences goes through
//! [`RequestParams::filters`], which produces the one canonical
//! [`FilterSet`]. Values are validated here, before any store work; the
//! offending field name travels with the error so the client can tell
//! which parameter was rejected.
//!
//! Conventions: an empty value or the literal `null` means "absent",
//! unknown keys are ignored, and list parameters accept repeated keys
//! (`areaIds=1&areaIds=2`, `areaIds[]=1`) as well as comma-separated
//! values (`areaIds=1,2`).

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::NaiveDate;
use mica_occurrence_models::RecordsType;
use thiserror::Error;

/// Date format accepted for `startDate` / `endDate`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while resolving request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// A recognized parameter carried a malformed value.
    #[error("Invalid value {value:?} for filter '{field}': {reason}")]
    InvalidFilterValue {
        /// Request parameter name.
        field: String,
        /// The raw value as received.
        value: String,
        /// What was expected instead.
        reason: String,
    },
}

impl FilterError {
    fn invalid(field: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFilterValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the rejected request parameter.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::InvalidFilterValue { field, .. } => field,
        }
    }
}

/// The canonical, immutable set of occurrence filters for one request.
///
/// `None` / empty means the filter is not applied. Date bounds are
/// inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterSet {
    dataset_id: Option<i64>,
    species_id: Option<i64>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    records_type: Option<RecordsType>,
    area_ids: BTreeSet<i64>,
}

impl FilterSet {
    /// A filter set matching every occurrence.
    #[must_use]
    pub fn unfiltered() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_dataset(mut self, dataset_id: i64) -> Self {
        self.dataset_id = Some(dataset_id);
        self
    }

    #[must_use]
    pub const fn with_species(mut self, species_id: i64) -> Self {
        self.species_id = Some(species_id);
        self
    }

    #[must_use]
    pub const fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    #[must_use]
    pub const fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    #[must_use]
    pub const fn with_records_type(mut self, records_type: RecordsType) -> Self {
        self.records_type = Some(records_type);
        self
    }

    #[must_use]
    pub fn with_areas(mut self, area_ids: impl IntoIterator<Item = i64>) -> Self {
        self.area_ids.extend(area_ids);
        self
    }

    #[must_use]
    pub const fn dataset_id(&self) -> Option<i64> {
        self.dataset_id
    }

    #[must_use]
    pub const fn species_id(&self) -> Option<i64> {
        self.species_id
    }

    #[must_use]
    pub const fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    #[must_use]
    pub const fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    #[must_use]
    pub const fn records_type(&self) -> Option<RecordsType> {
        self.records_type
    }

    #[must_use]
    pub const fn area_ids(&self) -> &BTreeSet<i64> {
        &self.area_ids
    }

    /// Whether occurrences of `dataset_id` can be selected by this set.
    ///
    /// Used to decide which cached results a dataset replacement makes
    /// stale.
    #[must_use]
    pub fn may_include_dataset(&self, dataset_id: i64) -> bool {
        self.dataset_id.is_none_or(|id| id == dataset_id)
    }
}

/// Raw request parameters, keyed by name, preserving repeated values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    values: BTreeMap<String, Vec<String>>,
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in iter {
            let key = key.into();
            // `areaIds[]=1` is the same parameter as `areaIds=1`
            let key = key.strip_suffix("[]").map_or(key.clone(), str::to_string);
            values.entry(key).or_default().push(value.into());
        }
        Self { values }
    }
}

impl RequestParams {
    /// Last non-empty value of a parameter, `None` if absent, empty or
    /// `null`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)?
            .iter()
            .rev()
            .map(|v| v.trim())
            .find(|v| !is_blank(v))
    }

    /// Parses an optional numeric parameter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidFilterValue`] if the value is present
    /// but not a valid number.
    pub fn parse_opt<T: FromStr>(&self, name: &str) -> Result<Option<T>, FilterError> {
        self.value(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| FilterError::invalid(name, raw, "expected an integer"))
            })
            .transpose()
    }

    /// Parses an optional `YYYY-MM-DD` date parameter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidFilterValue`] if the value is present
    /// but not a calendar date.
    pub fn date_opt(&self, name: &str) -> Result<Option<NaiveDate>, FilterError> {
        self.value(name)
            .map(|raw| {
                NaiveDate::parse_from_str(raw, DATE_FORMAT)
                    .map_err(|e| FilterError::invalid(name, raw, format!("expected YYYY-MM-DD ({e})")))
            })
            .transpose()
    }

    /// Parses every value of a list parameter as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidFilterValue`] on the first malformed
    /// element.
    pub fn int_list(&self, name: &str) -> Result<BTreeSet<i64>, FilterError> {
        let Some(values) = self.values.get(name) else {
            return Ok(BTreeSet::new());
        };

        values
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !is_blank(v))
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|_| FilterError::invalid(name, raw, "expected a list of integers"))
            })
            .collect()
    }

    /// Resolves the occurrence filters carried by these parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidFilterValue`] naming the first
    /// malformed filter.
    pub fn filters(&self) -> Result<FilterSet, FilterError> {
        let records_type = self
            .value("recordsType")
            .map(|raw| {
                raw.parse::<RecordsType>().map_err(|_| {
                    FilterError::invalid("recordsType", raw, "expected 'catches' or 'observations'")
                })
            })
            .transpose()?;

        let filters = FilterSet {
            dataset_id: self.parse_opt("datasetId")?,
            species_id: self.parse_opt("speciesId")?,
            start_date: self.date_opt("startDate")?,
            end_date: self.date_opt("endDate")?,
            records_type,
            area_ids: self.int_list("areaIds")?,
        };

        log::trace!("Resolved filters: {filters:?}");

        Ok(filters)
    }
}

fn is_blank(value: &str) -> bool {
    value.is_empty() || value == "null"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> RequestParams {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_params_resolve_to_unfiltered() {
        let filters = params(&[]).filters().unwrap();
        assert_eq!(filters, FilterSet::unfiltered());
    }

    #[test]
    fn repeated_key_takes_last_non_empty_value() {
        let trailing_blank = params(&[("datasetId", "1"), ("datasetId", "2"), ("datasetId", "")]);
        assert_eq!(trailing_blank.value("datasetId"), Some("2"));
        assert_eq!(
            trailing_blank.filters().unwrap(),
            FilterSet::unfiltered().with_dataset(2)
        );

        let trailing_null = params(&[("speciesId", "3"), ("speciesId", "null")]);
        assert_eq!(trailing_null.value("speciesId"), Some("3"));

        let all_blank = params(&[("speciesId", ""), ("speciesId", " null ")]);
        assert_eq!(all_blank.value("speciesId"), None);
    }

    #[test]
    fn resolves_every_recognized_filter() {
        let filters = params(&[
            ("datasetId", "4"),
            ("speciesId", "12"),
            ("startDate", "2020-01-01"),
            ("endDate", "2020-12-31"),
            ("recordsType", "catches"),
            ("areaIds[]", "3"),
            ("areaIds[]", "1"),
        ])
        .filters()
        .unwrap();

        assert_eq!(filters.dataset_id(), Some(4));
        assert_eq!(filters.species_id(), Some(12));
        assert_eq!(
            filters.start_date(),
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
        assert_eq!(filters.end_date(), NaiveDate::from_ymd_opt(2020, 12, 31));
        assert_eq!(filters.records_type(), Some(RecordsType::Catches));
        assert_eq!(
            filters.area_ids().iter().copied().collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn blank_and_null_values_are_absent() {
        let filters = params(&[("datasetId", ""), ("speciesId", "null"), ("endDate", "")])
            .filters()
            .unwrap();
        assert_eq!(filters, FilterSet::unfiltered());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let filters = params(&[("colour", "red"), ("zoom", "3")]).filters().unwrap();
        assert_eq!(filters, FilterSet::unfiltered());
    }

    #[test]
    fn malformed_integer_names_the_field() {
        let err = params(&[("datasetId", "abc")]).filters().unwrap_err();
        assert_eq!(err.field(), "datasetId");
    }

    #[test]
    fn malformed_date_names_the_field() {
        let err = params(&[("startDate", "2020-01-01"), ("endDate", "31/12/2020")])
            .filters()
            .unwrap_err();
        assert_eq!(err.field(), "endDate");
    }

    #[test]
    fn unknown_records_type_is_rejected() {
        let err = params(&[("recordsType", "both")]).filters().unwrap_err();
        assert_eq!(err.field(), "recordsType");
    }

    #[test]
    fn area_ids_accept_comma_separated_values() {
        let filters = params(&[("areaIds", "7,2"), ("areaIds", "9")])
            .filters()
            .unwrap();
        assert_eq!(
            filters.area_ids().iter().copied().collect::<Vec<_>>(),
            vec![2, 7, 9]
        );
    }

    #[test]
    fn malformed_area_id_names_the_field() {
        let err = params(&[("areaIds[]", "1"), ("areaIds[]", "x")])
            .filters()
            .unwrap_err();
        assert_eq!(err.field(), "areaIds");
    }

    #[test]
    fn dataset_inclusion_for_invalidation() {
        assert!(FilterSet::unfiltered().may_include_dataset(3));
        assert!(FilterSet::unfiltered().with_dataset(3).may_include_dataset(3));
        assert!(!FilterSet::unfiltered().with_dataset(4).may_include_dataset(3));
    }
}
