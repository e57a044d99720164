//! The canonical occurrence predicate.
//!
//! [`Predicate::from_filters`] is the only place filter semantics are
//! defined. A predicate is a conjunction of typed [`Clause`]s and has two
//! renderings, both exhaustive over the clause variants:
//!
//! * [`Predicate::to_sql`]: a `WHERE` condition with `$n` placeholders and
//!   bound [`DatabaseValue`]s, for the `PostGIS` store;
//! * [`Predicate::bind`]: an in-process matcher, for the memory store.
//!
//! The area mask is the union of the selected areas, computed once per
//! request (a non-correlated sub-select in SQL, a single `geo` union in
//! process).

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveTime};
use geo::{BooleanOps, Intersects, MultiPolygon};
use mica_filter::FilterSet;
use mica_occurrence_models::{Area, Occurrence, RecordsType};
use switchy_database::DatabaseValue;

/// One independently specifiable filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Clause {
    /// Occurrence belongs to the dataset.
    Dataset(i64),
    /// Occurrence is of the species.
    Species(i64),
    /// Observation date is on or after the date.
    DateFrom(NaiveDate),
    /// Observation date is on or before the date.
    DateTo(NaiveDate),
    /// Occurrence is a catch or a sighting.
    RecordsType(RecordsType),
    /// Occurrence location intersects the union of the areas.
    WithinAreas(BTreeSet<i64>),
}

/// A conjunction of [`Clause`]s. The empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

/// SQL rendering of a [`Predicate`].
#[derive(Debug)]
pub struct SqlPredicate {
    /// Boolean SQL expression; `TRUE` for the empty predicate.
    pub condition: String,
    /// Values for the placeholders, in order.
    pub params: Vec<DatabaseValue>,
    /// First placeholder index not used by this predicate.
    pub next_param: usize,
}

impl Predicate {
    /// Builds the predicate selecting exactly the occurrences that satisfy
    /// every filter of `filters`.
    #[must_use]
    pub fn from_filters(filters: &FilterSet) -> Self {
        let mut clauses = Vec::new();

        if let Some(id) = filters.dataset_id() {
            clauses.push(Clause::Dataset(id));
        }
        if let Some(id) = filters.species_id() {
            clauses.push(Clause::Species(id));
        }
        if let Some(date) = filters.start_date() {
            clauses.push(Clause::DateFrom(date));
        }
        if let Some(date) = filters.end_date() {
            clauses.push(Clause::DateTo(date));
        }
        if let Some(records_type) = filters.records_type() {
            clauses.push(Clause::RecordsType(records_type));
        }
        if !filters.area_ids().is_empty() {
            clauses.push(Clause::WithinAreas(filters.area_ids().clone()));
        }

        Self { clauses }
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Area ids referenced by the predicate's area mask, if it has one.
    #[must_use]
    pub fn area_ids(&self) -> Option<&BTreeSet<i64>> {
        self.clauses.iter().find_map(|clause| match clause {
            Clause::WithinAreas(ids) => Some(ids),
            _ => None,
        })
    }

    /// Renders the predicate against the occurrence table aliased `alias`,
    /// numbering placeholders from `first_param`.
    ///
    /// Only column names and placeholders are written into the SQL text;
    /// every value travels in [`SqlPredicate::params`].
    #[must_use]
    pub fn to_sql(&self, alias: &'static str, first_param: usize) -> SqlPredicate {
        let mut conditions = Vec::with_capacity(self.clauses.len());
        let mut params = Vec::new();
        let mut idx = first_param;

        for clause in &self.clauses {
            match clause {
                Clause::Dataset(id) => {
                    conditions.push(format!("{alias}.dataset_id = ${idx}"));
                    params.push(DatabaseValue::Int64(*id));
                    idx += 1;
                }
                Clause::Species(id) => {
                    conditions.push(format!("{alias}.species_id = ${idx}"));
                    params.push(DatabaseValue::Int64(*id));
                    idx += 1;
                }
                Clause::DateFrom(date) => {
                    conditions.push(format!("{alias}.date >= CAST(${idx} AS timestamp)"));
                    params.push(DatabaseValue::DateTime(date.and_time(NaiveTime::MIN)));
                    idx += 1;
                }
                Clause::DateTo(date) => {
                    conditions.push(format!("{alias}.date <= CAST(${idx} AS timestamp)"));
                    params.push(DatabaseValue::DateTime(date.and_time(NaiveTime::MIN)));
                    idx += 1;
                }
                Clause::RecordsType(records_type) => {
                    conditions.push(format!("{alias}.is_catch = ${idx}"));
                    params.push(DatabaseValue::Bool(records_type.is_catch()));
                    idx += 1;
                }
                Clause::WithinAreas(ids) => {
                    let mut placeholders = String::new();
                    for (i, id) in ids.iter().enumerate() {
                        if i > 0 {
                            placeholders.push_str(", ");
                        }
                        let _ = write!(placeholders, "${idx}");
                        params.push(DatabaseValue::Int64(*id));
                        idx += 1;
                    }
                    conditions.push(format!(
                        "ST_Intersects({alias}.location, \
                         (SELECT ST_Union(a.mpoly) FROM areas AS a WHERE a.id IN ({placeholders})))"
                    ));
                }
            }
        }

        let condition = if conditions.is_empty() {
            "TRUE".to_string()
        } else {
            conditions.join(" AND ")
        };

        SqlPredicate {
            condition,
            params,
            next_param: idx,
        }
    }

    /// Prepares the predicate for in-process matching.
    ///
    /// `lookup_area` resolves area ids; ids it does not know contribute no
    /// geometry. The union of the selected areas is computed here, once.
    #[must_use]
    pub fn bind<'p, 'a, F>(&'p self, lookup_area: F) -> BoundPredicate<'p>
    where
        F: Fn(i64) -> Option<&'a Area>,
    {
        let area_mask = self.area_ids().map(|ids| {
            ids.iter()
                .filter_map(|id| lookup_area(*id))
                .fold(MultiPolygon::new(vec![]), |union, area| {
                    if union.0.is_empty() {
                        area.mpoly.clone()
                    } else {
                        union.union(&area.mpoly)
                    }
                })
        });

        BoundPredicate {
            predicate: self,
            area_mask,
        }
    }
}

impl From<&FilterSet> for Predicate {
    fn from(filters: &FilterSet) -> Self {
        Self::from_filters(filters)
    }
}

/// A [`Predicate`] with its area mask resolved, ready to test occurrences.
#[derive(Debug, Clone)]
pub struct BoundPredicate<'a> {
    predicate: &'a Predicate,
    area_mask: Option<MultiPolygon<f64>>,
}

impl BoundPredicate<'_> {
    /// Whether `occurrence` satisfies every clause.
    #[must_use]
    pub fn matches(&self, occurrence: &Occurrence) -> bool {
        self.predicate.clauses.iter().all(|clause| match clause {
            Clause::Dataset(id) => occurrence.dataset_id == *id,
            Clause::Species(id) => occurrence.species_id == *id,
            Clause::DateFrom(date) => occurrence.date >= *date,
            Clause::DateTo(date) => occurrence.date <= *date,
            Clause::RecordsType(records_type) => occurrence.is_records_type(*records_type),
            Clause::WithinAreas(_) => match (&self.area_mask, occurrence.location) {
                (Some(mask), Some(location)) => mask.intersects(&location),
                _ => false,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, Point, Polygon};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn square(id: i64, min: (f64, f64), max: (f64, f64)) -> Area {
        let ring = LineString::from(vec![
            (min.0, min.1),
            (max.0, min.1),
            (max.0, max.1),
            (min.0, max.1),
            (min.0, min.1),
        ]);
        Area {
            id,
            name: format!("area {id}"),
            mpoly: MultiPolygon(vec![Polygon::new(ring, vec![])]),
        }
    }

    fn occurrence(location: Option<(f64, f64)>) -> Occurrence {
        Occurrence {
            id: 1,
            gbif_id: "1".to_string(),
            species_id: 10,
            dataset_id: 20,
            data_import_id: 1,
            individual_count: 1,
            date: date(2020, 1, 1),
            location: location.map(|(x, y)| Point::new(x, y)),
            coordinates_uncertainty: None,
            municipality: None,
            georeference_remarks: None,
            is_catch: true,
        }
    }

    fn no_areas(_: i64) -> Option<&'static Area> {
        None
    }

    #[test]
    fn empty_filters_render_true() {
        let sql = Predicate::from_filters(&FilterSet::unfiltered()).to_sql("occ", 1);
        assert_eq!(sql.condition, "TRUE");
        assert!(sql.params.is_empty());
        assert_eq!(sql.next_param, 1);
    }

    #[test]
    fn renders_placeholders_in_clause_order() {
        let filters = FilterSet::unfiltered()
            .with_dataset(3)
            .with_species(4)
            .with_start_date(date(2020, 1, 1))
            .with_end_date(date(2020, 12, 31))
            .with_records_type(RecordsType::Observations)
            .with_areas([8, 9]);

        let sql = Predicate::from_filters(&filters).to_sql("occ", 6);

        assert_eq!(
            sql.condition,
            "occ.dataset_id = $6 AND occ.species_id = $7 \
             AND occ.date >= CAST($8 AS timestamp) AND occ.date <= CAST($9 AS timestamp) \
             AND occ.is_catch = $10 \
             AND ST_Intersects(occ.location, \
             (SELECT ST_Union(a.mpoly) FROM areas AS a WHERE a.id IN ($11, $12)))"
        );
        assert_eq!(sql.params.len(), 7);
        assert_eq!(sql.next_param, 13);
        assert!(matches!(sql.params[4], DatabaseValue::Bool(false)));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let filters = FilterSet::unfiltered()
            .with_start_date(date(2020, 1, 1))
            .with_end_date(date(2020, 1, 1));
        let predicate = Predicate::from_filters(&filters);
        assert!(predicate.bind(no_areas).matches(&occurrence(None)));
    }

    #[test]
    fn records_type_splits_catches_from_sightings() {
        let catch = occurrence(None);
        let sighting = Occurrence {
            is_catch: false,
            ..occurrence(None)
        };

        let catches =
            Predicate::from_filters(&FilterSet::unfiltered().with_records_type(RecordsType::Catches));
        let observations = Predicate::from_filters(
            &FilterSet::unfiltered().with_records_type(RecordsType::Observations),
        );

        assert!(catches.bind(no_areas).matches(&catch));
        assert!(!catches.bind(no_areas).matches(&sighting));
        assert!(observations.bind(no_areas).matches(&sighting));
        assert!(!observations.bind(no_areas).matches(&catch));
    }

    #[test]
    fn area_mask_is_the_union_of_selected_areas() {
        let a = square(1, (0.0, 0.0), (10.0, 10.0));
        let b = square(2, (5.0, 5.0), (20.0, 20.0));
        let areas = [a, b];
        let lookup = |id: i64| areas.iter().find(|area| area.id == id);

        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_areas([1, 2]));
        let bound = predicate.bind(lookup);

        // Only in B, outside A.
        assert!(bound.matches(&occurrence(Some((15.0, 15.0)))));
        // Only in A.
        assert!(bound.matches(&occurrence(Some((1.0, 1.0)))));
        // Outside both.
        assert!(!bound.matches(&occurrence(Some((30.0, 1.0)))));
        // Unlocated records never fall inside an area.
        assert!(!bound.matches(&occurrence(None)));
    }

    #[test]
    fn unknown_areas_match_nothing() {
        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_areas([99]));
        assert!(!predicate.bind(no_areas).matches(&occurrence(Some((1.0, 1.0)))));
    }

    type Oracle = fn(&Occurrence) -> bool;

    /// One filter per bit of a subset mask, each paired with the condition
    /// it imposes on its own.
    fn dimensions() -> [(fn(FilterSet) -> FilterSet, Oracle); 6] {
        [
            (|f| f.with_dataset(20), |o| o.dataset_id == 20),
            (|f| f.with_species(10), |o| o.species_id == 10),
            (
                |f| f.with_start_date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
                |o| o.date >= NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            ),
            (
                |f| f.with_end_date(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()),
                |o| o.date <= NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            ),
            (
                |f| f.with_records_type(RecordsType::Catches),
                |o| o.is_catch,
            ),
            (
                |f| f.with_areas([1]),
                |o| o.location.is_some_and(|p| p.x() < 10.0 && p.y() < 10.0),
            ),
        ]
    }

    fn varied_occurrences() -> Vec<Occurrence> {
        let mut occurrences = Vec::new();
        for dataset_id in [20, 21] {
            for species_id in [10, 11] {
                for day in [date(2019, 12, 31), date(2020, 6, 15), date(2021, 1, 1)] {
                    for is_catch in [true, false] {
                        for location in [Some((5.0, 5.0)), Some((30.0, 30.0)), None] {
                            occurrences.push(Occurrence {
                                dataset_id,
                                species_id,
                                date: day,
                                is_catch,
                                ..occurrence(location)
                            });
                        }
                    }
                }
            }
        }
        occurrences
    }

    #[test]
    fn every_filter_subset_is_the_conjunction_of_its_parts() {
        let areas = [square(1, (0.0, 0.0), (10.0, 10.0))];
        let lookup = |id: i64| areas.iter().find(|area| area.id == id);
        let occurrences = varied_occurrences();
        let dimensions = dimensions();

        for mask in 0u32..(1 << dimensions.len()) {
            let selected: Vec<_> = dimensions
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, dimension)| *dimension)
                .collect();
            let filters = selected
                .iter()
                .fold(FilterSet::unfiltered(), |filters, (apply, _)| apply(filters));
            let predicate = Predicate::from_filters(&filters);

            assert_eq!(predicate.clauses().len(), selected.len(), "mask {mask:06b}");
            let sql = predicate.to_sql("occ", 1);
            assert_eq!(sql.params.len(), selected.len(), "mask {mask:06b}");
            if selected.is_empty() {
                assert_eq!(sql.condition, "TRUE");
            } else {
                assert_eq!(
                    sql.condition.matches(" AND ").count(),
                    selected.len() - 1,
                    "mask {mask:06b}"
                );
            }

            let bound = predicate.bind(lookup);
            let mut matched = 0;
            for occurrence in &occurrences {
                let expected = selected.iter().all(|(_, holds)| holds(occurrence));
                assert_eq!(
                    bound.matches(occurrence),
                    expected,
                    "mask {mask:06b}, occurrence {occurrence:?}"
                );
                matched += usize::from(expected);
            }
            // Each dimension splits the fixture, so no subset is vacuous.
            assert!(matched > 0, "mask {mask:06b}");
        }
    }

    #[test]
    fn conjunction_requires_every_clause() {
        let filters = FilterSet::unfiltered().with_dataset(20).with_species(11);
        let predicate = Predicate::from_filters(&filters);
        // Dataset matches, species does not.
        assert!(!predicate.bind(no_areas).matches(&occurrence(None)));
    }
}
