//! In-process implementation of [`OccurrenceStore`].
//!
//! All records live in one immutable snapshot behind an `Arc`. Readers
//! clone the `Arc` and never observe a partially replaced dataset;
//! [`MemoryStore::replace_dataset`] builds a new snapshot and swaps it in
//! under the write lock.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Datelike as _;
use geo::{Intersects, MultiPolygon, Point, Rect};
use mica_database_models::{
    AreaSummary, DateRange, FishnetCount, HexCount, MonthlyCount, OccurrencePage, OccurrenceQuery,
    OccurrenceRow, OrderField, PageWindow,
};
use mica_occurrence_models::{Area, DataImport, Dataset, FishnetSquare, Occurrence, Species};
use mica_spatial::projection::mercator_to_lonlat;
use mica_spatial::{HexCell, HexGrid, compute_envelope, expand_rect, rect_to_envelope};
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree, RTreeObject};

use crate::predicate::BoundPredicate;
use crate::{DbError, OccurrenceStore, Predicate};

/// Located occurrence: planar coordinates plus an index into
/// the snapshot occurrence list.
type LocatedEntry = GeomWithData<[f64; 2], usize>;

/// Everything a [`MemoryStore`] serves.
#[derive(Debug, Clone, Default)]
pub struct MemoryData {
    pub datasets: Vec<Dataset>,
    pub species: Vec<Species>,
    pub areas: Vec<Area>,
    pub imports: Vec<DataImport>,
    pub occurrences: Vec<Occurrence>,
    pub fishnet: Vec<FishnetSquare>,
}

/// A fishnet square stored in the R-tree with its envelope.
#[derive(Debug)]
struct FishnetEntry {
    envelope: AABB<[f64; 2]>,
    square: FishnetSquare,
}

impl RTreeObject for FishnetEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Debug)]
struct Snapshot {
    occurrences: Vec<Occurrence>,
    located: RTree<LocatedEntry>,
    datasets: BTreeMap<i64, Dataset>,
    species: BTreeMap<i64, Species>,
    areas: BTreeMap<i64, Area>,
    imports: BTreeMap<i64, DataImport>,
    fishnet: RTree<FishnetEntry>,
}

impl Snapshot {
    fn build(data: MemoryData) -> Self {
        let located = data
            .occurrences
            .iter()
            .enumerate()
            .filter_map(|(idx, occurrence)| {
                occurrence
                    .location
                    .map(|point| GeomWithData::new([point.x(), point.y()], idx))
            })
            .collect();

        let fishnet = data
            .fishnet
            .into_iter()
            .map(|square| FishnetEntry {
                envelope: compute_envelope(&square.mpoly),
                square,
            })
            .collect();

        Self {
            located: RTree::bulk_load(located),
            fishnet: RTree::bulk_load(fishnet),
            occurrences: data.occurrences,
            datasets: data.datasets.into_iter().map(|d| (d.id, d)).collect(),
            species: data.species.into_iter().map(|s| (s.id, s)).collect(),
            areas: data.areas.into_iter().map(|a| (a.id, a)).collect(),
            imports: data.imports.into_iter().map(|i| (i.id, i)).collect(),
        }
    }

    fn to_data(&self) -> MemoryData {
        MemoryData {
            datasets: self.datasets.values().cloned().collect(),
            species: self.species.values().cloned().collect(),
            areas: self.areas.values().cloned().collect(),
            imports: self.imports.values().cloned().collect(),
            occurrences: self.occurrences.clone(),
            fishnet: self.fishnet.iter().map(|e| e.square.clone()).collect(),
        }
    }

    fn bind<'p>(&self, predicate: &'p Predicate) -> BoundPredicate<'p> {
        predicate.bind(|id| self.areas.get(&id))
    }

    fn matching<'s>(
        &'s self,
        bound: &'s BoundPredicate<'_>,
    ) -> impl Iterator<Item = &'s Occurrence> + 's {
        self.occurrences.iter().filter(move |o| bound.matches(o))
    }

    fn to_row(&self, occurrence: &Occurrence) -> OccurrenceRow {
        let (lon, lat) = occurrence
            .location
            .map(mercator_to_lonlat)
            .map_or((None, None), |(lon, lat)| (Some(lon), Some(lat)));

        OccurrenceRow {
            id: occurrence.id,
            gbif_id: occurrence.gbif_id.clone(),
            species_id: occurrence.species_id,
            species_name: self
                .species
                .get(&occurrence.species_id)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            dataset_id: occurrence.dataset_id,
            dataset_name: self
                .datasets
                .get(&occurrence.dataset_id)
                .map(|d| d.name.clone())
                .unwrap_or_default(),
            individual_count: occurrence.individual_count,
            date: occurrence.date,
            lon,
            lat,
            coordinates_uncertainty: occurrence.coordinates_uncertainty,
            municipality: occurrence.municipality.clone(),
            georeference_remarks: occurrence.georeference_remarks.clone(),
            is_catch: occurrence.is_catch,
        }
    }
}

fn compare_rows(a: &OccurrenceRow, b: &OccurrenceRow, field: OrderField) -> Ordering {
    match field {
        OrderField::Id => Ordering::Equal,
        OrderField::GbifId => a.gbif_id.cmp(&b.gbif_id),
        OrderField::Date => a.date.cmp(&b.date),
        OrderField::SpeciesName => a.species_name.cmp(&b.species_name),
        OrderField::DatasetName => a.dataset_name.cmp(&b.dataset_name),
    }
    .then(a.id.cmp(&b.id))
}

/// Snapshot-consistent in-process occurrence store.
#[derive(Debug)]
pub struct MemoryStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryData::default())
    }
}

impl MemoryStore {
    /// Indexes `data` and serves it.
    #[must_use]
    pub fn new(data: MemoryData) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(data))),
        }
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, DbError> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|e| DbError::StoreUnavailable {
                message: format!("snapshot lock poisoned: {e}"),
            })
    }

    /// Replaces every occurrence of `dataset` with `occurrences`, all owned
    /// by `import`.
    ///
    /// Readers see either the previous records or the new ones, never a mix.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::StoreUnavailable`] if the snapshot lock is
    /// poisoned.
    pub fn replace_dataset(
        &self,
        import: DataImport,
        dataset: Dataset,
        occurrences: Vec<Occurrence>,
    ) -> Result<(), DbError> {
        let mut guard = self
            .snapshot
            .write()
            .map_err(|e| DbError::StoreUnavailable {
                message: format!("snapshot lock poisoned: {e}"),
            })?;

        let mut data = guard.to_data();
        let replaced = data
            .occurrences
            .iter()
            .filter(|o| o.dataset_id == dataset.id)
            .count();
        data.occurrences.retain(|o| o.dataset_id != dataset.id);
        let added = occurrences.len();
        data.occurrences
            .extend(occurrences.into_iter().map(|occurrence| Occurrence {
                dataset_id: dataset.id,
                data_import_id: import.id,
                ..occurrence
            }));

        data.datasets.retain(|d| d.id != dataset.id);
        data.imports.retain(|i| i.id != import.id);

        log::info!(
            "Replacing dataset {} ({}): {replaced} occurrences out, {added} in (import {})",
            dataset.id,
            dataset.name,
            import.id
        );

        data.datasets.push(dataset);
        data.imports.push(import);

        *guard = Arc::new(Snapshot::build(data));
        Ok(())
    }
}

#[async_trait]
impl OccurrenceStore for MemoryStore {
    async fn estimated_extent(&self) -> Result<Option<Rect<f64>>, DbError> {
        let snapshot = self.snapshot()?;
        if snapshot.located.size() == 0 {
            return Ok(None);
        }
        let envelope = snapshot.located.root().envelope();
        let (lower, upper) = (envelope.lower(), envelope.upper());
        Ok(Some(Rect::new((lower[0], lower[1]), (upper[0], upper[1]))))
    }

    async fn hex_counts(
        &self,
        predicate: &Predicate,
        grid: HexGrid,
        extent: Rect<f64>,
    ) -> Result<Vec<HexCount>, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);

        // A hexagon reaching into the extent has its points within one
        // diameter of it.
        let search = rect_to_envelope(&expand_rect(&extent, 2.0 * grid.size()));
        let mut counts: BTreeMap<HexCell, u64> = BTreeMap::new();

        for entry in snapshot.located.locate_in_envelope(&search) {
            if !bound.matches(&snapshot.occurrences[entry.data]) {
                continue;
            }
            let [x, y] = *entry.geom();
            *counts.entry(grid.cell_at(Point::new(x, y))).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .filter(|(cell, _)| grid.intersects(*cell, &extent))
            .map(|(cell, count)| HexCount {
                geometry: MultiPolygon(vec![grid.polygon(cell)]),
                count,
            })
            .collect())
    }

    async fn fishnet_counts(
        &self,
        predicate: &Predicate,
        extent: Rect<f64>,
    ) -> Result<Vec<FishnetCount>, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);

        let mut cells: Vec<FishnetCount> = snapshot
            .fishnet
            .locate_in_envelope_intersecting(&rect_to_envelope(&extent))
            .map(|entry| {
                let count = snapshot
                    .located
                    .locate_in_envelope(&entry.envelope)
                    .filter(|located| {
                        let [x, y] = *located.geom();
                        entry.square.mpoly.intersects(&Point::new(x, y))
                            && bound.matches(&snapshot.occurrences[located.data])
                    })
                    .count();

                FishnetCount {
                    id: entry.square.id,
                    geometry: entry.square.mpoly.clone(),
                    count: count as u64,
                    waterway_length_in_meters: entry.square.waterway_length_in_meters,
                }
            })
            .collect();

        cells.sort_by_key(|cell| cell.id);
        Ok(cells)
    }

    async fn list_occurrences(
        &self,
        predicate: &Predicate,
        query: &OccurrenceQuery,
    ) -> Result<OccurrencePage, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);

        let mut rows: Vec<OccurrenceRow> = snapshot
            .matching(&bound)
            .map(|o| snapshot.to_row(o))
            .collect();
        rows.sort_by(|a, b| {
            let ordering = compare_rows(a, b, query.order.field);
            if query.order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let total_count = rows.len() as u64;
        let window = PageWindow::new(total_count, query.limit, query.page_number);
        let results = rows
            .into_iter()
            .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
            .take(window.limit as usize)
            .collect();

        Ok(OccurrencePage {
            results,
            window,
            total_count,
        })
    }

    async fn count_occurrences(&self, predicate: &Predicate) -> Result<u64, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);
        Ok(snapshot.matching(&bound).count() as u64)
    }

    async fn date_range(&self, predicate: &Predicate) -> Result<DateRange, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);
        Ok(snapshot
            .matching(&bound)
            .fold(DateRange::default(), |range, o| DateRange {
                min: Some(range.min.map_or(o.date, |min| min.min(o.date))),
                max: Some(range.max.map_or(o.date, |max| max.max(o.date))),
            }))
    }

    async fn monthly_histogram(
        &self,
        predicate: &Predicate,
    ) -> Result<Vec<MonthlyCount>, DbError> {
        let snapshot = self.snapshot()?;
        let bound = snapshot.bind(predicate);

        let mut months: BTreeMap<(i32, u32), u64> = BTreeMap::new();
        for occurrence in snapshot.matching(&bound) {
            *months
                .entry((occurrence.date.year(), occurrence.date.month()))
                .or_default() += 1;
        }

        Ok(months
            .into_iter()
            .map(|((year, month), count)| MonthlyCount { year, month, count })
            .collect())
    }

    async fn datasets(&self) -> Result<Vec<Dataset>, DbError> {
        let snapshot = self.snapshot()?;
        let mut datasets: Vec<Dataset> = snapshot.datasets.values().cloned().collect();
        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datasets)
    }

    async fn species(&self) -> Result<Vec<Species>, DbError> {
        let snapshot = self.snapshot()?;
        let mut species: Vec<Species> = snapshot.species.values().cloned().collect();
        species.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(species)
    }

    async fn areas(&self) -> Result<Vec<AreaSummary>, DbError> {
        let snapshot = self.snapshot()?;
        let mut areas: Vec<AreaSummary> = snapshot
            .areas
            .values()
            .map(|a| AreaSummary {
                id: a.id,
                name: a.name.clone(),
            })
            .collect();
        areas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(areas)
    }

    async fn area(&self, id: i64) -> Result<Option<Area>, DbError> {
        Ok(self.snapshot()?.areas.get(&id).cloned())
    }
}
