//! `PostGIS` implementation of [`OccurrenceStore`].
//!
//! Spatial work is delegated to `PostGIS` (`ST_HexagonGrid`,
//! `ST_MakeEnvelope`, `ST_Union`, `ST_Intersects`) through
//! `query_raw_params()`. Filter values only ever travel as bound
//! [`DatabaseValue`]s rendered by [`Predicate::to_sql`].

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use geo::Rect;
use mica_database_models::{
    AreaSummary, DateRange, FishnetCount, HexCount, MonthlyCount, OccurrencePage, OccurrenceQuery,
    OccurrenceRow, OrderField, PageWindow,
};
use mica_filter::DATE_FORMAT;
use mica_occurrence_models::{Area, Dataset, PLANAR_SRID, Species};
use mica_spatial::{HexGrid, parse_geojson_to_multipolygon};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::{DbError, OccurrenceStore, Predicate};

/// Alias of the occurrence table in every generated statement.
const OCC: &str = "occ";

/// Occurrence store backed by a `PostGIS` database.
pub struct PostgisStore {
    db: Arc<dyn Database>,
    timeout: Duration,
}

impl std::fmt::Debug for PostgisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgisStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PostgisStore {
    /// Wraps a connection. Every query is abandoned with
    /// [`DbError::QueryTimeout`] after `timeout`.
    #[must_use]
    pub fn new(db: Arc<dyn Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn query(&self, sql: &str, params: &[DatabaseValue]) -> Result<Vec<Row>, DbError> {
        log::trace!("query: {sql}");
        match tokio::time::timeout(self.timeout, self.db.query_raw_params(sql, params)).await {
            Ok(rows) => rows.map_err(DbError::from_query),
            Err(_) => Err(DbError::QueryTimeout),
        }
    }
}

fn envelope_params(extent: &Rect<f64>) -> [DatabaseValue; 4] {
    [
        DatabaseValue::Real64(extent.min().x),
        DatabaseValue::Real64(extent.min().y),
        DatabaseValue::Real64(extent.max().x),
        DatabaseValue::Real64(extent.max().y),
    ]
}

/// Planner estimate of the occurrence extent, falling back to an exact scan
/// when statistics are missing. `NULL` when nothing is located.
const ESTIMATED_EXTENT: &str = "COALESCE(
    ST_EstimatedExtent('occurrences', 'location'),
    (SELECT ST_Extent(location) FROM occurrences)
)";

fn hex_counts_sql(
    predicate: &Predicate,
    grid: HexGrid,
    extent: &Rect<f64>,
) -> (String, Vec<DatabaseValue>) {
    let filter = predicate.to_sql(OCC, 6);
    let sql = hex_grid_sql(
        &format!("ST_MakeEnvelope($2, $3, $4, $5, {PLANAR_SRID})"),
        &filter.condition,
    );

    let mut params = vec![DatabaseValue::Real64(grid.size())];
    params.extend(envelope_params(extent));
    params.extend(filter.params);
    (sql, params)
}

/// Same as [`hex_counts_sql`] but the grid bounds come from
/// [`ESTIMATED_EXTENT`] inside the statement.
fn hex_counts_estimated_sql(predicate: &Predicate, grid: HexGrid) -> (String, Vec<DatabaseValue>) {
    let filter = predicate.to_sql(OCC, 2);
    let sql = hex_grid_sql(
        &format!("ST_SetSRID({ESTIMATED_EXTENT}::box2d::geometry, {PLANAR_SRID})"),
        &filter.condition,
    );

    let mut params = vec![DatabaseValue::Real64(grid.size())];
    params.extend(filter.params);
    (sql, params)
}

fn hex_grid_sql(bounds: &str, condition: &str) -> String {
    format!(
        "WITH filtered_occurrences AS (
             SELECT {OCC}.location FROM occurrences AS {OCC}
             WHERE {OCC}.location IS NOT NULL AND {condition}
         )
         SELECT COUNT(*) AS count, ST_AsGeoJSON(hexes.geom) AS geojson
         FROM ST_HexagonGrid($1, {bounds}) AS hexes
         INNER JOIN filtered_occurrences
             ON ST_Intersects(filtered_occurrences.location, hexes.geom)
         GROUP BY hexes.geom"
    )
}

fn fishnet_counts_sql(predicate: &Predicate, extent: &Rect<f64>) -> (String, Vec<DatabaseValue>) {
    let filter = predicate.to_sql(OCC, 5);
    let sql = format!(
        "WITH filtered_occurrences AS (
             SELECT {OCC}.location FROM occurrences AS {OCC}
             WHERE {OCC}.location IS NOT NULL AND {condition}
         )
         SELECT f.id, f.waterway_length_in_meters,
                COUNT(filtered_occurrences.location) AS count,
                ST_AsGeoJSON(f.mpoly) AS geojson
         FROM fishnet_squares AS f
         LEFT JOIN filtered_occurrences
             ON ST_Intersects(filtered_occurrences.location, f.mpoly)
         WHERE f.mpoly && ST_MakeEnvelope($1, $2, $3, $4, {PLANAR_SRID})
         GROUP BY f.id
         ORDER BY f.id",
        condition = filter.condition,
    );

    let mut params = envelope_params(extent).to_vec();
    params.extend(filter.params);
    (sql, params)
}

fn order_column(field: OrderField) -> &'static str {
    match field {
        OrderField::Id => "occ.id",
        OrderField::GbifId => "occ.gbif_id",
        OrderField::Date => "occ.date",
        OrderField::SpeciesName => "s.name",
        OrderField::DatasetName => "d.name",
    }
}

fn list_occurrences_sql(
    predicate: &Predicate,
    query: &OccurrenceQuery,
    window: &PageWindow,
) -> (String, Vec<DatabaseValue>) {
    let filter = predicate.to_sql(OCC, 1);
    let direction = if query.order.descending { "DESC" } else { "ASC" };

    let mut sql = format!(
        "SELECT {OCC}.id, {OCC}.gbif_id, {OCC}.species_id, s.name AS species_name,
                {OCC}.dataset_id, d.name AS dataset_name, {OCC}.individual_count,
                to_char({OCC}.date, 'YYYY-MM-DD') AS date,
                ST_X(ST_Transform({OCC}.location, 4326)) AS lon,
                ST_Y(ST_Transform({OCC}.location, 4326)) AS lat,
                {OCC}.coordinates_uncertainty_in_meters, {OCC}.municipality,
                {OCC}.georeference_remarks, {OCC}.is_catch
         FROM occurrences AS {OCC}
         JOIN species AS s ON s.id = {OCC}.species_id
         JOIN datasets AS d ON d.id = {OCC}.dataset_id
         WHERE {condition}
         ORDER BY {column} {direction}, {OCC}.id {direction}",
        condition = filter.condition,
        column = order_column(query.order.field),
    );

    let idx = filter.next_param;
    let mut params = filter.params;
    let _ = write!(sql, " LIMIT ${idx} OFFSET ${}", idx + 1);
    params.push(DatabaseValue::Int64(i64::from(window.limit)));
    params.push(DatabaseValue::Int64(
        i64::try_from(window.offset).unwrap_or(i64::MAX),
    ));
    (sql, params)
}

fn parse_date(value: Option<String>, column: &str) -> Result<Option<NaiveDate>, DbError> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| DbError::Conversion {
                message: format!("Failed to parse {column} '{s}': {e}"),
            })
        })
        .transpose()
}

fn row_count(row: &Row, column: &str) -> Result<u64, DbError> {
    let count: i64 = row.to_value(column).map_err(|e| DbError::Conversion {
        message: format!("Failed to parse {column}: {e}"),
    })?;
    u64::try_from(count).map_err(|_| DbError::Conversion {
        message: format!("Negative {column}: {count}"),
    })
}

fn row_id(row: &Row, column: &str) -> Result<i64, DbError> {
    row.to_value(column).map_err(|e| DbError::Conversion {
        message: format!("Failed to parse {column}: {e}"),
    })
}

fn row_geometry(row: &Row) -> Result<geo::MultiPolygon<f64>, DbError> {
    let geojson: String = row.to_value("geojson").map_err(|e| DbError::Conversion {
        message: format!("Failed to read cell geometry: {e}"),
    })?;
    parse_geojson_to_multipolygon(&geojson).ok_or_else(|| DbError::Conversion {
        message: format!("Failed to parse cell geometry: {geojson}"),
    })
}

fn row_to_occurrence(row: &Row) -> Result<OccurrenceRow, DbError> {
    let date = parse_date(row.to_value("date").unwrap_or(None), "date")?.ok_or_else(|| {
        DbError::Conversion {
            message: "Occurrence without a date".to_string(),
        }
    })?;
    let individual_count: i32 = row.to_value("individual_count").unwrap_or(1);

    Ok(OccurrenceRow {
        id: row_id(row, "id")?,
        gbif_id: row.to_value("gbif_id").unwrap_or_default(),
        species_id: row_id(row, "species_id")?,
        species_name: row.to_value("species_name").unwrap_or_default(),
        dataset_id: row_id(row, "dataset_id")?,
        dataset_name: row.to_value("dataset_name").unwrap_or_default(),
        individual_count: u32::try_from(individual_count).unwrap_or(1),
        date,
        lon: row.to_value("lon").unwrap_or(None),
        lat: row.to_value("lat").unwrap_or(None),
        coordinates_uncertainty: row
            .to_value("coordinates_uncertainty_in_meters")
            .unwrap_or(None),
        municipality: row.to_value("municipality").unwrap_or(None),
        georeference_remarks: row.to_value("georeference_remarks").unwrap_or(None),
        is_catch: row.to_value("is_catch").unwrap_or(false),
    })
}

#[async_trait]
impl OccurrenceStore for PostgisStore {
    async fn estimated_extent(&self) -> Result<Option<Rect<f64>>, DbError> {
        let sql = format!(
            "SELECT ST_XMin(ext) AS xmin, ST_YMin(ext) AS ymin,
                    ST_XMax(ext) AS xmax, ST_YMax(ext) AS ymax
             FROM (SELECT {ESTIMATED_EXTENT}::box3d AS ext) AS extent"
        );
        let rows = self.query(&sql, &[]).await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let corners: [Option<f64>; 4] = [
            row.to_value("xmin").unwrap_or(None),
            row.to_value("ymin").unwrap_or(None),
            row.to_value("xmax").unwrap_or(None),
            row.to_value("ymax").unwrap_or(None),
        ];

        Ok(match corners {
            [Some(xmin), Some(ymin), Some(xmax), Some(ymax)] => {
                Some(Rect::new((xmin, ymin), (xmax, ymax)))
            }
            _ => None,
        })
    }

    async fn hex_counts(
        &self,
        predicate: &Predicate,
        grid: HexGrid,
        extent: Rect<f64>,
    ) -> Result<Vec<HexCount>, DbError> {
        let (sql, params) = hex_counts_sql(predicate, grid, &extent);
        let rows = self.query(&sql, &params).await?;

        rows.iter()
            .map(|row| {
                Ok(HexCount {
                    geometry: row_geometry(row)?,
                    count: row_count(row, "count")?,
                })
            })
            .collect()
    }

    async fn hex_counts_estimated(
        &self,
        predicate: &Predicate,
        grid: HexGrid,
    ) -> Result<Vec<HexCount>, DbError> {
        let (sql, params) = hex_counts_estimated_sql(predicate, grid);
        let rows = self.query(&sql, &params).await?;

        rows.iter()
            .map(|row| {
                Ok(HexCount {
                    geometry: row_geometry(row)?,
                    count: row_count(row, "count")?,
                })
            })
            .collect()
    }

    async fn fishnet_counts(
        &self,
        predicate: &Predicate,
        extent: Rect<f64>,
    ) -> Result<Vec<FishnetCount>, DbError> {
        let (sql, params) = fishnet_counts_sql(predicate, &extent);
        let rows = self.query(&sql, &params).await?;

        rows.iter()
            .map(|row| {
                Ok(FishnetCount {
                    id: row_id(row, "id")?,
                    geometry: row_geometry(row)?,
                    count: row_count(row, "count")?,
                    waterway_length_in_meters: row
                        .to_value("waterway_length_in_meters")
                        .map_err(|e| DbError::Conversion {
                            message: format!("Failed to parse waterway length: {e}"),
                        })?,
                })
            })
            .collect()
    }

    async fn list_occurrences(
        &self,
        predicate: &Predicate,
        query: &OccurrenceQuery,
    ) -> Result<OccurrencePage, DbError> {
        let total_count = self.count_occurrences(predicate).await?;
        let window = PageWindow::new(total_count, query.limit, query.page_number);

        let (sql, params) = list_occurrences_sql(predicate, query, &window);
        let rows = self.query(&sql, &params).await?;
        let results = rows
            .iter()
            .map(row_to_occurrence)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OccurrencePage {
            results,
            window,
            total_count,
        })
    }

    async fn count_occurrences(&self, predicate: &Predicate) -> Result<u64, DbError> {
        let filter = predicate.to_sql(OCC, 1);
        let sql = format!(
            "SELECT COUNT(*) AS count FROM occurrences AS {OCC} WHERE {}",
            filter.condition
        );
        let rows = self.query(&sql, &filter.params).await?;
        rows.first().map_or(Ok(0), |row| row_count(row, "count"))
    }

    async fn date_range(&self, predicate: &Predicate) -> Result<DateRange, DbError> {
        let filter = predicate.to_sql(OCC, 1);
        let sql = format!(
            "SELECT to_char(MIN({OCC}.date), 'YYYY-MM-DD') AS min_date,
                    to_char(MAX({OCC}.date), 'YYYY-MM-DD') AS max_date
             FROM occurrences AS {OCC} WHERE {}",
            filter.condition
        );
        let rows = self.query(&sql, &filter.params).await?;

        let Some(row) = rows.first() else {
            return Ok(DateRange::default());
        };

        Ok(DateRange {
            min: parse_date(row.to_value("min_date").unwrap_or(None), "min_date")?,
            max: parse_date(row.to_value("max_date").unwrap_or(None), "max_date")?,
        })
    }

    async fn monthly_histogram(
        &self,
        predicate: &Predicate,
    ) -> Result<Vec<MonthlyCount>, DbError> {
        let filter = predicate.to_sql(OCC, 1);
        let sql = format!(
            "SELECT EXTRACT(YEAR FROM {OCC}.date)::INT AS year,
                    EXTRACT(MONTH FROM {OCC}.date)::INT AS month,
                    COUNT(*) AS count
             FROM occurrences AS {OCC} WHERE {}
             GROUP BY 1, 2
             ORDER BY 1, 2",
            filter.condition
        );
        let rows = self.query(&sql, &filter.params).await?;

        rows.iter()
            .map(|row| {
                let month: i32 = row.to_value("month").map_err(|e| DbError::Conversion {
                    message: format!("Failed to parse histogram month: {e}"),
                })?;
                Ok(MonthlyCount {
                    year: row.to_value("year").map_err(|e| DbError::Conversion {
                        message: format!("Failed to parse histogram year: {e}"),
                    })?,
                    month: u32::try_from(month).map_err(|_| DbError::Conversion {
                        message: format!("Invalid histogram month: {month}"),
                    })?,
                    count: row_count(row, "count")?,
                })
            })
            .collect()
    }

    async fn datasets(&self) -> Result<Vec<Dataset>, DbError> {
        let rows = self
            .query("SELECT id, name, gbif_id FROM datasets ORDER BY name", &[])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Dataset {
                    id: row_id(row, "id")?,
                    name: row.to_value("name").unwrap_or_default(),
                    gbif_id: row.to_value("gbif_id").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn species(&self) -> Result<Vec<Species>, DbError> {
        let rows = self
            .query("SELECT id, name FROM species ORDER BY name", &[])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Species {
                    id: row_id(row, "id")?,
                    name: row.to_value("name").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn areas(&self) -> Result<Vec<AreaSummary>, DbError> {
        let rows = self
            .query("SELECT id, name FROM areas ORDER BY name", &[])
            .await?;

        rows.iter()
            .map(|row| {
                Ok(AreaSummary {
                    id: row_id(row, "id")?,
                    name: row.to_value("name").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn area(&self, id: i64) -> Result<Option<Area>, DbError> {
        let rows = self
            .query(
                "SELECT id, name, ST_AsGeoJSON(mpoly) AS geojson FROM areas WHERE id = $1",
                &[DatabaseValue::Int64(id)],
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        Ok(Some(Area {
            id: row_id(row, "id")?,
            name: row.to_value("name").unwrap_or_default(),
            mpoly: row_geometry(row)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use mica_database_models::OccurrenceOrder;
    use mica_filter::FilterSet;

    use super::*;

    fn extent() -> Rect<f64> {
        Rect::new((0.0, 0.0), (1_000.0, 1_000.0))
    }

    #[test]
    fn hex_query_binds_grid_before_filters() {
        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_dataset(7));
        let grid = HexGrid::new(500.0).unwrap();

        let (sql, params) = hex_counts_sql(&predicate, grid, &extent());

        assert!(sql.contains("ST_HexagonGrid($1, ST_MakeEnvelope($2, $3, $4, $5, 3857))"));
        assert!(sql.contains("occ.dataset_id = $6"));
        assert!(sql.contains("GROUP BY hexes.geom"));
        assert_eq!(params.len(), 6);
        assert!(matches!(params[5], DatabaseValue::Int64(7)));
    }

    #[test]
    fn estimated_hex_query_resolves_extent_in_statement() {
        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_dataset(7));
        let grid = HexGrid::new(500.0).unwrap();

        let (sql, params) = hex_counts_estimated_sql(&predicate, grid);

        assert!(sql.contains("ST_HexagonGrid($1, ST_SetSRID(COALESCE("));
        assert!(sql.contains("ST_EstimatedExtent('occurrences', 'location')"));
        assert!(!sql.contains("ST_MakeEnvelope"));
        assert!(sql.contains("occ.dataset_id = $2"));
        assert_eq!(params.len(), 2);
        assert!(matches!(params[0], DatabaseValue::Real64(_)));
        assert!(matches!(params[1], DatabaseValue::Int64(7)));
    }

    #[test]
    fn fishnet_query_keeps_empty_cells() {
        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_species(3));

        let (sql, params) = fishnet_counts_sql(&predicate, &extent());

        assert!(sql.contains("LEFT JOIN filtered_occurrences"));
        assert!(sql.contains("COUNT(filtered_occurrences.location)"));
        assert!(sql.contains("occ.species_id = $5"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn listing_appends_limit_and_offset_after_filters() {
        let predicate = Predicate::from_filters(&FilterSet::unfiltered().with_areas([1, 2]));
        let query = OccurrenceQuery {
            order: "-speciesName".parse::<OccurrenceOrder>().unwrap(),
            limit: 10,
            page_number: 3,
        };
        let window = PageWindow::new(100, query.limit, query.page_number);

        let (sql, params) = list_occurrences_sql(&predicate, &query, &window);

        assert!(sql.contains("ORDER BY s.name DESC, occ.id DESC"));
        assert!(sql.ends_with(" LIMIT $3 OFFSET $4"));
        assert_eq!(params.len(), 4);
        assert!(matches!(params[3], DatabaseValue::Int64(20)));
    }

    #[test]
    fn unfiltered_listing_has_no_filter_params() {
        let predicate = Predicate::default();
        let query = OccurrenceQuery::default();
        let window = PageWindow::new(0, query.limit, query.page_number);

        let (sql, params) = list_occurrences_sql(&predicate, &query, &window);

        assert!(sql.contains("WHERE TRUE"));
        assert!(sql.contains("ORDER BY occ.date ASC"));
        assert_eq!(params.len(), 2);
    }

    fn row(columns: Vec<(&str, DatabaseValue)>) -> Row {
        Row {
            columns: columns
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    #[test]
    fn undecodable_cells_are_errors_not_empty_cells() {
        let good = row(vec![
            ("count", DatabaseValue::Int64(3)),
            (
                "geojson",
                DatabaseValue::String(
                    r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#.to_string(),
                ),
            ),
        ]);
        assert_eq!(row_count(&good, "count").unwrap(), 3);
        assert_eq!(row_geometry(&good).unwrap().0.len(), 1);

        let missing = row(vec![("id", DatabaseValue::Int64(1))]);
        assert!(matches!(
            row_count(&missing, "count"),
            Err(DbError::Conversion { .. })
        ));
        assert!(matches!(
            row_geometry(&missing),
            Err(DbError::Conversion { .. })
        ));
        assert!(matches!(
            row_id(&missing, "dataset_id"),
            Err(DbError::Conversion { .. })
        ));

        let negative = row(vec![("count", DatabaseValue::Int64(-1))]);
        assert!(row_count(&negative, "count").is_err());

        let garbled = row(vec![("geojson", DatabaseValue::String("POINT(0 0)".to_string()))]);
        assert!(row_geometry(&garbled).is_err());
    }

    #[test]
    fn parses_store_dates() {
        assert_eq!(
            parse_date(Some("2021-03-04".to_string()), "date").unwrap(),
            NaiveDate::from_ymd_opt(2021, 3, 4)
        );
        assert_eq!(parse_date(None, "date").unwrap(), None);
        assert!(parse_date(Some("04/03/2021".to_string()), "date").is_err());
    }
}
