//! HTTP handler functions for the occurrence map API.

use std::str::FromStr;

use actix_web::{HttpResponse, web};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, feature::Id};
use mica_database::Predicate;
use mica_database_models::{DEFAULT_PAGE_SIZE, OccurrenceOrder, OccurrenceQuery};
use mica_filter::{FilterError, RequestParams};
use mica_occurrence_models::Area;
use mica_server_models::{ApiCount, ApiHealth, ApiInvalidation, ApiOccurrencePage};
use mica_spatial::TileCoord;
use mica_spatial::projection::multipolygon_to_wgs84;
use mica_tiles::{AggregationKind, TileError};

use crate::AppState;
use crate::error::ApiError;

/// Content type of encoded tiles.
pub const MVT_CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

type QueryPairs = web::Query<Vec<(String, String)>>;

fn request_params(query: QueryPairs) -> RequestParams {
    query.into_inner().into_iter().collect()
}

fn invalid(field: &str, value: &str, reason: &str) -> FilterError {
    FilterError::InvalidFilterValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn path_number<T: FromStr>(field: &str, raw: &str) -> Result<T, FilterError> {
    raw.parse()
        .map_err(|_| invalid(field, raw, "expected a non-negative integer"))
}

fn predicate(params: &RequestParams) -> Result<Predicate, ApiError> {
    Ok(Predicate::from_filters(&params.filters()?))
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /tiles/{kind}/{zoom}/{x}/{y}.mvt`
///
/// The aggregation kind and tile address are validated before the filters,
/// and both before the store is touched. An empty body means the tile has
/// no data.
pub async fn tile(
    state: web::Data<AppState>,
    path: web::Path<(String, String, String, String)>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let (kind, zoom, x, y) = path.into_inner();
    let kind = AggregationKind::parse(&kind)?;
    let tile = TileCoord::new(
        path_number("zoom", &zoom)?,
        path_number("x", &x)?,
        path_number("y", &y)?,
    )
    .map_err(TileError::from)?;
    let filters = request_params(query).filters()?;

    let payload = state.tiles.tile(kind, &filters, tile).await?;

    Ok(HttpResponse::Ok()
        .content_type(MVT_CONTENT_TYPE)
        .body(payload.to_vec()))
}

/// `GET /occ_min_max_in_grid/?zoom=`
///
/// Smallest and largest hexagon count over the whole data extent, for the
/// map legend. Both are `null` when nothing matches.
pub async fn count_range(
    state: web::Data<AppState>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let params = request_params(query);
    let zoom = params
        .parse_opt::<u8>("zoom")?
        .ok_or_else(|| invalid("zoom", "", "required"))?;
    let filters = params.filters()?;

    let range = state.tiles.count_range(&filters, zoom).await?;

    Ok(HttpResponse::Ok().json(range))
}

/// `GET /api/occurrences_json?order=&limit=&page_number=`
pub async fn occurrences(
    state: web::Data<AppState>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let params = request_params(query);
    let order = params
        .value("order")
        .map(|raw| {
            raw.parse::<OccurrenceOrder>()
                .map_err(|_| invalid("order", raw, "unknown sort column"))
        })
        .transpose()?
        .unwrap_or_default();
    let query = OccurrenceQuery {
        order,
        limit: params.parse_opt("limit")?.unwrap_or(DEFAULT_PAGE_SIZE),
        page_number: params.parse_opt("page_number")?.unwrap_or(1),
    };
    let predicate = predicate(&params)?;

    let page = state.store().list_occurrences(&predicate, &query).await?;

    Ok(HttpResponse::Ok().json(ApiOccurrencePage::from(page)))
}

/// `GET /api/occurrences_counter`
pub async fn occurrences_counter(
    state: web::Data<AppState>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let predicate = predicate(&request_params(query))?;
    let count = state.store().count_occurrences(&predicate).await?;
    Ok(HttpResponse::Ok().json(ApiCount { count }))
}

/// `GET /api/occurrences_date_range`
pub async fn occurrences_date_range(
    state: web::Data<AppState>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let predicate = predicate(&request_params(query))?;
    let range = state.store().date_range(&predicate).await?;
    Ok(HttpResponse::Ok().json(range))
}

/// `GET /api/occurrences_monthly_histogram`
pub async fn occurrences_monthly_histogram(
    state: web::Data<AppState>,
    query: QueryPairs,
) -> Result<HttpResponse, ApiError> {
    let predicate = predicate(&request_params(query))?;
    let histogram = state.store().monthly_histogram(&predicate).await?;
    Ok(HttpResponse::Ok().json(histogram))
}

/// `GET /api/available_datasets`
pub async fn datasets(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.store().datasets().await?))
}

/// `GET /api/available_species`
pub async fn species(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.store().species().await?))
}

/// `GET /api/areas`
pub async fn areas(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.store().areas().await?))
}

/// `GET /api/areas/{id}`
///
/// The area as a single-feature GeoJSON collection in WGS84.
pub async fn area(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let area = state
        .store()
        .area(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Area {id}")))?;

    Ok(HttpResponse::Ok().json(area_feature_collection(&area)))
}

fn area_feature_collection(area: &Area) -> FeatureCollection {
    let mut properties = JsonObject::new();
    properties.insert("id".to_string(), serde_json::Value::from(area.id));
    properties.insert("name".to_string(), serde_json::Value::from(area.name.clone()));

    let feature = Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(
            &multipolygon_to_wgs84(&area.mpoly),
        ))),
        id: Some(Id::Number(area.id.into())),
        properties: Some(properties),
        foreign_members: None,
    };

    FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members: None,
    }
}

/// `POST /api/datasets/{id}/replaced`
///
/// Ingestion signal that a dataset's occurrences were swapped out.
pub async fn dataset_replaced(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> HttpResponse {
    let dataset_id = path.into_inner();
    let invalidated_tiles = state.tiles.dataset_replaced(dataset_id);
    log::info!("Dataset {dataset_id} replaced, dropped {invalidated_tiles} cached tiles");

    HttpResponse::Ok().json(ApiInvalidation {
        dataset_id,
        invalidated_tiles,
    })
}
