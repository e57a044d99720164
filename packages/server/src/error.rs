//! Mapping of library errors onto HTTP responses.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use mica_database::DbError;
use mica_filter::FilterError;
use mica_server_models::ApiErrorBody;
use mica_tiles::TileError;

/// Any failure a handler can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request parameter.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Tile addressing, aggregation or encoding failure.
    #[error(transparent)]
    Tile(#[from] TileError),

    /// The store failed outside of tile serving.
    #[error(transparent)]
    Store(#[from] DbError),

    /// The addressed record does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

impl ApiError {
    fn field(&self) -> Option<String> {
        match self {
            Self::Filter(e) => Some(e.field().to_string()),
            _ => None,
        }
    }
}

fn store_status(error: &DbError) -> StatusCode {
    match error {
        DbError::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
        DbError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Filter(_) => StatusCode::BAD_REQUEST,
            Self::Tile(TileError::UnknownAggregationKind(_)) | Self::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Tile(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Tile(TileError::Store(e)) | Self::Store(e) => store_status(e),
            Self::Tile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {self}");
        } else {
            log::debug!("Rejected request: {self}");
        }

        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
            field: self.field(),
        })
    }
}

#[cfg(test)]
mod tests {
    use mica_filter::RequestParams;
    use mica_spatial::TileCoord;

    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        let params: RequestParams = [("datasetId", "abc")].into_iter().collect();
        let filter = ApiError::from(params.filters().unwrap_err());
        assert_eq!(filter.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(filter.field().as_deref(), Some("datasetId"));

        let zoom = ApiError::from(TileError::UnsupportedZoomLevel(20));
        assert_eq!(zoom.status_code(), StatusCode::BAD_REQUEST);

        let tile = ApiError::from(TileError::from(TileCoord::new(2, 4, 0).unwrap_err()));
        assert_eq!(tile.status_code(), StatusCode::BAD_REQUEST);

        let kind = ApiError::from(TileError::UnknownAggregationKind("dots".to_string()));
        assert_eq!(kind.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_errors_map_to_5xx() {
        assert_eq!(
            ApiError::from(DbError::QueryTimeout).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(TileError::Store(DbError::QueryTimeout)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(DbError::StoreUnavailable {
                message: "lock poisoned".to_string(),
            })
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(DbError::Conversion {
                message: "bad row".to_string(),
            })
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
