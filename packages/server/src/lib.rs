#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web server for occurrence vector tiles and statistics.
//!
//! Serves hexagon and fishnet vector tiles (`/tiles/...`), the legend range
//! (`/occ_min_max_in_grid/`) and the JSON API under `/api` from a `PostGIS`
//! store.

pub mod config;
pub mod error;
mod handlers;

pub use config::ServerConfig;
pub use error::ApiError;
pub use handlers::MVT_CONTENT_TYPE;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use mica_database::{OccurrenceStore, PostgisStore, db, run_migrations};
use mica_tiles::{TileCache, TileService};

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Tile and range computation over the store.
    pub tiles: TileService,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn OccurrenceStore>, cache: TileCache) -> Self {
        Self {
            tiles: TileService::new(store, cache),
        }
    }

    /// The store behind the tile service.
    #[must_use]
    pub fn store(&self) -> &dyn OccurrenceStore {
        self.tiles.store()
    }
}

/// Registers every route. Expects [`AppState`] as `web::Data`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/occurrences_json", web::get().to(handlers::occurrences))
            .route(
                "/occurrences_counter",
                web::get().to(handlers::occurrences_counter),
            )
            .route(
                "/occurrences_date_range",
                web::get().to(handlers::occurrences_date_range),
            )
            .route(
                "/occurrences_monthly_histogram",
                web::get().to(handlers::occurrences_monthly_histogram),
            )
            .route("/available_datasets", web::get().to(handlers::datasets))
            .route("/available_species", web::get().to(handlers::species))
            .route("/areas", web::get().to(handlers::areas))
            .route("/areas/{id}", web::get().to(handlers::area))
            .route(
                "/datasets/{id}/replaced",
                web::post().to(handlers::dataset_replaced),
            ),
    )
    .route(
        "/tiles/{kind}/{zoom}/{x}/{y}.mvt",
        web::get().to(handlers::tile),
    )
    .route("/occ_min_max_in_grid/", web::get().to(handlers::count_range))
    .route("/occ_min_max_in_grid", web::get().to(handlers::count_range));
}

/// Starts the occurrence map server.
///
/// Reads [`ServerConfig`] from the environment, connects to `PostGIS`, runs
/// migrations and serves until shut down. The caller provides the async
/// runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the database connection or the migrations fail.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let config = ServerConfig::from_env();

    log::info!("Connecting to database...");
    let db_conn = db::connect(&config.database_url, config.statement_timeout)
        .await
        .expect("Failed to connect to database");

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .expect("Failed to run migrations");

    let store = PostgisStore::new(Arc::from(db_conn), config.statement_timeout);
    let cache = TileCache::new(config.tile_cache_ttl, config.tile_cache_max_entries);
    if !cache.is_enabled() {
        log::info!("Tile cache disabled");
    }
    let state = web::Data::new(AppState::new(Arc::new(store), cache));

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
