#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Occurrence selection and the persisted spatial store.
//!
//! [`predicate`] turns a [`mica_filter::FilterSet`] into the one
//! [`predicate::Predicate`] every read path uses. [`store`] defines the
//! store contract; [`postgis`] implements it on `PostGIS` through
//! `switchy_database` raw queries with bound parameters, and [`memory`]
//! implements it in-process with `rstar`/`geo` for tests and embedding.

pub mod db;
pub mod memory;
pub mod postgis;
pub mod predicate;
pub mod store;

pub use memory::{MemoryData, MemoryStore};
pub use postgis::PostgisStore;
pub use predicate::Predicate;
pub use store::OccurrenceStore;

use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// The store did not answer within the statement timeout.
    #[error("Query timed out")]
    QueryTimeout,

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    /// Classifies a driver error, recognizing server-side statement
    /// cancellation (`SQLSTATE 57014`) as [`DbError::QueryTimeout`].
    #[must_use]
    pub fn from_query(error: switchy_database::DatabaseError) -> Self {
        let message = error.to_string();
        if message.contains("statement timeout") || message.contains("57014") {
            Self::QueryTimeout
        } else {
            Self::Database(error)
        }
    }

    /// Whether the failure is transient and the client may retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::QueryTimeout | Self::StoreUnavailable { .. })
    }
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}
