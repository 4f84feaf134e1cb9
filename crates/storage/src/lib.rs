//! SeaORM-backed storage adapters that satisfy the domain storage traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).
//!
//! The pool is capped at a single connection: SQLite allows one writer at a
//! time, and funnelling every statement through one connection turns lock
//! contention into queueing on the pool, which the domain retry executor
//! sees as a transient acquire timeout.

mod activation_store;
mod builder;
mod catalog_store;
mod entity;
mod errors;
mod migration;
mod number_store;
mod seed;
mod sms_store;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection};
use sms_pool_domain::storage::StorageResult;
use tracing::debug;

pub use builder::StorageBuilder;
pub use errors::db_error;
pub use seed::{SeedData, SeedReport};

use migration::run_migrations;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared storage handle used by the HTTP API and the engines.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::builder().database_url(database_url).build().await
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

pub(crate) fn connect_options(database_url: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .sqlx_logging(false);
    options
}

pub(crate) async fn open(database_url: &str) -> StorageResult<DatabaseConnection> {
    Database::connect(connect_options(database_url))
        .await
        .map_err(db_error)
}

/// Session pragmas plus schema creation.
pub(crate) async fn prepare_connection(db: &DatabaseConnection) -> StorageResult<()> {
    if db.get_database_backend() == DatabaseBackend::Sqlite {
        db.execute_unprepared("PRAGMA journal_mode = WAL")
            .await
            .map_err(db_error)?;
        db.execute_unprepared("PRAGMA busy_timeout = 5000")
            .await
            .map_err(db_error)?;
        db.execute_unprepared("PRAGMA foreign_keys = ON")
            .await
            .map_err(db_error)?;
        debug!("sqlite connection prepared");
    }
    run_migrations(db).await
}
