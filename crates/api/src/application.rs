use actix_web::{middleware::Logger, web, App, HttpServer};
use sms_pool_domain::config::{ApiConfig, ConfigError, PoolConfig};
use sms_pool_domain::services::{init_telemetry, NumberPool, TelemetryConfig, TelemetryError};
use sms_pool_domain::storage::StorageError;
use sms_pool_storage::{SeaOrmStorage, SeedData};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    handlers::{dispatch_handler, health_handler, metrics_handler},
    state::AppState,
};

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let pool_config = PoolConfig::load_from_env()?;

    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let (pool, _writer) = NumberPool::start(storage.clone(), &pool_config);

    if config.seed_demo_data() {
        let invalidator = pool.cache_invalidator();
        SeedData::demo().apply(&storage, Some(&invalidator)).await?;
    }

    let state = AppState::new(pool, config.api_key().clone(), telemetry);
    let endpoint = config.endpoint_path().to_owned();
    info!(
        bind = config.api_bind_address(),
        endpoint = %endpoint,
        key = %config.api_key().fingerprint(),
        "sms pool api starting"
    );

    let server_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(Logger::default())
            .configure(routes(endpoint.clone()))
    })
    .bind(config.api_bind_address())?
    .run()
    .await?;

    state.shutdown();
    if let Err(err) = state.pool().flush().await {
        warn!(error = %err, "pending writes were not drained before exit");
    }
    Ok(())
}

/// Registers the protocol endpoint plus the health and metrics routes.
pub fn routes(endpoint: String) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(web::resource(endpoint).route(web::post().to(dispatch_handler)))
            .route("/health", web::get().to(health_handler))
            .route("/metrics", web::get().to(metrics_handler));
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
