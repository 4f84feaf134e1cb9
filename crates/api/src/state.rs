use sms_pool_domain::model::ApiKey;
use sms_pool_domain::services::{NumberPool, TelemetryGuard};
use sms_pool_storage::SeaOrmStorage;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pool: NumberPool<SeaOrmStorage>,
    api_key: ApiKey,
    telemetry: TelemetryGuard,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pool: NumberPool<SeaOrmStorage>, api_key: ApiKey, telemetry: TelemetryGuard) -> Self {
        Self {
            pool,
            api_key,
            telemetry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pool(&self) -> &NumberPool<SeaOrmStorage> {
        &self.pool
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    /// Token for one request; cancelled together with every other in-flight
    /// request once the server begins shutting down.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
