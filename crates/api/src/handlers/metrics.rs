use actix_web::{web::Data, HttpResponse};

use crate::state::AppState;

/// Prometheus scrape target for the pool and request counters.
pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(state.telemetry().render_metrics())
}
