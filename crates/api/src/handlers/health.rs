use actix_web::HttpResponse;
use serde_json::json;

pub async fn health_handler() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok", "service": "sms-pool" }))
}
