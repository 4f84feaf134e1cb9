pub mod dispatch;
pub mod health;
pub mod metrics;

pub use dispatch::dispatch_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;

use sms_pool_domain::services::{NoNumbersReason, PoolError};

/// Status strings of the wire protocol. Every answer, failures included, is
/// an HTTP 200 carrying one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum WireStatus {
    #[strum(serialize = "SUCCESS")]
    Success,
    #[strum(serialize = "NO_NUMBERS1")]
    NoNumbers,
    #[strum(serialize = "NO_NUMBERS2")]
    NoNumbersExcluded,
    #[strum(serialize = "INVALID_SERVICE")]
    InvalidService,
    #[strum(serialize = "ACTIVATION_NOT_FOUND")]
    ActivationNotFound,
    #[strum(serialize = "DATABASE_ERROR")]
    DatabaseError,
    #[strum(serialize = "INVALID_REQUEST")]
    InvalidRequest,
    #[strum(serialize = "INVALID_KEY")]
    InvalidKey,
    #[strum(serialize = "INVALID_ACTION")]
    InvalidAction,
}

impl From<&PoolError> for WireStatus {
    fn from(err: &PoolError) -> Self {
        match err {
            PoolError::NoNumbersAvailable {
                reason: NoNumbersReason::NoMatch,
            } => WireStatus::NoNumbers,
            PoolError::NoNumbersAvailable {
                reason: NoNumbersReason::ExcludedByPrefix,
            } => WireStatus::NoNumbersExcluded,
            PoolError::UnknownService(_) => WireStatus::InvalidService,
            PoolError::ActivationNotFound(_) => WireStatus::ActivationNotFound,
            PoolError::InvalidArgument(_) => WireStatus::InvalidRequest,
            PoolError::StoreBusy { .. } | PoolError::Store(_) | PoolError::Cancelled => {
                WireStatus::DatabaseError
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    InvalidRequest(String),
    #[error("api key rejected")]
    InvalidKey,
    #[error("unknown action `{0}`")]
    InvalidAction(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ApiError {
    pub fn wire_status(&self) -> WireStatus {
        match self {
            ApiError::InvalidRequest(_) => WireStatus::InvalidRequest,
            ApiError::InvalidKey => WireStatus::InvalidKey,
            ApiError::InvalidAction(_) => WireStatus::InvalidAction,
            ApiError::Pool(err) => WireStatus::from(err),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::OK
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(StatusBody::new(self.wire_status()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

impl StatusBody {
    pub fn new(status: WireStatus) -> Self {
        Self {
            status: status.as_ref().to_owned(),
        }
    }
}
