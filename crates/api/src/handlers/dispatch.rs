use std::collections::BTreeMap;
use std::str::FromStr;

use actix_web::{
    web::{Bytes, Data},
    HttpResponse,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use tracing::warn;

use sms_pool_domain::model::{ActivationId, AllocationRequest};
use sms_pool_domain::services::CatalogSnapshot;

use super::{ApiError, WireStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    GetServices,
    GetNumber,
    FinishActivation,
    PushSms,
    GetSms,
}

/// Fields shared by every request. Missing fields decode as empty strings so
/// an absent key is reported as a key mismatch rather than a parse failure.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    action: String,
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNumberRequest {
    pub country: String,
    pub service: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub sum: f64,
    #[serde(default)]
    pub exception_phone_set: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishActivationRequest {
    pub activation_id: u64,
    pub status: i32,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSmsRequest {
    pub activation_id: u64,
    pub sms: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSmsRequest {
    pub activation_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetNumberResponse {
    pub status: String,
    pub number: u64,
    pub activation_id: i64,
    pub flashcall: bool,
    pub voice: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryEntry {
    pub country: String,
    pub operator_map: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetServicesResponse {
    pub status: String,
    pub country_list: Vec<CountryEntry>,
}

impl GetServicesResponse {
    fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self {
            status: success(),
            country_list: snapshot
                .countries
                .into_iter()
                .map(|entry| CountryEntry {
                    country: entry.country,
                    operator_map: entry.operators,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsEntry {
    pub text: String,
    pub received_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSmsResponse {
    pub status: String,
    pub activation_id: u64,
    pub sms_list: Vec<SmsEntry>,
}

/// Single entry point of the wire protocol. The body is decoded first, then
/// the key is checked, and only then is the action resolved.
pub async fn dispatch_handler(
    state: Data<AppState>,
    body: Bytes,
) -> Result<HttpResponse, ApiError> {
    let (label, outcome) = match authorize(&state, &body) {
        Ok(action) => (action.as_ref().to_owned(), handle(action, &state, &body).await),
        Err(err) => ("unknown".to_owned(), Err(err)),
    };

    let status = match &outcome {
        Ok(_) => WireStatus::Success,
        Err(err) => err.wire_status(),
    };
    if status == WireStatus::DatabaseError {
        if let Err(err) = &outcome {
            warn!(action = %label, error = %err, "request failed on the store");
        }
    }
    counter!(
        "api_requests_total",
        "action" => label,
        "status" => status.as_ref().to_owned()
    )
    .increment(1);
    outcome
}

fn authorize(state: &AppState, body: &[u8]) -> Result<ActionKind, ApiError> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    if !state.api_key().matches(&envelope.key) {
        return Err(ApiError::InvalidKey);
    }
    ActionKind::from_str(&envelope.action).map_err(|_| ApiError::InvalidAction(envelope.action))
}

async fn handle(
    action: ActionKind,
    state: &AppState,
    body: &[u8],
) -> Result<HttpResponse, ApiError> {
    let cancel = state.request_token();
    let pool = state.pool();

    match action {
        ActionKind::GetServices => {
            let snapshot = pool.catalog_snapshot(&cancel).await?;
            Ok(HttpResponse::Ok().json(GetServicesResponse::from_snapshot(snapshot)))
        }
        ActionKind::GetNumber => {
            let request: GetNumberRequest = serde_json::from_slice(body)?;
            let allocation = pool
                .allocate(
                    &AllocationRequest {
                        country: request.country,
                        operator: request.operator,
                        service: request.service,
                        sum: request.sum,
                        excluded_prefixes: request.exception_phone_set,
                    },
                    &cancel,
                )
                .await?;
            Ok(HttpResponse::Ok().json(GetNumberResponse {
                status: success(),
                number: allocation.number.get(),
                activation_id: allocation.activation_id.get(),
                flashcall: allocation.flashcall,
                voice: allocation.voice,
            }))
        }
        ActionKind::FinishActivation => {
            let request: FinishActivationRequest = serde_json::from_slice(body)?;
            pool.finish(
                activation_id(request.activation_id)?,
                request.status,
                &cancel,
            )
            .await?;
            Ok(status_ok())
        }
        ActionKind::PushSms => {
            let request: PushSmsRequest = serde_json::from_slice(body)?;
            pool.record_sms(activation_id(request.activation_id)?, request.sms, &cancel)
                .await?;
            Ok(status_ok())
        }
        ActionKind::GetSms => {
            let request: GetSmsRequest = serde_json::from_slice(body)?;
            let messages = pool
                .list_sms(activation_id(request.activation_id)?, &cancel)
                .await?;
            Ok(HttpResponse::Ok().json(GetSmsResponse {
                status: success(),
                activation_id: request.activation_id,
                sms_list: messages
                    .into_iter()
                    .map(|sms| SmsEntry {
                        text: sms.text,
                        received_at: sms.received_at.to_rfc3339(),
                    })
                    .collect(),
            }))
        }
    }
}

/// Ids travel as unsigned integers; anything past the store's range is a
/// malformed request rather than a missing activation.
fn activation_id(raw: u64) -> Result<ActivationId, ApiError> {
    i64::try_from(raw)
        .map(ActivationId::new)
        .map_err(|_| ApiError::InvalidRequest(format!("activation id {raw} is out of range")))
}

fn success() -> String {
    WireStatus::Success.as_ref().to_owned()
}

fn status_ok() -> HttpResponse {
    HttpResponse::Ok().json(super::StatusBody::new(WireStatus::Success))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_wire_names() {
        assert_eq!(
            ActionKind::from_str("GET_NUMBER").unwrap(),
            ActionKind::GetNumber
        );
        assert_eq!(
            ActionKind::from_str("FINISH_ACTIVATION").unwrap(),
            ActionKind::FinishActivation
        );
        assert_eq!(ActionKind::PushSms.as_ref(), "PUSH_SMS");
        assert!(ActionKind::from_str("get_number").is_err());
    }

    #[test]
    fn activation_ids_beyond_store_range_are_malformed() {
        assert_eq!(activation_id(42).unwrap(), ActivationId::new(42));
        let err = activation_id(u64::MAX).unwrap_err();
        assert_eq!(err.wire_status(), WireStatus::InvalidRequest);
    }

    #[test]
    fn negative_activation_ids_do_not_decode() {
        let parsed = serde_json::from_str::<FinishActivationRequest>(
            r#"{"activationId":-7,"status":3}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn get_number_request_uses_camel_case_fields() {
        let request: GetNumberRequest = serde_json::from_str(
            r#"{"action":"GET_NUMBER","key":"k","country":"rus","service":"tg",
                "operator":"any","sum":12.5,"exceptionPhoneSet":["7918"]}"#,
        )
        .unwrap();
        assert_eq!(request.country, "rus");
        assert_eq!(request.sum, 12.5);
        assert_eq!(request.exception_phone_set, vec!["7918".to_string()]);
    }
}
