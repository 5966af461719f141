//! `POST /outbound-call` and `POST /end-call` (§6). Gated by the same
//! bearer-token check the teacher applies to its own `/api/*` surface
//! (`api::outbound::check_auth`), since neither endpoint is safe to leave
//! open to arbitrary callers.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::status::optimization_snapshot;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCallRequest {
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub airtable_record_id: Option<String>,
    #[serde(default)]
    pub custom_parameters: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCallResponse {
    pub success: bool,
    pub call_sid: String,
    pub customer_name: String,
    pub optimizations: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallRequest {
    pub call_sid: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// `POST /outbound-call` (§6). Places a call via the Telco client and
/// returns a cache/registry/predictor snapshot alongside the call id.
pub async fn handle_outbound_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OutboundCallRequest>,
) -> impl IntoResponse {
    if let Err(resp) = check_auth(&headers, &state.config.api.token) {
        return resp;
    }

    if req.number.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "number is required".to_string(),
            }),
        )
            .into_response();
    }

    let mut twiml_query = HashMap::new();
    twiml_query.insert("name".to_string(), req.name.clone());
    twiml_query.insert("number".to_string(), req.number.clone());
    if let Some(record_id) = &req.airtable_record_id {
        twiml_query.insert("airtableRecordId".to_string(), record_id.clone());
    }
    if let Some(custom) = &req.custom_parameters {
        if let Ok(json) = serde_json::to_string(custom) {
            twiml_query.insert("customParams".to_string(), json);
        }
    }

    match state.telco.place_outbound_call(&req.number, &twiml_query).await {
        Ok(call_sid) => {
            state.predictor.record_arrival().await;
            (
                StatusCode::OK,
                Json(OutboundCallResponse {
                    success: true,
                    call_sid,
                    customer_name: req.name,
                    optimizations: optimization_snapshot(&state).await,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to place outbound call: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

/// `POST /end-call` (§6). Finalizing an already-completed call is
/// idempotent (§8), so this always reports success once the request reaches
/// the Telco provider.
pub async fn handle_end_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EndCallRequest>,
) -> impl IntoResponse {
    if let Err(resp) = check_auth(&headers, &state.config.api.token) {
        return resp;
    }

    if req.call_sid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "callSid is required".to_string(),
            }),
        )
            .into_response();
    }

    match state.telco.finalize_call(&req.call_sid).await {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse { success: true })).into_response(),
        Err(e) => {
            tracing::error!("Failed to end call: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

#[allow(clippy::result_large_err)]
fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), axum::response::Response> {
    if expected_token.is_empty() {
        tracing::warn!("API bearer token not configured — rejecting request");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "API bearer token not configured".to_string(),
            }),
        )
            .into_response());
    }

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected_token => Ok(()),
        _ => {
            tracing::warn!("Unauthorized request");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "invalid or missing bearer token".to_string(),
                }),
            )
                .into_response())
        }
    }
}
