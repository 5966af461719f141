//! `POST /call-status` (§6): Telco status callback. Feeds AMD classifications
//! into the `AmdRegistry`, which itself arms the 60s finalize watchdog for
//! machine/fax classifications (§4.4).

use axum::extract::{Form, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallStatusForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus", default)]
    pub call_status: Option<String>,
    #[serde(rename = "AnsweredBy", default)]
    pub answered_by: Option<String>,
    #[serde(rename = "Duration", default)]
    pub duration: Option<String>,
}

pub async fn handle_call_status(
    State(state): State<AppState>,
    Form(form): Form<CallStatusForm>,
) -> StatusCode {
    tracing::info!(
        call_sid = %form.call_sid,
        call_status = ?form.call_status,
        answered_by = ?form.answered_by,
        duration = ?form.duration,
        "Telco call status callback"
    );

    if let Some(answered_by) = &form.answered_by {
        state
            .amd
            .record(form.call_sid.clone(), answered_by, state.telco.clone())
            .await;
    }

    StatusCode::OK
}
