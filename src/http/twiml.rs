//! TwiML answer-URL handlers (§6, `/outbound-call-twiml`,
//! `/incoming-call-eleven`, `/twilio/inbound_call`). Grounded in the
//! teacher's `twilio::webhook::handle_voice[_outbound]` — same
//! `<Connect><Stream>` shape, extended with `<Parameter>` children carrying
//! the call's custom parameters through to the Telco `start` event.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};

use crate::AppState;

/// `ALL /outbound-call-twiml` (§6). Echoes `name`, `number`,
/// `airtableRecordId`, and the `customParams` JSON blob back as
/// `<Stream><Parameter>` children so they arrive in Telco's `start.customParameters`.
pub async fn handle_outbound_call_twiml(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut custom_parameters: HashMap<String, String> = HashMap::new();
    if let Some(name) = params.get("name") {
        custom_parameters.insert("name".to_string(), name.clone());
    }
    if let Some(number) = params.get("number") {
        custom_parameters.insert("number".to_string(), number.clone());
    }
    if let Some(record_id) = params.get("airtableRecordId") {
        custom_parameters.insert("airtableRecordId".to_string(), record_id.clone());
    }
    if let Some(custom_params_json) = params.get("customParams") {
        if let Ok(extra) = serde_json::from_str::<HashMap<String, String>>(custom_params_json) {
            custom_parameters.extend(extra);
        }
    }

    let ws_url = media_stream_url(&state.config.server.public_url, "outbound-media-stream");
    let twiml = connect_stream_twiml(&ws_url, &custom_parameters);
    ([("Content-Type", "text/xml")], twiml).into_response()
}

/// `ALL /incoming-call-eleven` and `ALL /twilio/inbound_call` (§6). No
/// customer context is known yet for an inbound call, so no `<Parameter>`
/// children are emitted; mode resolution still runs through the AMD path.
pub async fn handle_inbound_call(State(state): State<AppState>) -> Response {
    let ws_url = media_stream_url(&state.config.server.public_url, "media-stream");
    let twiml = connect_stream_twiml(&ws_url, &HashMap::new());
    ([("Content-Type", "text/xml")], twiml).into_response()
}

fn media_stream_url(public_url: &str, path: &str) -> String {
    format!(
        "{}/{path}",
        public_url.replace("https://", "wss://").replace("http://", "ws://")
    )
}

fn connect_stream_twiml(ws_url: &str, custom_parameters: &HashMap<String, String>) -> String {
    let params: String = custom_parameters
        .iter()
        .map(|(k, v)| format!(r#"<Parameter name="{}" value="{}" />"#, xml_escape(k), xml_escape(v)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <Stream url="{ws_url}">{params}</Stream>
    </Connect>
</Response>"#
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stream_url() {
        assert_eq!(
            media_stream_url("https://example.com", "outbound-media-stream"),
            "wss://example.com/outbound-media-stream"
        );
    }

    #[test]
    fn escapes_parameter_values() {
        let mut params = HashMap::new();
        params.insert("name".to_string(), "O'Brien & Co <VIP>".to_string());
        let xml = connect_stream_twiml("wss://example.com/media-stream", &params);
        assert!(xml.contains("O'Brien &amp; Co &lt;VIP&gt;"));
    }
}
