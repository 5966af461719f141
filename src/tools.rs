//! Tool-Call Proxy (§4.5): dispatches Agent `client_tool_call` requests to
//! the calendar backend (cal.com, per `CAL_COM_API_KEY`) and returns a
//! result envelope. Structured like the teacher's `BridgeClient`/`TtsClient`
//! — one `reqwest::Client`, one base URL, narrow `thiserror` error enum.

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};

const CAL_COM_BASE_URL: &str = "https://api.cal.com";
const DEFAULT_TIMEZONE: &str = "Australia/Brisbane";
const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing required parameter: {0}")]
    MissingRequiredParameter(&'static str),
    #[error("request to calendar backend timed out")]
    TimeoutExceeded,
    #[error("calendar backend returned an error: {0}")]
    BackendFailure(String),
}

/// Out-of-band signal for the Session Bridge to act on after acking a tool
/// call (§4.5: `end_call`/`end_voicemail_call` drive session termination).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSignal {
    None,
    EndCall,
    EndVoicemailCall,
}

pub struct ToolResult {
    pub result_json: String,
    pub is_error: bool,
    pub signal: ToolSignal,
}

impl ToolResult {
    fn ok(value: Value) -> Self {
        Self {
            result_json: value.to_string(),
            is_error: false,
            signal: ToolSignal::None,
        }
    }

    fn error(err: ToolError) -> Self {
        Self {
            result_json: json!({ "error": err.to_string() }).to_string(),
            is_error: true,
            signal: ToolSignal::None,
        }
    }

    fn signal(signal: ToolSignal) -> Self {
        Self {
            result_json: json!({ "acknowledged": true }).to_string(),
            is_error: false,
            signal,
        }
    }
}

pub struct ToolProxy {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ToolProxy {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(TOOL_TIMEOUT)
                .build()
                .expect("failed to build calendar backend HTTP client"),
            api_key,
            base_url: CAL_COM_BASE_URL.to_string(),
        }
    }

    /// Recognized tools (§4.5, closed set). Tool dispatch failure returns an
    /// error envelope; it never tears down the Session (§4.3 "Failure semantics").
    pub async fn dispatch(&self, tool_name: &str, call_id: &str, parameters: &Value) -> ToolResult {
        tracing::info!(tool_name, call_id, "Dispatching tool call");

        match tool_name {
            "get_current_time" => self.get_current_time(),
            "get_available_slots" => match self.get_available_slots(parameters).await {
                Ok(v) => ToolResult::ok(v),
                Err(e) => ToolResult::error(e),
            },
            "book_meeting" => match self.book_meeting(parameters).await {
                Ok(v) => ToolResult::ok(v),
                Err(e) => ToolResult::error(e),
            },
            "end_call" => ToolResult::signal(ToolSignal::EndCall),
            "end_voicemail_call" => ToolResult::signal(ToolSignal::EndVoicemailCall),
            other => ToolResult::error(ToolError::BackendFailure(format!("unknown tool: {other}"))),
        }
    }

    fn get_current_time(&self) -> ToolResult {
        let now = chrono::Utc::now();
        ToolResult::ok(json!({
            "current_time": now.to_rfc3339(),
            "timezone": "UTC",
        }))
    }

    async fn get_available_slots(&self, parameters: &Value) -> Result<Value, ToolError> {
        let event_type_id = parameters
            .get("eventTypeId")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingRequiredParameter("eventTypeId"))?;

        let start = parameters
            .get("start")
            .and_then(|v| v.as_str())
            .ok_or(ToolError::MissingRequiredParameter("start"))?;
        validate_date(start)?;

        let end = parameters
            .get("end")
            .and_then(|v| v.as_str())
            .filter(|s| validate_date(s).is_ok())
            .unwrap_or(start);

        let timezone = parameters
            .get("timeZone")
            .and_then(|v| v.as_str())
            .filter(|tz| is_plausible_iana_timezone(tz))
            .unwrap_or(DEFAULT_TIMEZONE);

        let url = format!("{}/v2/slots", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("eventTypeId", event_type_id),
                ("start", start),
                ("end", end),
                ("timeZone", timezone),
            ])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        self.decode_response(resp).await
    }

    async fn book_meeting(&self, parameters: &Value) -> Result<Value, ToolError> {
        let url = format!("{}/v2/bookings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(parameters)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        self.decode_response(resp).await
    }

    async fn decode_response(&self, resp: reqwest::Response) -> Result<Value, ToolError> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(500).collect();
            return Err(ToolError::BackendFailure(format!("{status}: {preview}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| ToolError::BackendFailure(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::TimeoutExceeded
    } else {
        ToolError::BackendFailure(e.to_string())
    }
}

fn validate_date(s: &str) -> Result<(), ToolError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ToolError::BackendFailure(format!("invalid date: {s}")))
}

/// Rejects obviously-malformed `timeZone` values (§4.5, "default timezone if
/// missing or malformed") without pulling in a full IANA database: every
/// real zone name is either `UTC`/`GMT` or one or more `/`-separated
/// `Area/Location` segments of letters, digits, `_`, `-`, or `+`.
fn is_plausible_iana_timezone(tz: &str) -> bool {
    if tz.is_empty() {
        return false;
    }
    if tz == "UTC" || tz == "GMT" {
        return true;
    }
    tz.contains('/')
        && tz.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_timezones() {
        assert!(is_plausible_iana_timezone("Australia/Brisbane"));
        assert!(is_plausible_iana_timezone("America/New_York"));
        assert!(is_plausible_iana_timezone("UTC"));
        assert!(!is_plausible_iana_timezone(""));
        assert!(!is_plausible_iana_timezone("not a timezone"));
        assert!(!is_plausible_iana_timezone("nonsense"));
    }

    #[test]
    fn validates_dates() {
        assert!(validate_date("2025-02-01").is_ok());
        assert!(validate_date("02/01/2025").is_err());
        assert!(validate_date("not-a-date").is_err());
    }

    #[tokio::test]
    async fn missing_event_type_id_is_missing_param_error() {
        let proxy = ToolProxy::new("key".into());
        let result = proxy
            .dispatch("get_available_slots", "t1", &json!({ "start": "2025-02-01" }))
            .await;
        assert!(result.is_error);
        assert!(result.result_json.contains("eventTypeId"));
    }

    #[tokio::test]
    async fn end_call_signals_without_network() {
        let proxy = ToolProxy::new("key".into());
        let result = proxy.dispatch("end_call", "t1", &json!({})).await;
        assert!(!result.is_error);
        assert_eq!(result.signal, ToolSignal::EndCall);
    }

    #[tokio::test]
    async fn end_voicemail_call_signals_without_network() {
        let proxy = ToolProxy::new("key".into());
        let result = proxy.dispatch("end_voicemail_call", "t1", &json!({})).await;
        assert_eq!(result.signal, ToolSignal::EndVoicemailCall);
    }

    #[tokio::test]
    async fn get_current_time_has_no_placeholder() {
        let proxy = ToolProxy::new("key".into());
        let result = proxy.dispatch("get_current_time", "t1", &json!({})).await;
        assert!(!result.is_error);
        assert!(result.result_json.contains("current_time"));
    }
}
