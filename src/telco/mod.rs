//! Thin wrapper over the Telco (Twilio) REST SDK: placing outbound calls and
//! finalizing them. Out of scope per spec.md §1 beyond this thin shape —
//! ported directly from the teacher's `twilio::outbound::TwilioClient`,
//! extended with the `status=completed` finalize call the Session Bridge and
//! AMD watchdog both need (§4.3 "Termination", §4.4).

use std::collections::HashMap;

use crate::config::TwilioConfig;

pub struct TelcoClient {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    public_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TelcoError {
    #[error("HTTP request to Telco provider failed: {0}")]
    Request(String),
    #[error("Telco provider rejected the request: {0}")]
    Api(String),
}

impl TelcoClient {
    pub fn new(config: &TwilioConfig, public_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.phone_number.clone(),
            public_url: public_url.to_string(),
        }
    }

    /// Construct a client suitable for unit tests that never actually touch
    /// the network (it is only used as an opaque handle by `AmdRegistry`'s
    /// finalize watchdog in tests that exercise the registry, not the HTTP call).
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: "ACtest".into(),
            auth_token: "token".into(),
            from_number: "+15550000000".into(),
            public_url: "https://example.test".into(),
        }
    }

    /// Place an outbound call (§6, `POST /outbound-call`). Twilio will ring
    /// `to`, and on answer fetch TwiML from `/outbound-call-twiml` with the
    /// given query parameters.
    pub async fn place_outbound_call(
        &self,
        to: &str,
        twiml_query: &HashMap<String, String>,
    ) -> Result<String, TelcoError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.account_sid
        );

        let mut webhook_url = format!("{}/outbound-call-twiml", self.public_url);
        if !twiml_query.is_empty() {
            let query: String = twiml_query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoded(k), urlencoded(v)))
                .collect::<Vec<_>>()
                .join("&");
            webhook_url = format!("{webhook_url}?{query}");
        }

        let status_callback = format!("{}/call-status", self.public_url);

        let params = [
            ("To", to),
            ("From", &self.from_number),
            ("Url", &webhook_url),
            ("StatusCallback", &status_callback),
            ("StatusCallbackEvent", "completed"),
            ("MachineDetection", "DetectMessageEnd"),
        ];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| TelcoError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TelcoError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TelcoError::Request(e.to_string()))?;

        let call_sid = body["sid"].as_str().unwrap_or("unknown").to_string();
        tracing::info!(to, call_sid = %call_sid, "Outbound call initiated");
        Ok(call_sid)
    }

    /// Finalize a call (`status = completed`). Idempotent: ending an
    /// already-completed call is not an error (§8).
    pub async fn finalize_call(&self, call_sid: &str) -> Result<(), TelcoError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls/{}.json",
            self.account_sid, call_sid
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| TelcoError::Request(e.to_string()))?;

        // Twilio returns 4xx for calls already completed/canceled — idempotent no-op.
        if resp.status().is_client_error() {
            tracing::debug!(call_sid, status = %resp.status(), "Finalize on already-terminal call");
            return Ok(());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TelcoError::Api(format!("{status}: {body}")));
        }

        tracing::info!(call_sid, "Call finalized");
        Ok(())
    }
}

fn urlencoded(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                String::from(b as char)
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
