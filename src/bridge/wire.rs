//! Telco WebSocket wire types (§6, "WebSocket surface to Telco"). Modeled on
//! the teacher's `twilio::media::StreamEvent` — an internally tagged enum
//! over `event`.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        /// Real Twilio frames carry `streamSid` at the top level; the
        /// literal frame in §8 scenario 1 nests it inside `start` instead
        /// (`start:{streamSid:"MZ1", callSid:"CA1", ...}`) with no top-level
        /// field at all. Both are accepted; `StartMetadata::stream_sid` is
        /// consulted as a fallback (see `StartMetadata::resolved_stream_sid`).
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StartMetadata,
    },
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        #[serde(default)]
        stream_sid: Option<String>,
    },
    Stop {
        #[serde(rename = "streamSid")]
        #[serde(default)]
        stream_sid: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMetadata {
    pub call_sid: String,
    /// Present on the literal §8 scenario-1 frame, absent on real Twilio
    /// frames (which carry it one level up instead).
    #[serde(default)]
    pub stream_sid: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StartMetadata {
    /// Resolve the effective stream id: prefer the top-level `streamSid`
    /// (real Twilio shape), falling back to the one nested inside `start`.
    pub fn resolved_stream_sid(top_level: Option<&str>, start: &StartMetadata) -> Option<String> {
        top_level
            .map(str::to_string)
            .or_else(|| start.stream_sid.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// `{event: "media", streamSid, media: {payload}}` (§4.3 "Audio routing").
pub fn media_frame(stream_sid: &str, payload_b64: &str) -> String {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload_b64 },
    })
    .to_string()
}

/// `{event: "clear", streamSid}`, sent on Agent `interruption`.
pub fn clear_frame(stream_sid: &str) -> String {
    serde_json::json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_top_level_stream_sid() {
        let json = r#"{"event":"start","streamSid":"MZ1","start":{"callSid":"CA1","customParameters":{"name":"John","number":"+15551234"}}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Start { stream_sid, start } => {
                assert_eq!(
                    StartMetadata::resolved_stream_sid(stream_sid.as_deref(), &start),
                    Some("MZ1".to_string())
                );
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.custom_parameters.get("name").unwrap(), "John");
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn parses_start_with_nested_stream_sid_only() {
        // §8 scenario 1's literal frame: no top-level `streamSid`, nested
        // inside `start` instead.
        let json = r#"{"event":"start","start":{"streamSid":"MZ1","callSid":"CA1","customParameters":{"name":"John","number":"+15551234"}}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Start { stream_sid, start } => {
                assert!(stream_sid.is_none());
                assert_eq!(
                    StartMetadata::resolved_stream_sid(stream_sid.as_deref(), &start),
                    Some("MZ1".to_string())
                );
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn parses_media() {
        let json = r#"{"event":"media","streamSid":"MZ1","media":{"payload":"AAA="}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StreamEvent::Media { .. }));
    }

    #[test]
    fn builds_media_frame() {
        let frame = media_frame("MZ1", "ZZZ=");
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ1");
        assert_eq!(value["media"]["payload"], "ZZZ=");
    }
}
