//! Agent WebSocket wire types (§6, "WebSocket surface to Agent"; SPEC_FULL §4.7).
//!
//! Modeled in the style of `elevenlabs-convai`'s `messages::{client_messages,
//! server_messages}`: typed client-message builders and a `type`-tagged
//! `ServerMessage` enum so the Session Bridge never pokes at raw
//! `serde_json::Value` for anything but dynamic variables and tool
//! parameters, which are inherently open-ended.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const CONVERSATION_INITIATION_CLIENT_DATA: &str = "conversation_initiation_client_data";
const PONG: &str = "pong";
const CLIENT_TOOL_RESULT: &str = "client_tool_result";

// ---- client -> server ----------------------------------------------------

/// The one-shot init frame (§4.3 "Handshake (init) policy").
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInitiationClientData {
    r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_config_override: Option<ConversationConfigOverride>,
    pub dynamic_variables: HashMap<String, String>,
}

impl ConversationInitiationClientData {
    pub fn new(dynamic_variables: HashMap<String, String>) -> Self {
        Self {
            r#type: CONVERSATION_INITIATION_CLIENT_DATA.to_string(),
            conversation_config_override: None,
            dynamic_variables,
        }
    }

    pub fn with_override(mut self, r#override: ConversationConfigOverride) -> Self {
        self.conversation_config_override = Some(r#override);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_output: Option<AudioOutputOverride>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TtsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioOutputOverride {
    pub encoding: String,
    pub sample_rate: u32,
}

impl Default for AudioOutputOverride {
    /// µ-law, 8 kHz — the codec Telco media streams use (§4.3).
    fn default() -> Self {
        Self {
            encoding: "ulaw".to_string(),
            sample_rate: 8000,
        }
    }
}

/// Per-frame inbound audio (§6, "Client-to-server per-frame audio").
#[derive(Debug, Clone, Serialize)]
pub struct UserAudioChunk {
    pub user_audio_chunk: String,
}

impl UserAudioChunk {
    pub fn new(base64_audio: impl Into<String>) -> Self {
        Self {
            user_audio_chunk: base64_audio.into(),
        }
    }
}

/// Reply to a server `ping` (§4.3 "Audio routing", Agent → Telco list).
#[derive(Debug, Clone, Serialize)]
pub struct Pong {
    r#type: String,
    pub event_id: u32,
}

impl Pong {
    pub fn new(event_id: u32) -> Self {
        Self {
            r#type: PONG.to_string(),
            event_id,
        }
    }
}

/// Reply to a `client_tool_call` (§4.5).
#[derive(Debug, Clone, Serialize)]
pub struct ClientToolResult {
    r#type: String,
    pub tool_call_id: String,
    pub result: String,
    pub is_error: bool,
}

impl ClientToolResult {
    pub fn new(tool_call_id: impl Into<String>, result: impl Into<String>, is_error: bool) -> Self {
        Self {
            r#type: CLIENT_TOOL_RESULT.to_string(),
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            is_error,
        }
    }
}

/// Any outbound client message, serializable to a WS text frame.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Init(ConversationInitiationClientData),
    UserAudioChunk(UserAudioChunk),
    Pong(Pong),
    ClientToolResult(ClientToolResult),
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            ClientMessage::Init(m) => serde_json::to_string(m),
            ClientMessage::UserAudioChunk(m) => serde_json::to_string(m),
            ClientMessage::Pong(m) => serde_json::to_string(m),
            ClientMessage::ClientToolResult(m) => serde_json::to_string(m),
        }
    }
}

// ---- server -> client -----------------------------------------------------

/// Server-to-client message types (§6, "Server-to-client message types
/// consumed"). Internally tagged on `type`, same pattern as the teacher's
/// `StreamEvent` (`#[serde(tag = "event")]`). `Other` is a catch-all so
/// unknown-but-well-formed frames don't fail to parse — they are logged and
/// dropped instead (§4.3 "other → ignored with a warning").
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ping {
        ping_event: PingEvent,
    },
    Interruption {
        #[serde(default)]
        interruption_event: Option<InterruptionEvent>,
    },
    ClientToolCall {
        client_tool_call: ClientTool,
    },
    /// `{"type":"audio", ...}`. Two field shapes share this tag: ElevenLabs'
    /// real wire shape (`audio_event: {audio_base_64}`) and the literal
    /// `audio: {chunk}` shape from §8 scenario 1 — both optional so either
    /// (or, defensively, neither) can be present without failing to parse.
    Audio {
        #[serde(default)]
        audio_event: Option<AudioEvent>,
        #[serde(default)]
        audio: Option<AudioChunk>,
    },
    /// The flatter historic shape (§8, scenario 3): `{"type":"audio_event","audio_base_64":"..."}`.
    AudioEvent {
        audio_base_64: String,
    },
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: serde_json::Value,
    },
    AgentResponse {
        agent_response_event: serde_json::Value,
    },
    UserTranscript {
        user_transcription_event: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// The base64 audio payload, regardless of which audio wire shape was used.
    pub fn audio_payload(&self) -> Option<&str> {
        match self {
            ServerMessage::Audio { audio_event, audio } => audio_event
                .as_ref()
                .map(|e| e.audio_base_64.as_str())
                .or_else(|| audio.as_ref().map(|a| a.chunk.as_str())),
            ServerMessage::AudioEvent { audio_base_64 } => Some(audio_base_64.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptionEvent {
    #[serde(default)]
    pub event_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientTool {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
}

/// The literal `{"audio":{"chunk":"..."}}` shape (§8 scenario 1).
#[derive(Debug, Clone, Deserialize)]
pub struct AudioChunk {
    pub chunk: String,
}

/// Extract the bare `type` field from a raw server frame, for logging
/// unrecognized frames by name even though they deserialize to `Other`.
pub fn peek_type(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        let json = r#"{"type":"ping","ping_event":{"event_id":7}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Ping { ping_event } => assert_eq!(ping_event.event_id, 7),
            other => panic!("expected ping, got {other:?}"),
        }
    }

    #[test]
    fn parses_nested_audio() {
        let json = r#"{"type":"audio","audio_event":{"audio_base_64":"ZZZ="}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.audio_payload(), Some("ZZZ="));
    }

    #[test]
    fn parses_literal_chunk_audio_shape() {
        let json = r#"{"type":"audio","audio":{"chunk":"ZZZ="}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.audio_payload(), Some("ZZZ="));
    }

    #[test]
    fn parses_flat_audio_event() {
        let json = r#"{"type":"audio_event","audio_base_64":"QQ=="}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.audio_payload(), Some("QQ=="));
    }

    #[test]
    fn interruption_with_no_nested_event() {
        let json = r#"{"type":"interruption"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Interruption { interruption_event: None }));
    }

    #[test]
    fn unknown_type_falls_back_to_other() {
        let json = r#"{"type":"vad_score","vad_score_internal_event":{"vad_score":0.2}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Other));
        assert_eq!(peek_type(json).as_deref(), Some("vad_score"));
    }

    #[test]
    fn parses_client_tool_call() {
        let json = r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"get_available_slots","tool_call_id":"t1","parameters":{"eventTypeId":"2171540"}}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::ClientToolCall { client_tool_call } => {
                assert_eq!(client_tool_call.tool_name, "get_available_slots");
                assert_eq!(client_tool_call.tool_call_id, "t1");
            }
            other => panic!("expected client_tool_call, got {other:?}"),
        }
    }
}
