//! Session state (§3, "Session") and the handshake/routing policy that
//! operates on it (§4.3). All mutable state lives behind one mutex per
//! Session — not because multiple tasks hammer it constantly, but because
//! the Agent-open and Telco-start events that both gate the init send can
//! race (§4.3 "The init frame is idempotent-by-construction").

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::agent::{AgentSession, ClientMessage};
use crate::agent::messages::{
    AgentOverride, AudioOutputOverride, ConversationConfigOverride, ConversationInitiationClientData,
    PromptOverride,
};
use crate::amd::Classification;

/// Bounded per-direction buffer: overflow drops the oldest frame (§4.3, §5).
const BUFFER_CAP: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Voicemail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    InboundReceptionist,
}

impl Direction {
    fn dynamic_variable_value(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::InboundReceptionist => "inbound_receptionist",
        }
    }
}

pub struct SessionState {
    pub stream_id: Option<String>,
    pub call_id: Option<String>,
    pub agent: Option<Arc<AgentSession>>,
    pub agent_open: bool,
    pub telco_started: bool,
    pub init_sent: bool,
    pub mode_resolved: bool,
    pub mode: Mode,
    pub direction: Direction,
    pub custom_parameters: HashMap<String, String>,
    pub inbound_buffer: VecDeque<String>,
    pub outbound_buffer: VecDeque<String>,
    pub first_agent_audio_ts: Option<Instant>,
    pub init_sent_ts: Option<Instant>,
}

impl SessionState {
    fn new(direction: Direction) -> Self {
        Self {
            stream_id: None,
            call_id: None,
            agent: None,
            agent_open: false,
            telco_started: false,
            init_sent: false,
            mode_resolved: false,
            mode: Mode::Normal,
            direction,
            custom_parameters: HashMap::new(),
            inbound_buffer: VecDeque::new(),
            outbound_buffer: VecDeque::new(),
            first_agent_audio_ts: None,
            init_sent_ts: None,
        }
    }

    pub fn push_inbound(&mut self, chunk: String) {
        if self.inbound_buffer.len() >= BUFFER_CAP {
            self.inbound_buffer.pop_front();
        }
        self.inbound_buffer.push_back(chunk);
    }

    pub fn push_outbound(&mut self, chunk: String) {
        if self.outbound_buffer.len() >= BUFFER_CAP {
            self.outbound_buffer.pop_front();
        }
        self.outbound_buffer.push_back(chunk);
    }

    fn ready_for_handshake(&self) -> bool {
        self.agent_open && self.telco_started && self.mode_resolved && !self.init_sent
    }

    fn build_init_message(&self) -> ConversationInitiationClientData {
        let today = Utc::now().date_naive();
        let tomorrow = today + ChronoDuration::days(1);
        let next_week = today + ChronoDuration::days(7);

        let mut dynamic_variables: HashMap<String, String> = HashMap::new();
        dynamic_variables.insert("CURRENT_DATE_YYYYMMDD".into(), today.format("%Y-%m-%d").to_string());
        dynamic_variables.insert("TOMORROW_DATE_YYYYMMDD".into(), tomorrow.format("%Y-%m-%d").to_string());
        dynamic_variables.insert("NEXT_WEEK_DATE_YYYYMMDD".into(), next_week.format("%Y-%m-%d").to_string());
        dynamic_variables.insert("CALL_DIRECTION".into(), self.direction.dynamic_variable_value().to_string());

        let name = self.custom_parameters.get("name").cloned().unwrap_or_default();
        let number = self.custom_parameters.get("number").cloned().unwrap_or_default();
        let record_id = self
            .custom_parameters
            .get("airtableRecordId")
            .cloned()
            .unwrap_or_default();
        dynamic_variables.insert("CUSTOMER_NAME".into(), name.clone());
        dynamic_variables.insert("CUSTOMER_NUMBER".into(), number);
        dynamic_variables.insert("CUSTOMER_RECORD_ID".into(), record_id);

        let (first_message, prompt) = match self.mode {
            Mode::Voicemail => (
                voicemail_first_message(&name),
                "You have reached a voicemail system. Deliver your message in a single \
                 uninterrupted turn, then invoke the end_voicemail_call tool. Do not wait \
                 for a reply."
                    .to_string(),
            ),
            Mode::Normal => (
                live_first_message(&name),
                "You are a live phone conversation. Speak naturally and concisely, and use \
                 the available tools to check availability or book meetings when asked."
                    .to_string(),
            ),
        };

        let r#override = ConversationConfigOverride {
            agent: Some(AgentOverride {
                first_message: Some(first_message),
                prompt: Some(PromptOverride { prompt }),
            }),
            tts: None,
            audio_output: Some(AudioOutputOverride::default()),
        };

        ConversationInitiationClientData::new(dynamic_variables).with_override(r#override)
    }
}

fn live_first_message(name: &str) -> String {
    if name.is_empty() {
        "Hi, thanks for calling — how can I help today?".to_string()
    } else {
        format!("Hi {name}, thanks for calling — how can I help today?")
    }
}

fn voicemail_first_message(name: &str) -> String {
    let opener = crate::greeting::select_greeting(if name.is_empty() { "our team" } else { name });
    format!("{opener} — please call us back at your earliest convenience.")
}

/// Per-Telco-WebSocket session handle (§3, "Session"). Cheaply cloneable;
/// all mutable state is behind the inner mutex.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    /// Mirrors `SessionState::mode`, readable without awaiting the lock so
    /// the voicemail watchdog can gate a `tokio::select!` branch with it.
    voicemail: Arc<AtomicBool>,
}

impl Session {
    pub fn new(direction: Direction) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::new(direction))),
            voicemail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_voicemail(&self) -> bool {
        self.voicemail.load(Ordering::Relaxed)
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub async fn on_telco_start(&self, stream_id: String, call_id: String, custom_parameters: HashMap<String, String>) {
        let mut state = self.state.lock().await;
        state.stream_id = Some(stream_id);
        state.call_id = Some(call_id);
        state.custom_parameters = custom_parameters;
        state.telco_started = true;
    }

    pub async fn resolve_mode(&self, classification: Option<Classification>) {
        let mode = match classification {
            Some(c) if c.is_machine() => Mode::Voicemail,
            _ => Mode::Normal,
        };
        let mut state = self.state.lock().await;
        state.mode = mode;
        state.mode_resolved = true;
        self.voicemail.store(mode == Mode::Voicemail, Ordering::Relaxed);
    }

    pub async fn on_agent_open(&self, agent: Arc<AgentSession>) {
        let mut state = self.state.lock().await;
        state.agent = Some(agent);
        state.agent_open = true;
    }

    pub async fn on_agent_closed(&self) {
        let mut state = self.state.lock().await;
        state.agent_open = false;
    }

    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    pub async fn call_id(&self) -> Option<String> {
        self.state.lock().await.call_id.clone()
    }

    pub async fn stream_id(&self) -> Option<String> {
        self.state.lock().await.stream_id.clone()
    }

    pub async fn agent_handle(&self) -> Option<Arc<AgentSession>> {
        self.state.lock().await.agent.clone()
    }

    /// The handshake policy (§4.3 "Handshake (init) policy"): send the init
    /// frame exactly once, as soon as both sides are ready and the AMD mode
    /// is resolved. Safe to call repeatedly from any transition.
    pub async fn try_send_handshake(&self) {
        let (agent, init_message) = {
            let mut state = self.state.lock().await;
            if !state.ready_for_handshake() {
                return;
            }
            let Some(agent) = state.agent.clone() else {
                return;
            };
            let init_message = state.build_init_message();
            // Claim the send here, under the lock, so two racing callers
            // (Agent-open and AMD mode resolution can both observe
            // `ready_for_handshake()` true before either sends) can't both
            // pass the check and both call `agent.send` (§3/§8 "at most one
            // init message per Session").
            state.init_sent = true;
            state.init_sent_ts = Some(Instant::now());
            (agent, init_message)
        };

        match agent.send(ClientMessage::Init(init_message)) {
            Ok(()) => {
                tracing::info!("Init frame sent");
            }
            Err(e) => {
                // Release the claim — the next ready-transition retries
                // (§4.3 "Failure semantics", "Init send failure").
                let mut state = self.state.lock().await;
                state.init_sent = false;
                state.init_sent_ts = None;
                tracing::warn!("Init send failed, will retry on next transition: {e}");
            }
        }
    }

    /// Route a Telco `media` frame (§4.3 "Audio routing", Telco → Agent).
    pub async fn route_telco_media(&self, payload_b64: String) {
        let agent = {
            let mut state = self.state.lock().await;
            if state.agent_open {
                state.agent.clone()
            } else {
                state.push_inbound(payload_b64);
                return;
            }
        };
        if let Some(agent) = agent {
            let chunk = crate::agent::messages::UserAudioChunk::new(payload_b64);
            if let Err(e) = agent.send(ClientMessage::UserAudioChunk(chunk)) {
                tracing::warn!("Failed to forward audio to Agent: {e}");
            }
        }
    }

    /// Drain buffered inbound audio in order once the Agent opens.
    pub async fn drain_inbound(&self) {
        let (agent, chunks) = {
            let mut state = self.state.lock().await;
            let agent = state.agent.clone();
            let chunks: Vec<String> = state.inbound_buffer.drain(..).collect();
            (agent, chunks)
        };
        let Some(agent) = agent else { return };
        for chunk in chunks {
            let msg = crate::agent::messages::UserAudioChunk::new(chunk);
            if let Err(e) = agent.send(ClientMessage::UserAudioChunk(msg)) {
                tracing::warn!("Failed to drain buffered audio to Agent: {e}");
                break;
            }
        }
    }

    /// Route Agent audio to Telco, buffering if `stream_id` is unknown yet
    /// (§4.3 "Audio routing", Agent → Telco).
    pub async fn route_agent_audio(&self, payload_b64: String) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.first_agent_audio_ts.is_none() {
            state.first_agent_audio_ts = Some(Instant::now());
        }
        match &state.stream_id {
            Some(sid) => Some(crate::bridge::wire::media_frame(sid, &payload_b64)),
            None => {
                state.push_outbound(payload_b64);
                None
            }
        }
    }

    /// Drain buffered outbound audio once `stream_id` becomes known; returns
    /// the Telco-bound frames in order.
    pub async fn drain_outbound(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let Some(sid) = state.stream_id.clone() else {
            return Vec::new();
        };
        state
            .outbound_buffer
            .drain(..)
            .map(|payload| crate::bridge::wire::media_frame(&sid, &payload))
            .collect()
    }

    /// Discard the outbound buffer on `interruption` (§4.3, §8).
    pub async fn clear_outbound(&self) {
        self.state.lock().await.outbound_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSession;

    #[tokio::test]
    async fn telco_media_buffers_in_order_before_agent_open() {
        let session = Session::new(Direction::Outbound);
        session.route_telco_media("AAA=".into()).await;
        session.route_telco_media("BBB=".into()).await;

        let state = session.lock().await;
        assert_eq!(state.inbound_buffer, vec!["AAA=".to_string(), "BBB=".to_string()]);
    }

    #[tokio::test]
    async fn inbound_buffer_overflow_drops_oldest() {
        let session = Session::new(Direction::Outbound);
        for i in 0..(BUFFER_CAP + 5) {
            session.route_telco_media(format!("chunk-{i}")).await;
        }

        let state = session.lock().await;
        assert_eq!(state.inbound_buffer.len(), BUFFER_CAP);
        assert_eq!(state.inbound_buffer.front(), Some(&"chunk-5".to_string()));
        assert_eq!(
            state.inbound_buffer.back(),
            Some(&format!("chunk-{}", BUFFER_CAP + 4))
        );
    }

    #[tokio::test]
    async fn agent_audio_buffers_until_stream_id_known_then_drains_in_order() {
        let session = Session::new(Direction::Outbound);

        assert!(session.route_agent_audio("ZZZ=".into()).await.is_none());
        assert!(session.route_agent_audio("YYY=".into()).await.is_none());

        session
            .on_telco_start("MZ1".into(), "CA1".into(), HashMap::new())
            .await;
        let frames = session.drain_outbound().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("ZZZ="));
        assert!(frames[1].contains("YYY="));
    }

    #[tokio::test]
    async fn interruption_discards_outbound_buffer() {
        let session = Session::new(Direction::Outbound);
        session.route_agent_audio("ZZZ=".into()).await;
        session.clear_outbound().await;

        session
            .on_telco_start("MZ1".into(), "CA1".into(), HashMap::new())
            .await;
        assert!(session.drain_outbound().await.is_empty());
    }

    #[tokio::test]
    async fn handshake_sends_exactly_once_across_racing_transitions() {
        let session = Session::new(Direction::Outbound);
        let (agent, mut sent) = AgentSession::for_tests();

        session
            .on_telco_start("MZ1".into(), "CA1".into(), HashMap::new())
            .await;
        session.resolve_mode(None).await;
        session.on_agent_open(Arc::new(agent)).await;

        // Both readiness conditions are already true; call the handshake
        // check twice, as two racing transitions would (§4.3 "idempotent").
        session.try_send_handshake().await;
        session.try_send_handshake().await;

        let mut frames = Vec::new();
        while let Ok(frame) = sent.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 1, "init frame must be sent exactly once");
        assert!(session.lock().await.init_sent);
    }

    #[tokio::test]
    async fn handshake_withheld_until_mode_resolved() {
        let session = Session::new(Direction::Outbound);
        let (agent, mut sent) = AgentSession::for_tests();

        session
            .on_telco_start("MZ1".into(), "CA1".into(), HashMap::new())
            .await;
        session.on_agent_open(Arc::new(agent)).await;
        session.try_send_handshake().await;
        assert!(sent.try_recv().is_err(), "must not send before mode is resolved");

        session.resolve_mode(Some(Classification::MachineStart)).await;
        session.try_send_handshake().await;
        assert!(sent.try_recv().is_ok());
        assert!(session.is_voicemail());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_handshake_attempts_send_exactly_once() {
        // Reproduces the real race: Agent-open and AMD mode resolution both
        // observe readiness simultaneously and both call `try_send_handshake`
        // (bridge/mod.rs's agent-connect arm and `spawn_mode_resolution` do
        // exactly this). Only one send must land.
        let session = Session::new(Direction::Outbound);
        let (agent, mut sent) = AgentSession::for_tests();

        session
            .on_telco_start("MZ1".into(), "CA1".into(), HashMap::new())
            .await;
        session.resolve_mode(None).await;
        session.on_agent_open(Arc::new(agent)).await;

        let a = session.clone();
        let b = session.clone();
        tokio::join!(
            async move { a.try_send_handshake().await },
            async move { b.try_send_handshake().await },
        );

        let mut frames = Vec::new();
        while let Ok(frame) = sent.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 1, "init frame must be sent exactly once under concurrent racers");
    }
}
