//! Session Bridge run loop (§4.3): the axum WebSocket handlers for
//! `/outbound-media-stream` and `/media-stream`, and the per-call
//! orchestration between the Telco socket and the Agent session. Structured
//! like the teacher's `twilio::media::handle_media_stream` — a single
//! `tokio::select!` loop multiplexing inbound Telco frames, inbound Agent
//! frames, and an outbound queue — generalized to also race the Agent
//! connect future and a voicemail watchdog.

pub mod session;
pub mod wire;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as AxumWsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::agent::messages::ClientToolResult;
use crate::agent::{AgentError, AgentSession, ClientMessage, ServerMessage};
use crate::bridge::session::{Direction, Session};
use crate::bridge::wire::{clear_frame, StartMetadata, StreamEvent};
use crate::tools::ToolSignal;
use crate::AppState;

/// Grace period for a call with no AMD callback yet before defaulting to
/// normal mode (§4.4 "Race"; no fixed bound is specified, this is the
/// implementer's choice).
const AMD_GRACE: Duration = Duration::from_millis(1500);

/// Forces voicemail-mode Agent sessions closed even if `end_voicemail_call`
/// is never invoked (§4.3 "voicemail watchdog").
const VOICEMAIL_WATCHDOG: Duration = Duration::from_secs(30);

/// Close code sent to Telco when the Agent is unavailable during `Connecting`
/// (§4.3 "Failure semantics", §7 "AgentUnavailable").
const AGENT_UNAVAILABLE_CLOSE_CODE: u16 = 1011;

pub async fn outbound_media_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state, Direction::Outbound))
}

pub async fn inbound_media_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state, Direction::InboundReceptionist))
}

async fn run_session(mut socket: WebSocket, state: AppState, direction: Direction) {
    tracing::info!("Telco media stream connected");
    let session = Session::new(direction);

    // Outbound frames are queued onto a channel rather than written to
    // `socket` directly from multiple select! arms, same as the teacher's
    // `response_tx`/`response_rx` pair.
    let (telco_tx, mut telco_rx) = mpsc::channel::<AxumWsMessage>(64);

    let connect_state = state.clone();
    let mut agent_connect_task = tokio::spawn(async move { connect_agent(&connect_state).await });
    let mut agent_rx: Option<UnboundedReceiverStream<ServerMessage>> = None;

    let voicemail_deadline = tokio::time::sleep(VOICEMAIL_WATCHDOG);
    tokio::pin!(voicemail_deadline);

    loop {
        tokio::select! {
            biased;

            connect_result = &mut agent_connect_task, if agent_rx.is_none() => {
                match connect_result {
                    Ok(Ok((agent_session, stream))) => {
                        tracing::info!("Agent session open");
                        session.on_agent_open(Arc::new(agent_session)).await;
                        agent_rx = Some(stream);
                        session.drain_inbound().await;
                        session.try_send_handshake().await;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Agent connect failed: {e}");
                        close_telco_agent_unavailable(&mut socket).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Agent connect task failed: {e}");
                        close_telco_agent_unavailable(&mut socket).await;
                        break;
                    }
                }
            }

            ws_msg = socket.recv() => {
                let event_json = match ws_msg {
                    Some(Ok(AxumWsMessage::Text(text))) => text,
                    Some(Ok(AxumWsMessage::Close(_))) | None => {
                        tracing::debug!("Telco WebSocket closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Telco WebSocket read error: {e}");
                        break;
                    }
                    _ => continue,
                };

                let event: StreamEvent = match serde_json::from_str(&event_json) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("Unparseable Telco frame: {e}");
                        continue;
                    }
                };

                if handle_telco_event(&state, &session, event, &telco_tx).await.is_break() {
                    break;
                }
            }

            agent_frame = next_agent_frame(&mut agent_rx) => {
                match agent_frame {
                    Some(message) => {
                        if handle_agent_message(&state, &session, &telco_tx, message).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("Agent WebSocket stream ended");
                        session.on_agent_closed().await;
                        break;
                    }
                }
            }

            Some(msg) = telco_rx.recv() => {
                if socket.send(msg).await.is_err() {
                    tracing::warn!("Failed to write to Telco WebSocket");
                    break;
                }
            }

            _ = &mut voicemail_deadline, if session.is_voicemail() => {
                tracing::info!("Voicemail watchdog elapsed, ending session");
                break;
            }
        }
    }

    finalize_session(&state, &session).await;
}

/// Close the Telco WebSocket with code 1011 (§4.3 "Failure semantics",
/// "`AgentUnavailable` during `Connecting`"). Best-effort: a write failure
/// here just means the peer already went away.
async fn close_telco_agent_unavailable(socket: &mut WebSocket) {
    let _ = socket
        .send(AxumWsMessage::Close(Some(CloseFrame {
            code: AGENT_UNAVAILABLE_CLOSE_CODE,
            reason: "agent unavailable".into(),
        })))
        .await;
}

async fn connect_agent(state: &AppState) -> Result<(AgentSession, UnboundedReceiverStream<ServerMessage>), AgentError> {
    let signed_url = state.prewarm.get_url().await?;
    AgentSession::connect(&signed_url).await
}

/// Resolves to the next decoded Agent server message, or pends forever while
/// no Agent session has opened yet — keeps the `tokio::select!` loop from
/// busy-polling a branch with nothing to read.
async fn next_agent_frame(agent_rx: &mut Option<UnboundedReceiverStream<ServerMessage>>) -> Option<ServerMessage> {
    match agent_rx {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn handle_telco_event(
    state: &AppState,
    session: &Session,
    event: StreamEvent,
    telco_tx: &mpsc::Sender<AxumWsMessage>,
) -> ControlFlow<()> {
    match event {
        StreamEvent::Connected { .. } => {
            tracing::debug!("Telco stream connected");
        }
        StreamEvent::Start { stream_sid, start } => {
            let Some(stream_sid) = StartMetadata::resolved_stream_sid(stream_sid.as_deref(), &start) else {
                tracing::warn!("Telco start frame carried no streamSid, dropping");
                return ControlFlow::Continue(());
            };
            tracing::info!(
                call_id = %start.call_sid,
                stream_sid = %stream_sid,
                "Telco stream started"
            );
            let call_id = start.call_sid.clone();
            session
                .on_telco_start(stream_sid, call_id.clone(), start.custom_parameters)
                .await;
            spawn_mode_resolution(state.clone(), session.clone(), call_id);
            session.try_send_handshake().await;

            for frame in session.drain_outbound().await {
                if telco_tx.send(AxumWsMessage::Text(frame.into())).await.is_err() {
                    return ControlFlow::Break(());
                }
            }
        }
        StreamEvent::Media { media, .. } => {
            session.route_telco_media(media.payload).await;
        }
        StreamEvent::Mark { .. } => {}
        StreamEvent::Stop { .. } => {
            tracing::info!("Telco stream stopped");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Consult the AMD Registry for `call_id`; if no classification has arrived
/// yet, wait a bounded grace period for a late `/call-status` callback
/// before defaulting to normal mode (§4.4 "Race").
fn spawn_mode_resolution(state: AppState, session: Session, call_id: String) {
    tokio::spawn(async move {
        if let Some(classification) = state.amd.take(&call_id).await {
            session.resolve_mode(Some(classification)).await;
            session.try_send_handshake().await;
            return;
        }

        tokio::time::sleep(AMD_GRACE).await;
        let classification = state.amd.take(&call_id).await;
        session.resolve_mode(classification).await;
        session.try_send_handshake().await;
    });
}

async fn handle_agent_message(
    state: &AppState,
    session: &Session,
    telco_tx: &mpsc::Sender<AxumWsMessage>,
    message: ServerMessage,
) -> ControlFlow<()> {
    if let Some(payload) = message.audio_payload() {
        let payload = payload.to_string();
        if let Some(frame) = session.route_agent_audio(payload).await {
            if telco_tx.send(AxumWsMessage::Text(frame.into())).await.is_err() {
                return ControlFlow::Break(());
            }
        }
        return ControlFlow::Continue(());
    }

    match message {
        ServerMessage::Interruption { .. } => {
            session.clear_outbound().await;
            if let Some(stream_id) = session.stream_id().await {
                let _ = telco_tx
                    .send(AxumWsMessage::Text(clear_frame(&stream_id).into()))
                    .await;
            }
        }
        ServerMessage::ClientToolCall { client_tool_call } => {
            let result = state
                .tools
                .dispatch(
                    &client_tool_call.tool_name,
                    &client_tool_call.tool_call_id,
                    &client_tool_call.parameters,
                )
                .await;

            if let Some(agent) = session.agent_handle().await {
                let reply = ClientToolResult::new(
                    client_tool_call.tool_call_id.clone(),
                    result.result_json.clone(),
                    result.is_error,
                );
                if let Err(e) = agent.send(ClientMessage::ClientToolResult(reply)) {
                    tracing::warn!("Failed to send tool result to Agent: {e}");
                }
            }

            if matches!(result.signal, ToolSignal::EndCall | ToolSignal::EndVoicemailCall) {
                return ControlFlow::Break(());
            }
        }
        // Ping is answered transport-side in AgentSession::run_reader; the
        // metadata/transcript/response events are informational only.
        _ => {}
    }
    ControlFlow::Continue(())
}

async fn finalize_session(state: &AppState, session: &Session) {
    if let Some(agent) = session.agent_handle().await {
        agent.close().await;
    }
    if let Some(call_id) = session.call_id().await {
        if let Err(e) = state.telco.finalize_call(&call_id).await {
            tracing::warn!("Failed to finalize Telco call: {e}");
        }
    }
    tracing::info!("Session ended");
}
