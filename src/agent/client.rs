//! Agent Session Factory (§4.2): opens one Agent WebSocket per call using a
//! prewarmed signed URL, and exposes a bidirectional handle. Connection
//! plumbing (split + reader/writer tasks) is ported from
//! `elevenlabs-convai::client::AgentWebSocket::start_conversation`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::agent::messages::{self, ClientMessage, ServerMessage};
use crate::prewarm::{PrewarmError, SignedUrlSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent WebSocket connect timed out")]
    Timeout,
    #[error("Agent WebSocket connect failed: {0}")]
    ConnectFailed(String),
    #[error("failed to acquire a signed URL: {0}")]
    SignedUrl(#[from] PrewarmError),
    #[error("Agent WebSocket send failed: {0}")]
    SendFailed(String),
}

/// Calls the Agent provider's "get signed URL" endpoint (§4.1).
pub struct ElevenLabsSignedUrlMinter {
    client: reqwest::Client,
    api_key: String,
    agent_id: String,
}

impl ElevenLabsSignedUrlMinter {
    pub fn new(api_key: String, agent_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            agent_id,
        }
    }
}

#[async_trait::async_trait]
impl SignedUrlSource for ElevenLabsSignedUrlMinter {
    async fn mint(&self) -> Result<String, PrewarmError> {
        let url = "https://api.elevenlabs.io/v1/convai/conversation/get-signed-url";
        let resp = self
            .client
            .get(url)
            .header("xi-api-key", &self.api_key)
            .query(&[("agent_id", &self.agent_id)])
            .send()
            .await
            .map_err(|e| PrewarmError::UpstreamAuth(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PrewarmError::UpstreamAuth(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PrewarmError::UpstreamAuth(e.to_string()))?;

        body.get("signed_url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| PrewarmError::UpstreamAuth("response missing signed_url".into()))
    }
}

type WriterHalf = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type ReaderHalf = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A live, connected Agent WebSocket (§4.2). Owned exclusively by its Session.
pub struct AgentSession {
    writer_tx: UnboundedSender<WsMessage>,
}

impl AgentSession {
    /// Open a fresh Agent WebSocket using `signed_url` (§9, "fresh Agent WS
    /// per call" is the canonical resolution of the reuse Open Question).
    /// Returns the session handle plus a stream of decoded server messages.
    pub async fn connect(
        signed_url: &str,
    ) -> Result<(Self, UnboundedReceiverStream<ServerMessage>), AgentError> {
        let connect = connect_async(signed_url);
        let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| AgentError::Timeout)?
            .map_err(|e| AgentError::ConnectFailed(e.to_string()))?;

        let (writer, reader) = stream.split();

        let (writer_tx, writer_rx) = unbounded_channel::<WsMessage>();
        let (caller_tx, caller_rx) = unbounded_channel::<ServerMessage>();

        tokio::spawn(Self::run_writer(writer_rx, writer));
        tokio::spawn(Self::run_reader(reader, caller_tx, writer_tx.clone()));

        Ok((Self { writer_tx }, UnboundedReceiverStream::new(caller_rx)))
    }

    async fn run_writer(mut rx: UnboundedReceiver<WsMessage>, mut writer: WriterHalf) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(msg).await {
                tracing::warn!("Agent WebSocket write failed: {e}");
                break;
            }
        }
    }

    async fn run_reader(
        mut reader: ReaderHalf,
        caller_tx: UnboundedSender<ServerMessage>,
        writer_tx: UnboundedSender<WsMessage>,
    ) {
        while let Some(frame) = reader.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!("Agent WebSocket read error: {e}");
                    break;
                }
            };

            match frame {
                WsMessage::Text(text) => {
                    let parsed: Result<ServerMessage, _> = serde_json::from_str(text.as_str());
                    match parsed {
                        Ok(msg) => {
                            // Ping is answered transport-side before the Session
                            // even sees it — it is purely a liveness echo (§4.3).
                            if let ServerMessage::Ping { ping_event } = &msg {
                                let pong = ClientMessage::Pong(messages::Pong::new(ping_event.event_id));
                                if let Ok(json) = pong.to_json() {
                                    let _ = writer_tx.send(WsMessage::Text(json.into()));
                                }
                            }
                            if caller_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let type_hint = messages::peek_type(text.as_str());
                            tracing::warn!(?type_hint, "Unparseable Agent frame: {e}");
                        }
                    }
                }
                WsMessage::Close(_) => {
                    tracing::debug!("Agent WebSocket closed by peer");
                    break;
                }
                _ => {}
            }
        }
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), AgentError> {
        let json = message
            .to_json()
            .map_err(|e| AgentError::SendFailed(e.to_string()))?;
        self.writer_tx
            .send(WsMessage::Text(json.into()))
            .map_err(|e| AgentError::SendFailed(e.to_string()))
    }

    pub async fn close(&self) {
        let _ = self.writer_tx.send(WsMessage::Close(None));
    }

    /// A session with no live socket behind it, for exercising `Session`'s
    /// routing/handshake logic without a real Agent WebSocket. Returns the
    /// handle plus the channel that `send`/`close` write onto, so a test can
    /// assert on what was sent.
    #[cfg(test)]
    pub fn for_tests() -> (Self, UnboundedReceiver<WsMessage>) {
        let (writer_tx, writer_rx) = unbounded_channel::<WsMessage>();
        (Self { writer_tx }, writer_rx)
    }
}
