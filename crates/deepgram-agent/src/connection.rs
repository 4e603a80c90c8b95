//! The single duplex connection to the voice-agent service.
//!
//! State machine: `Idle -> Connecting -> Open -> Closed`, plus `Open ->
//! Connecting` when the caller reconnects and `Connecting -> Closed` when it
//! closes mid-handshake. At most one physical connection
//! exists at a time; reconnecting always tears the previous one down first.

use crate::{
    events::{AgentEvent, EventBus},
    protocol::{ControlMessage, FunctionCallResponse},
    settings::SettingsConfiguration,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{
            HeaderValue,
            header::{AUTHORIZATION, InvalidHeaderValue},
        },
        protocol::Message,
    },
};
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/agent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid agent endpoint: {0}")]
    InvalidEndpoint(#[source] tungstenite::Error),
    #[error("Credential cannot be used in an authorization header")]
    InvalidCredential(#[from] InvalidHeaderValue),
    #[error("Failed to connect to the agent service: {0}")]
    Handshake(#[source] tungstenite::Error),
    #[error("Failed to send the session configuration: {0}")]
    Settings(#[source] tungstenite::Error),
    #[error("Failed to serialize the session configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Connection attempt was superseded by a later connect or close")]
    Superseded,
}

/// One physical connection: the write half plus the task draining the read half.
struct Link {
    generation: u64,
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl Link {
    async fn shutdown(mut self) {
        self.reader.abort();
        if let Err(e) = self.sink.close().await {
            debug!(generation = self.generation, error = %e, "Error while closing agent connection");
        }
    }
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    link: Option<Link>,
}

/// Owns the connection to the agent service and translates between wire
/// frames and [`AgentEvent`]s.
///
/// All outbound traffic and reconnects go through one async mutex, so sends
/// happen in call order and never interleave with a teardown.
pub struct AgentConnection {
    endpoint: String,
    credential: SecretString,
    settings: SettingsConfiguration,
    events: Arc<EventBus>,
    inner: Arc<Mutex<Inner>>,
}

impl AgentConnection {
    /// Creates an idle connection. Nothing touches the network until [`connect`](Self::connect).
    pub fn new(
        endpoint: impl Into<String>,
        credential: SecretString,
        settings: SettingsConfiguration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential,
            settings,
            events: Arc::new(EventBus::new()),
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Idle,
                generation: 0,
                link: None,
            })),
        }
    }

    pub fn settings(&self) -> &SettingsConfiguration {
        &self.settings
    }

    /// Registers an independent event subscriber.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<AgentEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Opens a fresh connection, closing any existing one first, and sends the
    /// session configuration as the first frame.
    ///
    /// The handshake runs without holding the session lock: while it is in
    /// flight the state is `Connecting` and every send is dropped. An attempt
    /// overtaken by another `connect` or `close` is discarded with
    /// [`ConnectionError::Superseded`].
    ///
    /// On failure an `Error` event is published, the state becomes `Closed`,
    /// and the error is returned. Nothing is retried.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            if let Some(link) = inner.link.take() {
                info!(
                    generation = link.generation,
                    "Closing existing agent connection before reconnecting"
                );
                link.shutdown().await;
            }
            inner.generation += 1;
            inner.state = ConnectionState::Connecting;
            inner.generation
        };

        let opened = self.open(generation).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            drop(inner);
            if let Ok((mut sink, _)) = opened {
                let _ = sink.close().await;
            }
            debug!(generation, "Connection attempt superseded");
            return Err(ConnectionError::Superseded);
        }

        match opened {
            Ok((sink, stream)) => {
                let reader = tokio::spawn(read_frames(
                    stream,
                    generation,
                    self.events.clone(),
                    self.inner.clone(),
                ));
                inner.link = Some(Link {
                    generation,
                    sink,
                    reader,
                });
                inner.state = ConnectionState::Open;
                info!(generation, endpoint = %self.endpoint, "Connected to agent service");
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Closed;
                error!(generation, error = %e, "Agent connection failed");
                self.events
                    .publish(AgentEvent::Error(format!("WebSocket Error: {e}")));
                Err(e)
            }
        }
    }

    /// Performs the handshake and sends the session configuration.
    async fn open(
        &self,
        generation: u64,
    ) -> Result<(WsSink, SplitStream<WsStream>), ConnectionError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(ConnectionError::InvalidEndpoint)?;
        let mut authorization =
            HeaderValue::from_str(&format!("token {}", self.credential.expose_secret()))?;
        authorization.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, authorization);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(ConnectionError::Handshake)?;
        let (mut sink, stream) = ws_stream.split();

        let settings = serde_json::to_string(&self.settings)?;
        sink.send(Message::Text(settings.into()))
            .await
            .map_err(ConnectionError::Settings)?;
        debug!(generation, "Session configuration sent");

        Ok((sink, stream))
    }

    /// Sends a raw audio chunk. Returns `false` (and sends nothing) unless the
    /// connection is open; nothing is queued for later.
    pub async fn send_audio(&self, chunk: &[u8]) -> bool {
        self.send_when_open(Message::Binary(chunk.to_vec().into()), "audio")
            .await
    }

    /// Answers a function call request, correlated by `function_call_id`.
    /// Dropped like audio when the connection is not open.
    pub async fn send_function_response(&self, function_call_id: &str, output: Value) -> bool {
        let response = FunctionCallResponse {
            function_call_id: function_call_id.to_string(),
            output,
        };
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(function_call_id, error = %e, "Failed to serialize function response");
                return false;
            }
        };
        let sent = self
            .send_when_open(Message::Text(payload.into()), "function_response")
            .await;
        if !sent {
            warn!(function_call_id, "Function response dropped: connection not open");
        }
        sent
    }

    /// Publishes text produced locally (by the conversation workflow) on the
    /// same event surface as inbound text responses.
    pub fn emit_text_response(&self, content: &str) {
        self.events
            .publish(AgentEvent::TextResponse(Value::String(content.to_string())));
    }

    /// Closes the current connection, if any, and abandons a handshake that
    /// is still in flight.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        let link = inner.link.take();
        if link.is_none() && inner.state != ConnectionState::Connecting {
            return;
        }
        if let Some(link) = link {
            link.shutdown().await;
        }
        inner.generation += 1;
        inner.state = ConnectionState::Closed;
        info!(generation = inner.generation, "Agent connection closed by caller");
        self.events.publish(AgentEvent::Closed);
    }

    async fn send_when_open(&self, frame: Message, kind: &'static str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != ConnectionState::Open {
            trace!(kind, state = ?inner.state, "Dropping outbound frame");
            return false;
        }
        let Some(link) = inner.link.as_mut() else {
            return false;
        };
        if let Err(e) = link.sink.send(frame).await {
            warn!(kind, error = %e, "Failed to send frame to agent service");
            inner.state = ConnectionState::Closed;
            self.events
                .publish(AgentEvent::Error(format!("WebSocket Error: {e}")));
            return false;
        }
        true
    }
}

/// Drains one connection's inbound frames in arrival order.
async fn read_frames(
    mut stream: SplitStream<WsStream>,
    generation: u64,
    events: Arc<EventBus>,
    inner: Arc<Mutex<Inner>>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(frame) => match demux(frame) {
                Inbound::Event(event) => events.publish(event),
                Inbound::Close => break,
                Inbound::Ignored => {}
            },
            Err(e) => {
                error!(generation, error = %e, "Agent connection error");
                events.publish(AgentEvent::Error(format!("WebSocket Error: {e}")));
                break;
            }
        }
    }

    let mut inner = inner.lock().await;
    if inner.generation != generation {
        return;
    }
    inner.state = ConnectionState::Closed;
    inner.link = None;
    drop(inner);
    info!(generation, "WebSocket connection closed.");
    events.publish(AgentEvent::Closed);
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Event(AgentEvent),
    Close,
    Ignored,
}

/// Binary frames are audio; text frames are control messages.
fn demux(frame: Message) -> Inbound {
    match frame {
        Message::Binary(data) => Inbound::Event(AgentEvent::AudioResponse(Bytes::from(data))),
        Message::Text(text) => Inbound::Event(match ControlMessage::parse(&text) {
            Ok(ControlMessage::FunctionCallRequest(request)) => {
                info!(
                    function_name = request.function_name().unwrap_or_default(),
                    function_call_id = request.function_call_id().unwrap_or_default(),
                    "Function call requested"
                );
                AgentEvent::FunctionCallRequest(request)
            }
            Ok(ControlMessage::UserStartedSpeaking) => {
                info!("User started speaking. Stopping audio playback.");
                AgentEvent::StopAudio
            }
            Ok(ControlMessage::Other(message)) => AgentEvent::TextResponse(message),
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
                AgentEvent::Error(format!("Malformed control message: {e}"))
            }
        }),
        Message::Close(frame) => {
            debug!(?frame, "Agent service sent close frame");
            Inbound::Close
        }
        _ => Inbound::Ignored,
    }
}
