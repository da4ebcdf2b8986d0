//! Low-level stream websocket client and outbound command sender.
//!
//! Each call to [`StreamClient::open`] spawns one background worker that owns
//! a single websocket. The worker reports what happens on the socket as
//! [`TransportEvent`]s, in order, over a channel private to that connection.
//! It never reconnects on its own.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::stream::proto::ClientMessage;

/// Default websocket endpoint of the processing backend.
pub const STREAM_ENDPOINT: &str = "ws://localhost:8000/ws/video_stream";
/// Port the processing backend listens on.
pub const BACKEND_PORT: u16 = 8000;
/// Path of the video stream websocket on the backend.
pub const STREAM_PATH: &str = "/ws/video_stream";

/// Tunables for transport workers spawned by a [`StreamClient`].
#[derive(Clone, Debug, Default)]
pub struct StreamClientOptions {
    /// Upper bound on the websocket handshake. `None` waits until the
    /// transport itself gives up.
    pub connect_timeout: Option<Duration>,
}

/// Entry point for opening stream connections.
#[derive(Clone, Debug)]
pub struct StreamClient {
    endpoint: String,
    options: StreamClientOptions,
}

impl Default for StreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClient {
    /// Creates a client for the default backend endpoint.
    pub fn new() -> Self {
        Self {
            endpoint: STREAM_ENDPOINT.to_string(),
            options: StreamClientOptions::default(),
        }
    }

    /// Targets the backend on `host` using the standard port and path.
    pub fn with_host(self, host: &str) -> Self {
        let host = host.trim().trim_end_matches('/');
        self.with_endpoint(format!("ws://{host}:{BACKEND_PORT}{STREAM_PATH}"))
    }

    /// Sets an explicit stream endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint = endpoint.trim_end().to_string();
        self
    }

    pub fn with_options(mut self, options: StreamClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Spawns a transport worker and returns its connection handle.
    ///
    /// Returns immediately; the handshake outcome arrives later as
    /// [`TransportEvent::Opened`] or [`TransportEvent::Error`]. Must be called
    /// from within a Tokio runtime.
    pub fn open(&self) -> StreamConnection {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let url = self.endpoint.clone();
        let connect_timeout = self.options.connect_timeout;
        tokio::spawn(async move {
            transport_worker(url, connect_timeout, command_rx, event_tx).await;
        });

        StreamConnection {
            sender: StreamSender { tx: command_tx },
            events: event_rx,
        }
    }
}

/// Opens transports on behalf of a `StreamSession`.
///
/// [`StreamClient`] opens real websockets; tests and embedders can supply
/// connections built with [`StreamConnection::loopback`].
pub trait Connector {
    fn connect(&mut self) -> StreamConnection;
}

impl Connector for StreamClient {
    fn connect(&mut self) -> StreamConnection {
        self.open()
    }
}

/// What happened on the underlying socket, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the socket accepts outbound messages.
    Opened,
    /// One inbound text payload.
    Message(String),
    /// Connection-level failure. The worker stops after reporting it.
    Error(String),
    /// The socket closed, by the peer or after a local close request.
    Closed,
}

/// Instructions from the session to its transport worker.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCommand {
    Send(ClientMessage),
    Close,
}

/// Handle to one transport: a command sender and its ordered event stream.
#[derive(Debug)]
pub struct StreamConnection {
    sender: StreamSender,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl StreamConnection {
    /// Builds an in-memory connection with no socket behind it.
    ///
    /// The returned [`LoopbackPeer`] plays the transport: it observes commands
    /// and injects events.
    pub fn loopback() -> (Self, LoopbackPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: StreamSender { tx: command_tx },
                events: event_rx,
            },
            LoopbackPeer {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Returns a cloneable sender for transport commands.
    pub fn sender(&self) -> StreamSender {
        self.sender.clone()
    }

    /// Receives the next transport event.
    ///
    /// Returns `None` once the worker has exited and every event was read.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

/// Transport side of a [`StreamConnection::loopback`] pair.
#[derive(Debug)]
pub struct LoopbackPeer {
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl LoopbackPeer {
    /// Injects a transport event. Returns `false` once the connection is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Injects an inbound text payload.
    pub fn emit_text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    /// Returns the next queued command without waiting.
    pub fn try_next_command(&mut self) -> Option<TransportCommand> {
        self.commands.try_recv().ok()
    }

    /// Drains every queued command.
    pub fn drain_commands(&mut self) -> Vec<TransportCommand> {
        let mut drained = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            drained.push(command);
        }
        drained
    }

    /// Returns `true` when the connection side dropped its handle.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}

/// Cloneable sender for transport commands.
#[derive(Clone, Debug)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl StreamSender {
    /// Queues a raw client message for the socket.
    pub fn send(&self, message: ClientMessage) -> Result<(), StreamClientError> {
        self.tx
            .send(TransportCommand::Send(message))
            .map_err(|_| StreamClientError::SendQueueClosed)
    }

    /// Asks the backend to start streaming `message`'s source.
    pub fn start_stream(&self, message: ClientMessage) -> Result<(), StreamClientError> {
        if !matches!(message, ClientMessage::StartStream { .. }) {
            return Err(StreamClientError::Protocol(
                "start_stream requires a start_stream message".to_string(),
            ));
        }
        self.send(message)
    }

    /// Asks the backend to stop the current stream.
    pub fn stop_stream(&self) -> Result<(), StreamClientError> {
        self.send(ClientMessage::StopStream)
    }

    /// Asks the worker to close the socket after flushing queued messages.
    pub fn close(&self) -> Result<(), StreamClientError> {
        self.tx
            .send(TransportCommand::Close)
            .map_err(|_| StreamClientError::SendQueueClosed)
    }

    /// Returns `true` once the worker has dropped its command queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Errors produced by stream transport and protocol handling.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound command queue has been closed.
    #[error("send queue is closed")]
    SendQueueClosed,

    /// The websocket handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Stream protocol contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

enum WorkerOutcome {
    Closed,
    Failed(StreamClientError),
}

async fn transport_worker(
    url: String,
    connect_timeout: Option<Duration>,
    mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let outcome = run_transport(&url, connect_timeout, &mut command_rx, &event_tx).await;
    match outcome {
        WorkerOutcome::Closed => {
            debug!(event = "transport_closed", url = %url);
        }
        WorkerOutcome::Failed(err) => {
            warn!(event = "transport_failed", url = %url, error = %err);
            let _ = event_tx.send(TransportEvent::Error(err.to_string()));
        }
    }
    let _ = event_tx.send(TransportEvent::Closed);
}

async fn run_transport(
    url: &str,
    connect_timeout: Option<Duration>,
    command_rx: &mut mpsc::UnboundedReceiver<TransportCommand>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> WorkerOutcome {
    let handshake = async {
        let result = match connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect_async(url)).await {
                Ok(result) => result,
                Err(_) => return Err(StreamClientError::ConnectTimeout(limit)),
            },
            None => connect_async(url).await,
        };
        result.map_err(StreamClientError::from)
    };
    tokio::pin!(handshake);

    // A close request must abort the handshake; dropping it drops the socket.
    let mut pending = VecDeque::new();
    let connected = loop {
        tokio::select! {
            result = &mut handshake => break result,
            maybe_command = command_rx.recv() => match maybe_command {
                Some(TransportCommand::Send(message)) => pending.push_back(message),
                Some(TransportCommand::Close) | None => {
                    debug!(event = "transport_abandoned_while_connecting", url);
                    return WorkerOutcome::Closed;
                }
            },
        }
    };
    let mut socket = match connected {
        Ok((socket, _)) => socket,
        Err(err) => return WorkerOutcome::Failed(err),
    };

    debug!(event = "transport_opened", url);
    if event_tx.send(TransportEvent::Opened).is_err() {
        let _ = socket.close(None).await;
        return WorkerOutcome::Closed;
    }

    while let Some(message) = pending.pop_front() {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(err) => return WorkerOutcome::Failed(err.into()),
        };
        if let Err(err) = socket.send(Message::Text(text)).await {
            return WorkerOutcome::Failed(err.into());
        }
    }

    loop {
        tokio::select! {
            biased;
            maybe_command = command_rx.recv() => {
                match maybe_command {
                    Some(TransportCommand::Send(message)) => {
                        let text = match message.to_text() {
                            Ok(text) => text,
                            Err(err) => return WorkerOutcome::Failed(err.into()),
                        };
                        if let Err(err) = socket.send(Message::Text(text)).await {
                            return WorkerOutcome::Failed(err.into());
                        }
                    }
                    Some(TransportCommand::Close) | None => {
                        let _ = socket.close(None).await;
                        return WorkerOutcome::Closed;
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx.send(TransportEvent::Message(text)).is_err() {
                            let _ = socket.close(None).await;
                            return WorkerOutcome::Closed;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if event_tx.send(TransportEvent::Message(text)).is_err() {
                                let _ = socket.close(None).await;
                                return WorkerOutcome::Closed;
                            }
                        }
                        Err(_) => {
                            warn!(event = "transport_binary_frame_dropped", url);
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return WorkerOutcome::Failed(err.into());
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return WorkerOutcome::Closed,
                    Some(Err(WsError::ConnectionClosed)) => return WorkerOutcome::Closed,
                    Some(Err(err)) => return WorkerOutcome::Failed(err.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        StreamClient, StreamClientOptions, StreamConnection, TransportCommand, TransportEvent,
        STREAM_ENDPOINT,
    };
    use crate::stream::proto::ClientMessage;
    use std::time::Duration;

    #[test]
    fn stream_client_uses_default_endpoint() {
        let client = StreamClient::new();
        assert_eq!(client.endpoint(), STREAM_ENDPOINT);
    }

    #[test]
    fn stream_client_builds_endpoint_from_host() {
        let client = StreamClient::new().with_host(" 10.0.0.7/ ");
        assert_eq!(client.endpoint(), "ws://10.0.0.7:8000/ws/video_stream");
    }

    #[test]
    fn stream_client_endpoint_override_is_trimmed() {
        let client = StreamClient::new().with_endpoint("ws://backend.example/ws   \n");
        assert_eq!(client.endpoint(), "ws://backend.example/ws");
    }

    #[test]
    fn sender_rejects_non_start_message_for_start_stream() {
        let (connection, mut peer) = StreamConnection::loopback();
        let sender = connection.sender();
        assert!(sender.start_stream(ClientMessage::StopStream).is_err());
        assert!(peer.try_next_command().is_none());
    }

    #[test]
    fn sender_queues_commands_in_order() {
        let (connection, mut peer) = StreamConnection::loopback();
        let sender = connection.sender();
        sender.stop_stream().expect("stop");
        sender.close().expect("close");
        assert_eq!(
            peer.drain_commands(),
            vec![
                TransportCommand::Send(ClientMessage::StopStream),
                TransportCommand::Close
            ]
        );
    }

    #[test]
    fn sender_reports_closed_queue() {
        let (connection, peer) = StreamConnection::loopback();
        let sender = connection.sender();
        drop(peer);
        assert!(sender.is_closed());
        assert!(sender.stop_stream().is_err());
    }

    #[tokio::test]
    async fn loopback_delivers_events_in_order() {
        let (mut connection, peer) = StreamConnection::loopback();
        assert!(peer.emit(TransportEvent::Opened));
        assert!(peer.emit_text("{}"));
        assert!(peer.emit(TransportEvent::Closed));
        drop(peer);

        assert_eq!(connection.recv().await, Some(TransportEvent::Opened));
        assert_eq!(
            connection.recv().await,
            Some(TransportEvent::Message("{}".to_string()))
        );
        assert_eq!(connection.recv().await, Some(TransportEvent::Closed));
        assert_eq!(connection.recv().await, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_then_closed() {
        let client = StreamClient::new()
            .with_endpoint("ws://127.0.0.1:9/ws/video_stream")
            .with_options(StreamClientOptions {
                connect_timeout: Some(Duration::from_secs(2)),
            });
        let mut connection = client.open();

        let first = tokio::time::timeout(Duration::from_secs(5), connection.recv())
            .await
            .expect("worker should report within timeout");
        assert!(matches!(first, Some(TransportEvent::Error(_))));
        let second = tokio::time::timeout(Duration::from_secs(5), connection.recv())
            .await
            .expect("worker should report close");
        assert_eq!(second, Some(TransportEvent::Closed));
    }
}
