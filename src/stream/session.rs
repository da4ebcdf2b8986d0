//! Higher-level stream session wrapper with an observable state snapshot.
//!
//! `StreamSession` owns at most one transport at a time. Transport events are
//! applied one by one, in arrival order, through [`StreamSession::recv`]; each
//! application updates the [`SessionSnapshot`] before returning.
//!
//! Every transport gets its own event channel. Replacing or releasing a
//! transport drops that channel, so events from an abandoned connection can
//! never reach the snapshot.

use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::stream::client::{Connector, StreamClient, StreamConnection, TransportEvent};
use crate::stream::config::SessionConfig;
use crate::stream::metadata::FramePayload;
use crate::stream::proto::{CvMetadataMsg, ServerMessage};

pub const STATUS_IDLE: &str = "Idle";
pub const STATUS_CONNECTING: &str = "Connecting to backend...";
pub const STATUS_RESTARTING: &str = "Restarting stream with new settings...";
pub const STATUS_CONNECTED: &str = "Connected. Requesting stream...";
pub const STATUS_STREAMING: &str = "Streaming live...";
pub const STATUS_STOPPING: &str = "Stopping stream...";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

/// Strength reported while a transport is open.
pub const FULL_CONNECTION_STRENGTH: u8 = 100;

/// Lifecycle of the current connection attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Streaming,
    Closing,
    Disconnected,
    Failed(String),
}

impl ConnectionState {
    /// Returns `true` while the transport accepts outbound messages.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming | Self::Closing)
    }

    /// Returns `true` once the attempt has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed(_))
    }
}

/// Latest-known frame properties.
///
/// Fields are only overwritten when a frame carries them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps_target: Option<u32>,
    pub cv_metadata: Option<CvMetadataMsg>,
}

/// Conditions surfaced to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was called without a source URL.
    #[error("stream URL missing")]
    MissingSource,

    /// A config option is outside the values the backend accepts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An inbound message was not one of the known shapes.
    #[error("undecodable message: {0}")]
    Decode(String),

    /// The backend reported an error for the current stream.
    #[error("{0}")]
    Backend(String),

    /// Connection-level failure; the attempt is over.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer closed the connection.
    #[error("transport closed")]
    TransportClosed,
}

/// Read-only projection rendered by the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Plain-language description of the latest condition.
    pub status: String,
    pub streaming: bool,
    pub frame: FramePayload,
    pub frame_meta: FrameMeta,
    /// 100 while the transport is healthy, 0 otherwise.
    pub connection_strength: u8,
    /// Frames applied during the current attempt.
    pub frames_received: u64,
    /// 1-based number of the current connection attempt, 0 before the first.
    pub attempt: u64,
    pub config: Option<SessionConfig>,
    pub started_at: Option<SystemTime>,
    pub last_error: Option<SessionError>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            status: STATUS_IDLE.to_string(),
            streaming: false,
            frame: FramePayload::NoFrame,
            frame_meta: FrameMeta::default(),
            connection_strength: 0,
            frames_received: 0,
            attempt: 0,
            config: None,
            started_at: None,
            last_error: None,
        }
    }
}

impl SessionSnapshot {
    pub fn cv_metadata(&self) -> Option<&CvMetadataMsg> {
        self.frame_meta.cv_metadata.as_ref()
    }

    /// Frame rate the backend reported, falling back to the requested one.
    pub fn effective_target_fps(&self) -> Option<u32> {
        self.frame_meta
            .fps_target
            .or_else(|| self.config.as_ref().map(|config| config.target_fps))
    }

    fn clear_frame_state(&mut self) {
        self.frame = FramePayload::NoFrame;
        self.frame_meta = FrameMeta::default();
    }
}

/// Session-level event emitted by [`StreamSession::recv`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Transport opened and `start_stream` was sent.
    Connected,
    /// First frame of the stream arrived.
    StreamingStarted,
    /// A later frame refreshed the frame data.
    Frame,
    /// Backend status text that did not change the stream state.
    Status { message: String },
    /// Backend reported the stream stopped; frame state was cleared.
    StreamStopped { message: String },
    /// Backend sent an explicit error; frame state was cleared.
    BackendError { message: String },
    /// An inbound message was discarded without changing the state.
    MessageDropped { reason: String },
    /// Transport closed; the attempt is over.
    Disconnected,
    /// Transport failed; the attempt is over.
    Failed { reason: String },
}

/// Returns `true` when a status text announces that the backend stopped
/// streaming.
pub fn is_stream_stopped_status(message: &str) -> bool {
    let trimmed = message.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.eq_ignore_ascii_case("stream stopped")
}

/// Stateful wrapper that maps one logical stream onto one transport.
#[derive(Debug)]
pub struct StreamSession<C: Connector = StreamClient> {
    connector: C,
    transport: Option<StreamConnection>,
    snapshot: SessionSnapshot,
    publisher: watch::Sender<SessionSnapshot>,
    attempts: u64,
}

impl StreamSession<StreamClient> {
    /// Creates an idle session that connects through `client`.
    pub fn with_client(client: StreamClient) -> Self {
        Self::new(client)
    }
}

impl<C: Connector> StreamSession<C> {
    /// Creates an idle session. No transport is opened until [`Self::start`].
    pub fn new(connector: C) -> Self {
        let snapshot = SessionSnapshot::default();
        let (publisher, _) = watch::channel(snapshot.clone());
        Self {
            connector,
            transport: None,
            snapshot,
            publisher,
            attempts: 0,
        }
    }

    /// Returns the connector used to open transports.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Returns a receiver that observes every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.snapshot.state
    }

    pub fn status(&self) -> &str {
        &self.snapshot.status
    }

    pub fn frame(&self) -> &FramePayload {
        &self.snapshot.frame
    }

    pub fn frame_meta(&self) -> &FrameMeta {
        &self.snapshot.frame_meta
    }

    pub fn cv_metadata(&self) -> Option<&CvMetadataMsg> {
        self.snapshot.cv_metadata()
    }

    pub fn is_streaming(&self) -> bool {
        self.snapshot.streaming
    }

    /// Returns `true` while the session holds a transport.
    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Opens a transport for `config`, replacing any existing one.
    ///
    /// An invalid config leaves a running transport untouched and is reported
    /// both as the returned error and in the snapshot.
    pub fn start(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if let Err(err) = config.validate() {
            warn!(event = "session_start_rejected", error = %err);
            self.snapshot.status = format!("Error: {err}");
            self.snapshot.last_error = Some(err.clone());
            self.publish();
            return Err(err);
        }

        let restarted = self.release_transport();
        self.attempts += 1;
        let connection = self.connector.connect();
        self.transport = Some(connection);

        info!(
            event = "session_connecting",
            attempt = self.attempts,
            source_url = %config.source_url,
            fps = config.target_fps,
            quality = config.jpeg_quality,
            restarted
        );
        self.snapshot = SessionSnapshot {
            state: ConnectionState::Connecting,
            status: if restarted {
                STATUS_RESTARTING
            } else {
                STATUS_CONNECTING
            }
            .to_string(),
            attempt: self.attempts,
            config: Some(config),
            started_at: Some(SystemTime::now()),
            ..SessionSnapshot::default()
        };
        self.publish();
        Ok(())
    }

    /// Restarts the session with a new config.
    ///
    /// The backend has no in-band parameter update, so this is always a full
    /// restart.
    pub fn reconfigure(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        self.start(config)
    }

    /// Asks the backend to stop streaming. No-op unless connected.
    pub fn stop(&mut self) {
        if !matches!(
            self.snapshot.state,
            ConnectionState::Connected | ConnectionState::Streaming
        ) {
            debug!(event = "session_stop_ignored", state = ?self.snapshot.state);
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        if let Err(err) = transport.sender().stop_stream() {
            warn!(event = "session_stop_send_failed", error = %err);
        }

        info!(event = "session_stopping", attempt = self.attempts);
        self.snapshot.state = ConnectionState::Closing;
        self.snapshot.streaming = false;
        self.snapshot.status = STATUS_STOPPING.to_string();
        self.publish();
    }

    /// Closes any transport and resets the snapshot to idle.
    ///
    /// Safe to call repeatedly and from drop paths; never blocks.
    pub fn teardown(&mut self) {
        let released = self.release_transport();
        if released {
            info!(event = "session_teardown", attempt = self.attempts);
        }
        if self.snapshot != SessionSnapshot::default() {
            self.snapshot = SessionSnapshot::default();
            self.publish();
        }
    }

    /// Receives the next transport event and applies it.
    ///
    /// Returns `None` when no transport is held. Cancel-safe.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let transport = self.transport.as_mut()?;
        let event = transport.recv().await.unwrap_or(TransportEvent::Closed);
        Some(self.apply_transport_event(event))
    }

    fn apply_transport_event(&mut self, event: TransportEvent) -> SessionEvent {
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(text) => self.on_text(&text),
            TransportEvent::Error(reason) => self.fail_attempt(reason),
            TransportEvent::Closed => self.on_closed(),
        }
    }

    fn on_opened(&mut self) -> SessionEvent {
        if self.snapshot.state != ConnectionState::Connecting {
            return dropped("transport opened outside of connecting state");
        }
        let Some(config) = self.snapshot.config.as_ref() else {
            return dropped("transport opened without a config");
        };
        let start_message = config.start_message();
        let sent = match self.transport.as_ref() {
            Some(transport) => transport.sender().start_stream(start_message),
            None => return dropped("transport opened after release"),
        };
        if let Err(err) = sent {
            return self.fail_attempt(err.to_string());
        }

        info!(event = "session_connected", attempt = self.attempts);
        self.snapshot.state = ConnectionState::Connected;
        self.snapshot.connection_strength = FULL_CONNECTION_STRENGTH;
        self.snapshot.status = STATUS_CONNECTED.to_string();
        self.publish();
        SessionEvent::Connected
    }

    fn on_text(&mut self, text: &str) -> SessionEvent {
        if !self.snapshot.state.is_open() {
            debug!(event = "session_message_before_open", state = ?self.snapshot.state);
            return dropped("message received before transport opened");
        }
        match ServerMessage::from_text(text) {
            Ok(message) => self.apply_message(message),
            Err(err) => {
                warn!(event = "session_message_undecodable", attempt = self.attempts, error = %err);
                let err = SessionError::Decode(err.to_string());
                let reason = err.to_string();
                self.snapshot.last_error = Some(err);
                self.publish();
                SessionEvent::MessageDropped { reason }
            }
        }
    }

    fn apply_message(&mut self, message: ServerMessage) -> SessionEvent {
        match message {
            ServerMessage::Frame {
                image,
                width,
                height,
                fps_target,
                metadata,
            } => {
                if self.snapshot.state == ConnectionState::Closing {
                    return dropped("frame received after stop was requested");
                }
                let snapshot = &mut self.snapshot;
                snapshot.frame = FramePayload::Jpeg(image);
                if width.is_some() {
                    snapshot.frame_meta.width = width;
                }
                if height.is_some() {
                    snapshot.frame_meta.height = height;
                }
                if fps_target.is_some() {
                    snapshot.frame_meta.fps_target = fps_target;
                }
                if metadata.is_some() {
                    snapshot.frame_meta.cv_metadata = metadata;
                }
                snapshot.frames_received += 1;

                let event = if snapshot.streaming {
                    SessionEvent::Frame
                } else {
                    snapshot.streaming = true;
                    snapshot.state = ConnectionState::Streaming;
                    snapshot.status = STATUS_STREAMING.to_string();
                    info!(event = "session_streaming", attempt = self.attempts);
                    SessionEvent::StreamingStarted
                };
                self.publish();
                event
            }
            ServerMessage::Status { message } => {
                self.snapshot.status = message.clone();
                let event = if is_stream_stopped_status(&message) {
                    info!(event = "session_stream_stopped", attempt = self.attempts);
                    self.snapshot.streaming = false;
                    self.snapshot.clear_frame_state();
                    self.snapshot.state = ConnectionState::Connected;
                    SessionEvent::StreamStopped { message }
                } else {
                    debug!(event = "session_status", message = %message);
                    SessionEvent::Status { message }
                };
                self.publish();
                event
            }
            ServerMessage::Error { message } => {
                warn!(event = "session_backend_error", attempt = self.attempts, message = %message);
                let snapshot = &mut self.snapshot;
                snapshot.status = format!("Error: {message}");
                snapshot.streaming = false;
                snapshot.connection_strength = 0;
                snapshot.clear_frame_state();
                if snapshot.state == ConnectionState::Streaming {
                    snapshot.state = ConnectionState::Connected;
                }
                snapshot.last_error = Some(SessionError::Backend(message.clone()));
                self.publish();
                SessionEvent::BackendError { message }
            }
        }
    }

    fn on_closed(&mut self) -> SessionEvent {
        self.transport = None;
        info!(event = "session_disconnected", attempt = self.attempts);
        let snapshot = &mut self.snapshot;
        snapshot.state = ConnectionState::Disconnected;
        snapshot.status = STATUS_DISCONNECTED.to_string();
        snapshot.streaming = false;
        snapshot.connection_strength = 0;
        snapshot.clear_frame_state();
        snapshot.last_error = Some(SessionError::TransportClosed);
        self.publish();
        SessionEvent::Disconnected
    }

    fn fail_attempt(&mut self, reason: String) -> SessionEvent {
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.sender().close() {
                debug!(event = "session_fail_close_failed", error = %err);
            }
        }
        warn!(event = "session_failed", attempt = self.attempts, reason = %reason);
        let snapshot = &mut self.snapshot;
        snapshot.state = ConnectionState::Failed(reason.clone());
        snapshot.status = format!("Connection failed: {reason}");
        snapshot.streaming = false;
        snapshot.connection_strength = 0;
        snapshot.clear_frame_state();
        snapshot.last_error = Some(SessionError::Transport(reason.clone()));
        self.publish();
        SessionEvent::Failed { reason }
    }

    /// Sends `stop_stream` when the transport is open and no stop is pending,
    /// then closes it. Returns `true` when a transport was held.
    fn release_transport(&mut self) -> bool {
        let Some(transport) = self.transport.take() else {
            return false;
        };
        let sender = transport.sender();
        if matches!(
            self.snapshot.state,
            ConnectionState::Connected | ConnectionState::Streaming
        ) {
            if let Err(err) = sender.stop_stream() {
                debug!(event = "session_release_stop_failed", error = %err);
            }
        }
        if let Err(err) = sender.close() {
            debug!(event = "session_release_close_failed", error = %err);
        }
        true
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot.clone());
    }
}

impl<C: Connector> Drop for StreamSession<C> {
    fn drop(&mut self) {
        self.release_transport();
    }
}

fn dropped(reason: &str) -> SessionEvent {
    SessionEvent::MessageDropped {
        reason: reason.to_string(),
    }
}
