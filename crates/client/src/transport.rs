//! Dual-mode detection transport.
//!
//! [`TransportClient`] prefers a persistent streaming connection and falls
//! back to one-shot `POST /detect` calls whenever the stream is not ready.
//! It owns the connection state machine, the reconnect/degrade policy, the
//! health check and the keep-alive.
//!
//! Network work runs on spawned tasks that report back through
//! [`TransportEvent`]s; the owner passes each event to
//! [`TransportClient::handle`], so all state lives on one task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eyesis_core::detection::{DetectionRequest, DetectionResult};
use eyesis_core::types::{PersonId, VideoSeconds};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::DetectorApi;
use crate::client::{DetectorClient, DetectorClientError, WsStream};
use crate::events::{TransportEvent, TransportEventKind};
use crate::messages::{normalize, parse_message, ClientMessage, DetectBody, ServerMessage};
use crate::reconnect::ReconnectConfig;

/// Close code of an intentional, orderly shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// REST base URL, e.g. `http://localhost:5000/api`.
    pub api_url: String,
    /// Streaming endpoint URL, e.g. `ws://localhost:5000/ws/detect`.
    pub ws_url: String,
    pub connect_timeout: Duration,
    pub health_check_timeout: Duration,
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl TransportConfig {
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            connect_timeout: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(3),
            keepalive_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, watched-person config not yet acknowledged.
    ConnectedUnconfigured,
    ConnectedReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Streaming preferred; one-shot calls used while it is not ready.
    Persistent,
    /// Streaming given up for the rest of the session.
    Discrete,
}

/// Conditions under which a dropped stream may be re-established.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectGate {
    pub detection_active: bool,
    pub video_ended: bool,
}

impl ReconnectGate {
    fn allows_reconnect(self) -> bool {
        self.detection_active && !self.video_ended
    }
}

/// What an event means for the detection loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutcome {
    /// The stream acknowledged its config and accepts frames.
    Ready,
    /// A streamed frame's result.
    Detection(DetectionResult),
    /// The backend rejected the in-flight frame.
    ServerError(String),
    /// Streaming was abandoned; only one-shot calls remain.
    Degraded,
    /// The stream closed.
    Disconnected,
}

pub struct TransportClient {
    config: TransportConfig,
    api: Arc<DetectorApi>,
    client: DetectorClient,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    state: ConnectionState,
    mode: TransportMode,
    /// Bumped on every connect and disconnect; older events are stale.
    generation: u64,
    attempts: u32,
    reconnect_pending: bool,
    health_checked: bool,
    watched_ids: Vec<PersonId>,
    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    session_cancel: CancellationToken,
    shutdown: CancellationToken,
    /// Capture time per streamed frame id, for responses without a
    /// timestamp.
    capture_times: HashMap<u64, VideoSeconds>,
    last_capture_time: VideoSeconds,
}

impl TransportClient {
    /// Create a disconnected client and the receiver its background tasks
    /// report to.
    pub fn new(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let client = Self {
            api: Arc::new(DetectorApi::new(config.api_url.clone())),
            client: DetectorClient::new(config.ws_url.clone(), config.connect_timeout),
            config,
            events_tx,
            state: ConnectionState::Disconnected,
            mode: TransportMode::Persistent,
            generation: 0,
            attempts: 0,
            reconnect_pending: false,
            health_checked: false,
            watched_ids: Vec::new(),
            outbound: None,
            session_cancel: shutdown.child_token(),
            shutdown,
            capture_times: HashMap::new(),
            last_capture_time: 0.0,
        };
        (client, events_rx)
    }

    pub fn api(&self) -> &DetectorApi {
        &self.api
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn is_ready(&self) -> bool {
        self.mode == TransportMode::Persistent && self.state == ConnectionState::ConnectedReady
    }

    /// Reconnect attempts since the stream was last ready.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open the streaming connection in the background. No-op when
    /// streaming has been abandoned or a connection already exists.
    ///
    /// The first connect of a session runs the health check first.
    pub fn connect(&mut self) {
        if self.mode == TransportMode::Discrete || self.state != ConnectionState::Disconnected {
            return;
        }

        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.session_cancel.cancel();
        self.session_cancel = self.shutdown.child_token();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);

        let health_check = !self.health_checked;
        self.health_checked = true;

        let task = ConnectionTask {
            api: Arc::clone(&self.api),
            client: self.client.clone(),
            health_check,
            health_check_timeout: self.config.health_check_timeout,
            keepalive: self.config.keepalive_interval,
            emitter: Emitter {
                generation: self.generation,
                tx: self.events_tx.clone(),
            },
            cancel: self.session_cancel.clone(),
        };

        tracing::info!(
            url = %self.client.ws_url(),
            generation = self.generation,
            health_check,
            "Connecting to detection stream",
        );
        tokio::spawn(task.run(outbound_rx));
    }

    /// Close the stream on purpose. Pending reconnects are dropped and
    /// events of the closed connection become stale.
    pub fn disconnect(&mut self) {
        self.generation += 1;
        self.session_cancel.cancel();
        self.outbound = None;
        self.state = ConnectionState::Disconnected;
        self.reconnect_pending = false;
        self.capture_times.clear();
    }

    /// Disconnect and restore streaming preference for a new session.
    pub fn reset(&mut self) {
        self.disconnect();
        self.mode = TransportMode::Persistent;
        self.attempts = 0;
        self.health_checked = false;
    }

    /// Stop every background task for good.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.shutdown.cancel();
    }

    /// Set the watched persons. Sent immediately when the socket is open,
    /// and again after every (re)connect.
    ///
    /// Frames streamed for the previous set no longer belong to anyone.
    pub fn configure(&mut self, watched_ids: Vec<PersonId>) {
        self.watched_ids = watched_ids;
        self.capture_times.clear();
        if matches!(
            self.state,
            ConnectionState::ConnectedUnconfigured | ConnectionState::ConnectedReady
        ) {
            self.send_config();
        }
    }

    /// Try to stream a frame. Returns `false` when the stream is not ready;
    /// the caller then uses [`submit_frame_discrete`](Self::submit_frame_discrete).
    pub fn submit_frame(&mut self, request: &DetectionRequest) -> bool {
        if !self.is_ready() {
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };
        if outbound.send(ClientMessage::frame(request)).is_err() {
            return false;
        }

        self.capture_times
            .insert(request.sequence_number, request.video_time_seconds);
        self.last_capture_time = request.video_time_seconds;
        tracing::debug!(
            frame_id = request.sequence_number,
            video_time = request.video_time_seconds,
            "Frame streamed",
        );
        true
    }

    /// One-shot detection call, independent of the stream. Resolves to
    /// `None` on any failure.
    pub fn submit_frame_discrete(
        &self,
        request: &DetectionRequest,
    ) -> impl Future<Output = Option<DetectionResult>> + Send + 'static {
        let api = Arc::clone(&self.api);
        let body = DetectBody::from(request);
        let frame_id = request.sequence_number;
        let capture_time = request.video_time_seconds;

        async move {
            match api.detect(&body).await {
                Ok(payload) => {
                    let mut result = normalize(&payload, capture_time);
                    result.frame_id.get_or_insert(frame_id);
                    Some(result)
                }
                Err(e) => {
                    tracing::warn!(frame_id, error = %e, "One-shot detection failed");
                    None
                }
            }
        }
    }

    /// Apply a background event to the state machine.
    pub fn handle(&mut self, event: TransportEvent, gate: ReconnectGate) -> Option<TransportOutcome> {
        if event.generation != self.generation {
            tracing::trace!(
                generation = event.generation,
                current = self.generation,
                "Ignoring stale transport event",
            );
            return None;
        }

        match event.kind {
            TransportEventKind::HealthCheckFailed => {
                self.degrade("health check failed");
                Some(TransportOutcome::Degraded)
            }
            TransportEventKind::ConnectTimedOut => {
                self.degrade("connection timed out");
                Some(TransportOutcome::Degraded)
            }
            TransportEventKind::ConnectFailed(reason) => {
                tracing::warn!(error = %reason, "Detection stream connection failed");
                Some(self.on_closed(None, gate))
            }
            TransportEventKind::Opened => {
                self.state = ConnectionState::ConnectedUnconfigured;
                if !self.watched_ids.is_empty() {
                    self.send_config();
                }
                None
            }
            TransportEventKind::Closed { code } => Some(self.on_closed(code, gate)),
            TransportEventKind::ReconnectDue => {
                self.reconnect_pending = false;
                if gate.allows_reconnect() {
                    tracing::info!(attempt = self.attempts, "Reconnecting to detection stream");
                    self.connect();
                }
                None
            }
            TransportEventKind::Message(message) => self.on_message(message),
        }
    }

    // ---- private helpers ----

    fn on_message(&mut self, message: ServerMessage) -> Option<TransportOutcome> {
        match message {
            ServerMessage::ConfigUpdated { suspect_ids } => {
                if self.state != ConnectionState::ConnectedUnconfigured {
                    return None;
                }
                self.state = ConnectionState::ConnectedReady;
                self.attempts = 0;
                tracing::info!(watched = suspect_ids.len(), "Detection stream ready");
                Some(TransportOutcome::Ready)
            }
            ServerMessage::Detection { data } => {
                let capture_time = data
                    .frame_id
                    .and_then(|id| self.capture_times.remove(&id))
                    .unwrap_or(self.last_capture_time);
                let result = normalize(&data, capture_time);
                tracing::debug!(
                    frame_id = ?result.frame_id,
                    detections = result.detections.len(),
                    "Streamed detection received",
                );
                Some(TransportOutcome::Detection(result))
            }
            ServerMessage::Error { message } => {
                tracing::warn!(error = %message, "Detector rejected frame");
                self.capture_times.clear();
                Some(TransportOutcome::ServerError(message))
            }
            ServerMessage::Pong => {
                tracing::trace!("Keep-alive acknowledged");
                None
            }
        }
    }

    fn on_closed(&mut self, code: Option<u16>, gate: ReconnectGate) -> TransportOutcome {
        self.state = ConnectionState::Disconnected;
        self.outbound = None;
        self.capture_times.clear();

        if code == Some(NORMAL_CLOSE) {
            tracing::info!("Detection stream closed normally");
            return TransportOutcome::Disconnected;
        }
        if self.mode == TransportMode::Discrete
            || self.reconnect_pending
            || !gate.allows_reconnect()
        {
            tracing::info!(?code, "Detection stream closed; not reconnecting");
            return TransportOutcome::Disconnected;
        }

        if !self.config.reconnect.allows(self.attempts) {
            self.degrade("reconnect attempts exhausted");
            return TransportOutcome::Degraded;
        }

        let delay = self.config.reconnect.delay_for_attempt(self.attempts);
        self.attempts += 1;
        self.reconnect_pending = true;
        tracing::warn!(
            ?code,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "Detection stream dropped, scheduling reconnect",
        );

        let emitter = Emitter {
            generation: self.generation,
            tx: self.events_tx.clone(),
        };
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => emitter.emit(TransportEventKind::ReconnectDue),
            }
        });

        TransportOutcome::Disconnected
    }

    fn degrade(&mut self, reason: &str) {
        tracing::warn!(reason, "Falling back to one-shot detection calls");
        self.mode = TransportMode::Discrete;
        self.session_cancel.cancel();
        self.outbound = None;
        self.state = ConnectionState::Disconnected;
        self.reconnect_pending = false;
        self.capture_times.clear();
    }

    fn send_config(&mut self) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        let message = ClientMessage::Config {
            suspect_ids: self.watched_ids.clone(),
        };
        if outbound.send(message).is_ok() {
            self.state = ConnectionState::ConnectedUnconfigured;
            tracing::debug!(watched = self.watched_ids.len(), "Sent watched-person config");
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Emitter {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl Emitter {
    fn emit(&self, kind: TransportEventKind) {
        let _ = self.tx.send(TransportEvent {
            generation: self.generation,
            kind,
        });
    }
}

struct ConnectionTask {
    api: Arc<DetectorApi>,
    client: DetectorClient,
    health_check: bool,
    health_check_timeout: Duration,
    keepalive: Duration,
    emitter: Emitter,
    cancel: CancellationToken,
}

impl ConnectionTask {
    /// Check health (once per session), connect, then drive the session until the
    /// socket closes or the connection is cancelled.
    async fn run(self, outbound: mpsc::UnboundedReceiver<ClientMessage>) {
        let cancel = self.cancel.clone();
        let ws_stream = tokio::select! {
            _ = cancel.cancelled() => return,
            stream = self.open() => stream,
        };
        let Some(ws_stream) = ws_stream else {
            return;
        };

        self.emitter.emit(TransportEventKind::Opened);
        let code = run_session(ws_stream, outbound, self.keepalive, &self.emitter, &cancel).await;
        self.emitter.emit(TransportEventKind::Closed { code });
    }

    async fn open(&self) -> Option<WsStream> {
        if self.health_check {
            match tokio::time::timeout(self.health_check_timeout, self.api.health()).await {
                Ok(Ok(health)) => {
                    tracing::info!(
                        status = %health.status,
                        active_connections = health.active_connections,
                        "Detector health check passed",
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Detector health check failed");
                    self.emitter.emit(TransportEventKind::HealthCheckFailed);
                    return None;
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.health_check_timeout.as_millis() as u64,
                        "Detector health check timed out",
                    );
                    self.emitter.emit(TransportEventKind::HealthCheckFailed);
                    return None;
                }
            }
        }

        match self.client.connect().await {
            Ok(conn) => Some(conn.ws_stream),
            Err(DetectorClientError::Timeout(after)) => {
                tracing::warn!(timeout_ms = after.as_millis() as u64, "Detection stream connect timed out");
                self.emitter.emit(TransportEventKind::ConnectTimedOut);
                None
            }
            Err(e) => {
                self.emitter
                    .emit(TransportEventKind::ConnectFailed(e.to_string()));
                None
            }
        }
    }
}

/// Drive one streaming session: forward outbound messages, ping on a
/// timer, and report parsed incoming messages. Returns the close code.
async fn run_session(
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    keepalive: Duration,
    emitter: &Emitter,
    cancel: &CancellationToken,
) -> Option<u16> {
    let (mut sink, mut stream) = ws_stream.split();
    let start = tokio::time::Instant::now() + keepalive;
    let mut ticker = tokio::time::interval_at(start, keepalive);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                return Some(NORMAL_CLOSE);
            }
            _ = ticker.tick() => {
                tracing::trace!("Sending keep-alive ping");
                if let Err(e) = sink.send(Message::Text(ClientMessage::Ping.to_json())).await {
                    tracing::warn!(error = %e, "Keep-alive send failed");
                    return None;
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    return Some(NORMAL_CLOSE);
                };
                if let Err(e) = sink.send(Message::Text(msg.to_json())).await {
                    let error = DetectorClientError::Protocol(e.to_string());
                    tracing::warn!(error = %error, "Detection stream send failed");
                    return None;
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_message(&text) {
                        Ok(message) => emitter.emit(TransportEventKind::Message(message)),
                        Err(e) => {
                            tracing::warn!(error = %e, raw = %text, "Unknown or malformed detector message");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Detector closed stream");
                        return frame.map(|f| u16::from(f.code));
                    }
                    Some(Ok(_)) => {
                        // Binary / Ping / Pong / Frame: nothing to do.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Detection stream receive error");
                        return None;
                    }
                    None => {
                        tracing::info!("Detection stream exhausted");
                        return None;
                    }
                }
            }
        }
    }
}
