//! Live Channel task
//!
//! Owns the room's duplex connection. The pure `LiveChannelState` machine
//! decides when to connect, back off, or give up; this task executes its
//! effects, decodes inbound frames, keeps the connection alive with pings,
//! and reports every transition to the core logic task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use roomsync_core::errors::TransportError;
use roomsync_core::protocol::LiveChannelState;
use roomsync_core::{
    Event, HeartbeatConfig, LiveChannelEffect, LiveChannelEvent, LivePayload, ReconnectConfig,
    Result, SyncError, TimeSource,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

// ----------------------------------------------------------------------------
// Connection Abstraction
// ----------------------------------------------------------------------------

/// Inbound frame as seen by the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application payload
    Text(String),
    /// Ping, pong or other liveness-only traffic, including dropped frames
    Control,
}

/// One established duplex connection
#[async_trait]
pub trait ChannelConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn send_ping(&mut self) -> Result<()>;

    /// Next inbound frame; `None` once the peer has closed the connection
    async fn next_frame(&mut self) -> Option<Result<Frame>>;

    async fn close(&mut self);
}

/// Factory for connections to the Live Channel Server
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelConnection>>;
}

// ----------------------------------------------------------------------------
// WebSocket Implementation
// ----------------------------------------------------------------------------

/// Connects to the Live Channel Server over WebSocket
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChannelConnection>> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SyncError::connection_failed(url, e.to_string()))?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn closed(err: impl ToString) -> SyncError {
    SyncError::Transport(TransportError::Closed {
        reason: err.to_string(),
    })
}

/// Binary frames carry the same JSON as text frames
///
/// Invalid UTF-8 is dropped and only counts as liveness.
fn binary_frame(bytes: Vec<u8>) -> Frame {
    match String::from_utf8(bytes) {
        Ok(text) => Frame::Text(text),
        Err(e) => {
            warn!(
                len = e.as_bytes().len(),
                "Dropping binary frame that is not UTF-8: {}",
                e.utf8_error()
            );
            Frame::Control
        }
    }
}

#[async_trait]
impl ChannelConnection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(WsMessage::Text(text)).await.map_err(closed)
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.stream
            .send(WsMessage::Ping(Vec::new()))
            .await
            .map_err(closed)
    }

    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        match self.stream.next().await? {
            Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text))),
            Ok(WsMessage::Binary(bytes)) => Some(Ok(binary_frame(bytes))),
            Ok(WsMessage::Close(frame)) => {
                debug!(frame = ?frame, "Server closed live channel");
                None
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                Some(Ok(Frame::Control))
            }
            Err(e) => Some(Err(closed(e))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing live channel: {}", e);
        }
    }
}

// ----------------------------------------------------------------------------
// Live Channel Task
// ----------------------------------------------------------------------------

/// Requests from the core logic task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCommand {
    /// Write a frame; bounced back as `LiveSendFailed` when not connected
    Send(LivePayload),
    /// Start over after a permanent failure
    Reconnect,
    /// Close the connection and stop reconnecting
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connect,
    Connected,
    Backoff,
    Parked,
    Stop,
}

pub struct LiveChannelTask {
    url: String,
    connector: Arc<dyn ChannelConnector>,
    reconnect: ReconnectConfig,
    heartbeat: HeartbeatConfig,
    time_source: Arc<dyn TimeSource>,
    commands: mpsc::Receiver<LiveCommand>,
    events: mpsc::Sender<Event>,
    state: LiveChannelState,
}

impl LiveChannelTask {
    pub fn new(
        url: String,
        connector: Arc<dyn ChannelConnector>,
        reconnect: ReconnectConfig,
        heartbeat: HeartbeatConfig,
        time_source: Arc<dyn TimeSource>,
        commands: mpsc::Receiver<LiveCommand>,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            url,
            connector,
            reconnect,
            heartbeat,
            time_source,
            commands,
            events,
            state: LiveChannelState::Idle,
        }
    }

    /// Run until closed or until the core logic task goes away
    pub async fn run(mut self) {
        info!(url = %self.url, "Live channel task starting");
        let mut event = LiveChannelEvent::Open;
        let mut connection: Option<Box<dyn ChannelConnection>> = None;

        loop {
            let Some(effects) = self.apply(event).await else {
                break;
            };

            let mut delay = None;
            for effect in effects {
                match effect {
                    LiveChannelEffect::Connect => {}
                    LiveChannelEffect::ScheduleReconnect { delay: d, attempt } => {
                        info!(
                            attempt,
                            delay_ms = d.as_millis() as u64,
                            "Live channel reconnecting after backoff"
                        );
                        delay = Some(d);
                    }
                    LiveChannelEffect::ReportPermanentFailure { reason } => {
                        error!(reason = %reason, "Live channel retry budget exhausted");
                    }
                    LiveChannelEffect::Disconnect => {
                        if let Some(mut conn) = connection.take() {
                            conn.close().await;
                        }
                    }
                }
            }

            let next = match self.phase() {
                Phase::Connect => match self.connect_phase().await {
                    Some((event, conn)) => {
                        connection = conn;
                        Some(event)
                    }
                    None => None,
                },
                Phase::Connected => match connection.take() {
                    Some(conn) => self.connected_phase(conn).await,
                    None => Some(LiveChannelEvent::ConnectionLost {
                        reason: "connection missing".to_string(),
                    }),
                },
                Phase::Backoff => {
                    let delay = delay.unwrap_or(self.reconnect.initial_delay);
                    self.backoff_phase(delay).await
                }
                Phase::Parked => self.parked_phase().await,
                Phase::Stop => None,
            };

            match next {
                Some(next_event) => event = next_event,
                None => break,
            }
        }

        if let Some(mut conn) = connection.take() {
            conn.close().await;
        }
        info!("Live channel task stopped");
    }

    fn phase(&self) -> Phase {
        match self.state {
            LiveChannelState::Connecting(_) => Phase::Connect,
            LiveChannelState::Connected(_) => Phase::Connected,
            LiveChannelState::Backoff(_) => Phase::Backoff,
            LiveChannelState::Failed(_) => Phase::Parked,
            LiveChannelState::Idle | LiveChannelState::Closed => Phase::Stop,
        }
    }

    /// Transition the state machine and report it; `None` stops the task
    async fn apply(&mut self, event: LiveChannelEvent) -> Option<Vec<LiveChannelEffect>> {
        let now = self.time_source.now();
        let transition = match self.state.clone().transition(event, now, &self.reconnect) {
            Ok(transition) => transition,
            Err(e) => {
                error!("Live channel state machine rejected event: {}", e);
                return None;
            }
        };

        debug!(transition = %transition.audit_entry, "Live channel transition");
        self.state = transition.new_state;
        let report = Event::ChannelTransition {
            status: self.state.status(),
            audit_entry: transition.audit_entry,
        };
        if self.events.send(report).await.is_err() {
            debug!("Core logic task gone, stopping live channel");
            return None;
        }
        Some(transition.effects)
    }

    /// Return an undeliverable frame to the core logic task
    async fn bounce(&mut self, payload: LivePayload) -> bool {
        self.events
            .send(Event::LiveSendFailed { payload })
            .await
            .is_ok()
    }

    async fn connect_phase(
        &mut self,
    ) -> Option<(LiveChannelEvent, Option<Box<dyn ChannelConnection>>)> {
        debug!(url = %self.url, "Connecting live channel");
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let timeout = self.reconnect.connect_timeout;
        let attempt = tokio::time::timeout(timeout, async move { connector.connect(&url).await });
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return Some(match result {
                        Ok(Ok(conn)) => (LiveChannelEvent::HandshakeSucceeded, Some(conn)),
                        Ok(Err(e)) => {
                            warn!("Live channel handshake failed: {}", e);
                            (LiveChannelEvent::HandshakeFailed { reason: e.to_string() }, None)
                        }
                        Err(_) => {
                            warn!(timeout_ms = timeout.as_millis() as u64, "Live channel handshake timed out");
                            (
                                LiveChannelEvent::HandshakeFailed {
                                    reason: format!("handshake timed out after {:?}", timeout),
                                },
                                None,
                            )
                        }
                    });
                }
                command = self.commands.recv() => match command {
                    Some(LiveCommand::Send(payload)) => {
                        if !self.bounce(payload).await {
                            return None;
                        }
                    }
                    Some(LiveCommand::Reconnect) => {}
                    Some(LiveCommand::Close) | None => return Some((LiveChannelEvent::Close, None)),
                }
            }
        }
    }

    async fn connected_phase(
        &mut self,
        mut conn: Box<dyn ChannelConnection>,
    ) -> Option<LiveChannelEvent> {
        info!(url = %self.url, "Live channel connected");
        let interval = self.heartbeat.interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LiveCommand::Send(payload)) => {
                        let text = match payload.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Dropping unencodable live frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = conn.send_text(text).await {
                            warn!("Live channel send failed: {}", e);
                            if !self.bounce(payload).await {
                                return None;
                            }
                            conn.close().await;
                            return Some(LiveChannelEvent::ConnectionLost { reason: e.to_string() });
                        }
                    }
                    Some(LiveCommand::Reconnect) => {}
                    Some(LiveCommand::Close) | None => {
                        conn.close().await;
                        return Some(LiveChannelEvent::Close);
                    }
                },
                frame = conn.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        last_inbound = Instant::now();
                        match LivePayload::decode(&text) {
                            Ok(payload) => {
                                let event = Event::LivePayloadReceived { payload };
                                if self.events.send(event).await.is_err() {
                                    return None;
                                }
                            }
                            Err(e) => warn!("Dropping undecodable live frame: {}", e),
                        }
                    }
                    Some(Ok(Frame::Control)) => last_inbound = Instant::now(),
                    Some(Err(e)) => {
                        warn!("Live channel error: {}", e);
                        return Some(LiveChannelEvent::ConnectionLost { reason: e.to_string() });
                    }
                    None => {
                        return Some(LiveChannelEvent::ConnectionLost {
                            reason: "closed by server".to_string(),
                        });
                    }
                },
                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() >= self.heartbeat.timeout {
                        warn!(
                            silent_ms = last_inbound.elapsed().as_millis() as u64,
                            "Live channel heartbeat timed out"
                        );
                        conn.close().await;
                        return Some(LiveChannelEvent::ConnectionLost {
                            reason: "heartbeat timeout".to_string(),
                        });
                    }
                    if let Err(e) = conn.send_ping().await {
                        warn!("Live channel ping failed: {}", e);
                        return Some(LiveChannelEvent::ConnectionLost { reason: e.to_string() });
                    }
                }
            }
        }
    }

    async fn backoff_phase(&mut self, delay: Duration) -> Option<LiveChannelEvent> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Some(LiveChannelEvent::BackoffElapsed),
                command = self.commands.recv() => match command {
                    Some(LiveCommand::Send(payload)) => {
                        if !self.bounce(payload).await {
                            return None;
                        }
                    }
                    Some(LiveCommand::Reconnect) => {}
                    Some(LiveCommand::Close) | None => return Some(LiveChannelEvent::Close),
                }
            }
        }
    }

    /// Wait after a permanent failure until told to reconnect or close
    async fn parked_phase(&mut self) -> Option<LiveChannelEvent> {
        loop {
            match self.commands.recv().await {
                Some(LiveCommand::Send(payload)) => {
                    if !self.bounce(payload).await {
                        return None;
                    }
                }
                Some(LiveCommand::Reconnect) => return Some(LiveChannelEvent::Open),
                Some(LiveCommand::Close) | None => return Some(LiveChannelEvent::Close),
            }
        }
    }
}
