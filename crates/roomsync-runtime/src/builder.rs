//! Runtime Builder API
//!
//! Wires the core logic task, the live channel task and the HTTP clients
//! together and hands the UI a cloneable `ChatHandle`. Tests swap in fake
//! collaborators and a mock clock through the `with_*` methods.

use std::sync::Arc;
use std::time::Duration;

use roomsync_core::{
    AppEvent, ConnectionStatus, CorrelationKey, DeviceId, EngineDiagnostics, HistoryStatus,
    Message, Result, RoomId, SyncConfig, SyncEngine, SyncError, SystemTimeSource, TimeSource,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::command::Command;
use crate::history::{HistoryService, HttpHistoryService};
use crate::http::validate_endpoint;
use crate::live_channel::{ChannelConnector, LiveChannelTask, WebSocketConnector};
use crate::logic::{CoreLogicTask, Publishers, Services};
use crate::outbound::{HttpPersistenceEndpoint, PersistenceEndpoint};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a room synchronization runtime
pub struct RuntimeBuilder {
    room: RoomId,
    device_id: DeviceId,
    config: SyncConfig,
    history: Option<Arc<dyn HistoryService>>,
    persistence: Option<Arc<dyn PersistenceEndpoint>>,
    connector: Option<Arc<dyn ChannelConnector>>,
    time_source: Option<Arc<dyn TimeSource>>,
}

impl RuntimeBuilder {
    pub fn new(room: RoomId, device_id: DeviceId) -> Self {
        Self {
            room,
            device_id,
            config: SyncConfig::default(),
            history: None,
            persistence: None,
            connector: None,
            time_source: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the HTTP History Service client
    pub fn with_history_service(mut self, history: Arc<dyn HistoryService>) -> Self {
        self.history = Some(history);
        self
    }

    /// Replace the HTTP Persistence Endpoint client
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceEndpoint>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Replace the WebSocket connector
    pub fn with_connector(mut self, connector: Arc<dyn ChannelConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Validate configuration, spawn both tasks and return the runtime
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build_and_start(self) -> Result<ChatRuntime> {
        self.config.validate()?;

        let endpoints = &self.config.endpoints;
        let live_url = endpoints.live_url_for(&self.room);
        validate_endpoint(&endpoints.history_url_for(&self.room), &["http", "https"])?;
        validate_endpoint(&endpoints.persist_url_for(&self.room), &["http", "https"])?;
        validate_endpoint(&live_url, &["ws"])?;

        let history: Arc<dyn HistoryService> = match self.history {
            Some(history) => history,
            None => Arc::new(HttpHistoryService::new(
                endpoints,
                self.config.request_timeout,
            )?),
        };
        let persistence: Arc<dyn PersistenceEndpoint> = match self.persistence {
            Some(persistence) => persistence,
            None => Arc::new(HttpPersistenceEndpoint::new(
                endpoints,
                self.config.request_timeout,
            )?),
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector));
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemTimeSource));

        info!(room = %self.room, device_id = %self.device_id, "Starting room sync runtime");

        let channels = &self.config.channels;
        let (command_sender, command_receiver) = mpsc::channel(channels.command_buffer_size);
        let (event_sender, event_receiver) = mpsc::channel(channels.event_buffer_size);
        let (live_sender, live_receiver) = mpsc::channel(channels.live_buffer_size);
        let publishers = Publishers::new(channels.app_event_buffer_size);

        let live_task = LiveChannelTask::new(
            live_url,
            connector,
            self.config.reconnect.clone(),
            self.config.heartbeat.clone(),
            Arc::clone(&time_source),
            live_receiver,
            event_sender.clone(),
        );
        let live_handle = tokio::spawn(live_task.run());

        let handle = ChatHandle {
            device_id: self.device_id.clone(),
            command_sender,
            app_events: publishers.app_events.clone(),
            timeline: publishers.timeline.subscribe(),
            status: publishers.status.subscribe(),
            history: publishers.history.subscribe(),
        };

        let engine = SyncEngine::new(self.device_id, time_source);
        let core = CoreLogicTask::new(
            self.room,
            engine,
            Services {
                history,
                persistence,
            },
            command_receiver,
            event_receiver,
            event_sender,
            live_sender,
            live_handle,
            publishers,
        );
        let core_handle = tokio::spawn(core.run());

        Ok(ChatRuntime {
            handle,
            core_handle: Some(core_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Chat Runtime
// ----------------------------------------------------------------------------

/// Owner of the spawned tasks
pub struct ChatRuntime {
    handle: ChatHandle,
    core_handle: Option<JoinHandle<Result<()>>>,
}

impl ChatRuntime {
    /// Get a handle for issuing commands and observing state
    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.core_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Shutdown the runtime gracefully
    ///
    /// In-flight history and persistence requests are cancelled and the
    /// live channel is closed.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(mut handle) = self.core_handle.take() else {
            return Ok(());
        };
        info!("Shutting down room sync runtime");
        let _ = self.handle.command_sender.send(Command::Shutdown).await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SyncError::channel_error(format!(
                "Core logic task panicked: {}",
                e
            ))),
            Err(_) => {
                warn!("Core logic task did not stop in time, aborting");
                handle.abort();
                Ok(())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Chat Handle
// ----------------------------------------------------------------------------

/// Cloneable UI-facing handle to a running runtime
#[derive(Debug, Clone)]
pub struct ChatHandle {
    device_id: DeviceId,
    command_sender: mpsc::Sender<Command>,
    app_events: broadcast::Sender<AppEvent>,
    timeline: watch::Receiver<Arc<Vec<Message>>>,
    status: watch::Receiver<ConnectionStatus>,
    history: watch::Receiver<HistoryStatus>,
}

impl ChatHandle {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| SyncError::channel_error("Core logic task is not running"))
    }

    async fn request<R>(&self, command: Command, reply: oneshot::Receiver<R>) -> Result<R> {
        self.send(command).await?;
        reply
            .await
            .map_err(|_| SyncError::channel_error("Core logic task dropped the reply"))
    }

    /// Load the room history, or retry after a failed load
    pub async fn load(&self) -> Result<()> {
        self.send(Command::LoadHistory).await
    }

    /// Compose a message; `None` means the text was blank
    pub async fn compose(&self, text: impl Into<String>) -> Result<Option<CorrelationKey>> {
        let (reply, response) = oneshot::channel();
        let command = Command::Compose {
            text: text.into(),
            reply,
        };
        self.request(command, response).await
    }

    /// Resend a failed message; `None` if the key is not a failed message
    pub async fn retry_failed(&self, key: CorrelationKey) -> Result<Option<CorrelationKey>> {
        let (reply, response) = oneshot::channel();
        self.request(Command::RetryFailed { key, reply }, response)
            .await
    }

    /// Restart the live channel after a permanent failure
    pub async fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect).await
    }

    pub async fn diagnostics(&self) -> Result<EngineDiagnostics> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Diagnostics { reply }, response).await
    }

    /// Current render-ordered timeline
    pub fn list(&self) -> Vec<Message> {
        self.timeline.borrow().as_ref().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn history_status(&self) -> HistoryStatus {
        self.history.borrow().clone()
    }

    /// Subscribe to incremental change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.app_events.subscribe()
    }

    /// Watch the whole timeline; updated after every applied change
    pub fn timeline(&self) -> watch::Receiver<Arc<Vec<Message>>> {
        self.timeline.clone()
    }

    pub fn status_updates(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn history_updates(&self) -> watch::Receiver<HistoryStatus> {
        self.history.clone()
    }
}
