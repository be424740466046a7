//! Core Logic Task Implementation
//!
//! The single owner of the `SyncEngine`. Commands from the UI handle and
//! events from the I/O tasks are applied strictly in arrival order; effects
//! are executed by spawning short-lived I/O tasks or forwarding frames to
//! the live channel task. After every step the timeline, connection status
//! and history status are republished on watch channels.
//!
//! Frames the live channel could not take immediately stay in the engine's
//! outbox and are handed over one at a time as the channel frees capacity.

use std::sync::Arc;
use std::time::Duration;

use roomsync_core::{
    AppEvent, ConnectionStatus, Effect, Event, HistoryStatus, Message, Result, RoomId, Step,
    SyncEngine, TimeSource,
};
use tokio::sync::mpsc::OwnedPermit;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::history::HistoryService;
use crate::live_channel::LiveCommand;
use crate::outbound::PersistenceEndpoint;

/// How long shutdown waits for the live channel to close its socket
const LIVE_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Published State
// ----------------------------------------------------------------------------

/// Sending halves of everything the UI can observe
#[derive(Debug, Clone)]
pub struct Publishers {
    pub app_events: broadcast::Sender<AppEvent>,
    pub timeline: watch::Sender<Arc<Vec<Message>>>,
    pub status: watch::Sender<ConnectionStatus>,
    pub history: watch::Sender<HistoryStatus>,
}

impl Publishers {
    pub fn new(app_event_buffer_size: usize) -> Self {
        let (app_events, _) = broadcast::channel(app_event_buffer_size);
        let (timeline, _) = watch::channel(Arc::new(Vec::new()));
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (history, _) = watch::channel(HistoryStatus::NotLoaded);
        Self {
            app_events,
            timeline,
            status,
            history,
        }
    }
}

/// Remote collaborators used by the core logic task
#[derive(Clone)]
pub struct Services {
    pub history: Arc<dyn HistoryService>,
    pub persistence: Arc<dyn PersistenceEndpoint>,
}

// ----------------------------------------------------------------------------
// Core Logic Task
// ----------------------------------------------------------------------------

pub struct CoreLogicTask {
    room: RoomId,
    engine: SyncEngine<Arc<dyn TimeSource>>,
    services: Services,
    command_receiver: mpsc::Receiver<Command>,
    event_receiver: mpsc::Receiver<Event>,
    event_sender: mpsc::Sender<Event>,
    live_sender: mpsc::Sender<LiveCommand>,
    live_task: Option<JoinHandle<()>>,
    publishers: Publishers,
    in_flight: JoinSet<()>,
    live_open: bool,
    running: bool,
}

impl CoreLogicTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room: RoomId,
        engine: SyncEngine<Arc<dyn TimeSource>>,
        services: Services,
        command_receiver: mpsc::Receiver<Command>,
        event_receiver: mpsc::Receiver<Event>,
        event_sender: mpsc::Sender<Event>,
        live_sender: mpsc::Sender<LiveCommand>,
        live_task: JoinHandle<()>,
        publishers: Publishers,
    ) -> Self {
        Self {
            room,
            engine,
            services,
            command_receiver,
            event_receiver,
            event_sender,
            live_sender,
            live_task: Some(live_task),
            publishers,
            in_flight: JoinSet::new(),
            live_open: true,
            running: true,
        }
    }

    /// Run the main Core Logic task loop
    pub async fn run(mut self) -> Result<()> {
        info!(
            room = %self.room,
            device_id = %self.engine.device_id(),
            "Core logic task starting"
        );
        self.publish(Step::default());

        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => match command {
                    Some(command) => self.process_command(command),
                    None => {
                        info!("Command channel closed, shutting down");
                        self.running = false;
                    }
                },
                Some(event) = self.event_receiver.recv() => self.process_event(event),
                permit = self.live_sender.clone().reserve_owned(),
                    if self.live_open && self.engine.has_live_backlog() => match permit {
                    Ok(permit) => self.send_backlog(permit),
                    Err(_) => {
                        warn!(queued = self.engine.outbox_len(), "Live channel task has stopped");
                        self.live_open = false;
                    }
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("I/O task panicked: {}", e);
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn process_command(&mut self, command: Command) {
        debug!(command = command.name(), "Processing command");
        match command {
            Command::LoadHistory => {
                let step = self.engine.request_history();
                self.execute(step);
            }
            Command::Compose { text, reply } => {
                let (key, step) = self.engine.compose(&text);
                self.execute(step);
                let _ = reply.send(key);
            }
            Command::RetryFailed { key, reply } => {
                let (new_key, step) = self.engine.retry_failed(&key);
                self.execute(step);
                let _ = reply.send(new_key);
            }
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.engine.diagnostics());
            }
            Command::Reconnect => {
                if self.live_sender.try_send(LiveCommand::Reconnect).is_err() {
                    warn!("Live channel task is not accepting commands");
                }
            }
            Command::Shutdown => {
                info!("Shutdown requested");
                self.running = false;
            }
        }
    }

    fn process_event(&mut self, event: Event) {
        let step = self.engine.handle_event(event);
        self.execute(step);
    }

    /// Execute a step's effects, then publish its results
    ///
    /// Once the live channel refuses a frame, the rest of the step's frames
    /// are requeued too so the backlog drains in order.
    fn execute(&mut self, mut step: Step) {
        let mut live_busy = false;
        for effect in std::mem::take(&mut step.effects) {
            match effect {
                Effect::FetchHistory => self.spawn_history_fetch(),
                Effect::PersistMessage { request } => self.spawn_persist(request),
                Effect::SendLive { payload } => {
                    let refused = if live_busy {
                        Some(payload)
                    } else {
                        match self.live_sender.try_send(LiveCommand::Send(payload)) {
                            Ok(()) => None,
                            Err(e) => match e.into_inner() {
                                LiveCommand::Send(payload) => Some(payload),
                                _ => None,
                            },
                        }
                    };
                    if let Some(payload) = refused {
                        debug!("Live channel busy, requeueing frame");
                        live_busy = true;
                        let requeue = self.engine.handle_event(Event::LiveSendFailed { payload });
                        step.app_events.extend(requeue.app_events);
                    }
                }
            }
        }
        self.publish(step);
    }

    fn send_backlog(&mut self, permit: OwnedPermit<LiveCommand>) {
        if let Some(payload) = self.engine.next_live_frame() {
            permit.send(LiveCommand::Send(payload));
        }
    }

    fn spawn_history_fetch(&mut self) {
        let history = Arc::clone(&self.services.history);
        let events = self.event_sender.clone();
        let room = self.room.clone();
        self.in_flight.spawn(async move {
            let event = match history.fetch(&room).await {
                Ok(records) => Event::HistoryLoaded { records },
                Err(e) => Event::HistoryFailed {
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
    }

    fn spawn_persist(&mut self, request: roomsync_core::PersistRequest) {
        let persistence = Arc::clone(&self.services.persistence);
        let events = self.event_sender.clone();
        let room = self.room.clone();
        self.in_flight.spawn(async move {
            let key = request.correlation_key.clone();
            let event = match persistence.persist(&room, &request).await {
                Ok(record) => Event::PersistConfirmed { key, record },
                Err(e) => Event::PersistFailed {
                    key,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event).await;
        });
    }

    fn publish(&self, step: Step) {
        for event in step.app_events {
            // No subscribers is fine
            let _ = self.publishers.app_events.send(event);
        }

        self.publishers
            .timeline
            .send_replace(Arc::new(self.engine.list()));

        let status = self.engine.connection_status();
        self.publishers.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });

        let history = self.engine.history_status();
        self.publishers.history.send_if_modified(|current| {
            let changed = *current != *history;
            if changed {
                *current = history.clone();
            }
            changed
        });
    }

    async fn shutdown(&mut self) {
        info!("Core logic task shutting down");
        self.in_flight.abort_all();

        // Transitions reported during close are no longer consumed
        self.event_receiver.close();
        let close = self.live_sender.send(LiveCommand::Close);
        if tokio::time::timeout(LIVE_SHUTDOWN_GRACE, close).await.is_err() {
            warn!("Live channel task did not take the close command");
        }
        if let Some(mut handle) = self.live_task.take() {
            if tokio::time::timeout(LIVE_SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Live channel task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.publishers
            .status
            .send_replace(ConnectionStatus::Disconnected);
        debug!(stats = ?self.engine.store().stats(), "Final store statistics");
        info!("Core logic task stopped");
    }
}
