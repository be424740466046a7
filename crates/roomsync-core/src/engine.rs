//! Synchronous synchronization engine
//!
//! `SyncEngine` owns the message store, the outbox of frames waiting for the
//! live channel, and the last known connection and history status. It never
//! performs I/O: every call returns a [`Step`] listing the effects the runtime
//! must execute and the app events to publish.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{AppEvent, Effect, Event, HistoryStatus};
use crate::protocol::connection_state::{AuditEntry, AuditLog, ConnectionStatus};
use crate::protocol::message::{DeliveryState, Message, MessageUpdate};
use crate::protocol::message_store::{MessageStore, MessageStoreStats, UpsertOutcome};
use crate::protocol::wire::{HistoryRecord, LivePayload, PersistRequest, PersistedRecord};
use crate::types::{CorrelationKey, DeviceId, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Step Output
// ----------------------------------------------------------------------------

/// Output of one engine call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub app_events: Vec<AppEvent>,
}

impl Step {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.app_events.is_empty()
    }

    fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn app_event(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }
}

/// Frame waiting for the live channel to connect
#[derive(Debug, Clone, PartialEq, Eq)]
struct OutboxEntry {
    key: CorrelationKey,
    client_time: Timestamp,
    payload: LivePayload,
}

/// Snapshot of the engine's counters for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDiagnostics {
    pub device_id: DeviceId,
    pub connection: ConnectionStatus,
    pub history: HistoryStatus,
    pub outbox_len: usize,
    pub store: MessageStoreStats,
    pub audit: Vec<AuditEntry>,
}

// ----------------------------------------------------------------------------
// Sync Engine
// ----------------------------------------------------------------------------

pub struct SyncEngine<T: TimeSource> {
    device_id: DeviceId,
    time_source: T,
    store: MessageStore,
    outbox: Vec<OutboxEntry>,
    connection: ConnectionStatus,
    history: HistoryStatus,
    audit: AuditLog,
}

impl<T: TimeSource> SyncEngine<T> {
    pub fn new(device_id: DeviceId, time_source: T) -> Self {
        Self {
            device_id,
            time_source,
            store: MessageStore::new(),
            outbox: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            history: HistoryStatus::NotLoaded,
            audit: AuditLog::default(),
        }
    }

    // ---- Commands ----

    /// Compose a message from this device
    ///
    /// Blank text is ignored. Otherwise the optimistic record is inserted
    /// before any effect is emitted, then the message is submitted for
    /// persistence and sent on the live channel. The frame is queued instead
    /// while the channel is down or older frames are still waiting.
    pub fn compose(&mut self, text: &str) -> (Option<CorrelationKey>, Step) {
        let mut step = Step::default();
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank message");
            return (None, step);
        }

        let key = CorrelationKey::generate();
        let client_time = self.time_source.now();
        let update = MessageUpdate::local_pending(
            key.clone(),
            self.device_id.clone(),
            text.to_string(),
            client_time,
        );
        if !self.apply(update, &mut step) {
            return (None, step);
        }

        step.effect(Effect::PersistMessage {
            request: PersistRequest {
                device_id: self.device_id.clone(),
                text: text.to_string(),
                correlation_key: key.clone(),
            },
        });

        let payload = LivePayload::outbound(self.device_id.clone(), text.to_string(), key.clone());
        if self.connection.is_connected() && self.outbox.is_empty() {
            step.effect(Effect::SendLive { payload });
        } else {
            debug!(key = %key, status = %self.connection, "Queueing live frame");
            self.enqueue(OutboxEntry {
                key: key.clone(),
                client_time,
                payload,
            });
        }

        info!(key = %key, "Composed message");
        (Some(key), step)
    }

    /// Resend a failed message under a fresh key
    ///
    /// Keys that are unknown or not `Failed` are ignored.
    pub fn retry_failed(&mut self, key: &CorrelationKey) -> (Option<CorrelationKey>, Step) {
        let text = match self.store.get(key) {
            Some(message) if message.is_failed() => message.text.clone(),
            Some(message) => {
                debug!(key = %key, state = %message.delivery_state, "Not retrying message");
                return (None, Step::default());
            }
            None => {
                debug!(key = %key, "Not retrying unknown message");
                return (None, Step::default());
            }
        };
        self.compose(&text)
    }

    /// Start the one-shot history load
    ///
    /// A request while one is in flight is ignored.
    pub fn request_history(&mut self) -> Step {
        let mut step = Step::default();
        if self.history.is_loading() {
            debug!("History load already in flight");
            return step;
        }
        self.history = HistoryStatus::Loading;
        step.effect(Effect::FetchHistory);
        step
    }

    // ---- Events ----

    /// Fold an I/O event into the engine state
    pub fn handle_event(&mut self, event: Event) -> Step {
        let mut step = Step::default();
        match event {
            Event::HistoryLoaded { records } => self.on_history_loaded(records, &mut step),
            Event::HistoryFailed { reason } => {
                warn!("History load failed: {}", reason);
                self.history = HistoryStatus::Failed {
                    reason: reason.clone(),
                };
                step.app_event(AppEvent::HistoryFailed { reason });
            }
            Event::PersistConfirmed { key, record } => {
                self.on_persist_confirmed(key, record, &mut step)
            }
            Event::PersistFailed { key, reason } => self.on_persist_failed(key, reason, &mut step),
            Event::LivePayloadReceived { payload } => self.on_live_payload(payload, &mut step),
            Event::LiveSendFailed { payload } => self.on_live_send_failed(payload),
            Event::ChannelTransition {
                status,
                audit_entry,
            } => self.on_channel_transition(status, audit_entry, &mut step),
        }
        step
    }

    fn on_history_loaded(&mut self, records: Vec<HistoryRecord>, step: &mut Step) {
        let count = records.len();
        let updates = records
            .into_iter()
            .map(|record| record.into_update(&self.device_id))
            .collect();
        let applied = self.store.snapshot_replace(updates);
        info!(count, applied, total = self.store.len(), "History loaded");

        self.history = HistoryStatus::Loaded { count };
        step.app_event(AppEvent::HistoryLoaded { count });
    }

    fn on_persist_confirmed(&mut self, key: CorrelationKey, record: PersistedRecord, step: &mut Step) {
        debug!(key = %key, server_id = %record.server_id, "Persistence confirmed");
        let update = MessageUpdate::confirmation(key, record.created_at)
            .with_server_id(Some(record.server_id));
        self.apply(update, step);
    }

    fn on_persist_failed(&mut self, key: CorrelationKey, reason: String, step: &mut Step) {
        warn!(key = %key, "Persistence failed: {}", reason);
        self.apply(MessageUpdate::failure(key.clone()), step);

        if self.store.get(&key).map_or(false, Message::is_failed) {
            let before = self.outbox.len();
            self.outbox.retain(|entry| entry.key != key);
            if self.outbox.len() != before {
                debug!(key = %key, "Dropped queued frame of failed message");
            }
        }
    }

    fn on_live_payload(&mut self, payload: LivePayload, step: &mut Step) {
        let received_at = self.time_source.now();
        let mut update = payload.into_update(&self.device_id, received_at);

        // A key claimed by another author is not the same message
        let collides = self.store.get(&update.correlation_key).map_or(false, |existing| {
            Some(&existing.device_id) != update.device_id.as_ref()
        });
        if collides {
            let derived = CorrelationKey::derived(update.server_id.as_ref());
            warn!(
                key = %update.correlation_key,
                derived = %derived,
                "Live payload reuses a key from another device"
            );
            update = update.rekeyed(derived);
        }

        self.apply(update, step);
    }

    fn on_live_send_failed(&mut self, payload: LivePayload) {
        let Some(key) = payload.correlation_key.clone() else {
            return;
        };
        match self.store.get(&key) {
            Some(message) if !message.is_failed() => {
                debug!(key = %key, "Requeueing undelivered live frame");
                let client_time = message.client_time;
                self.enqueue(OutboxEntry {
                    key,
                    client_time,
                    payload,
                });
            }
            _ => debug!(key = %key, "Dropping undelivered frame"),
        }
    }

    fn on_channel_transition(
        &mut self,
        status: ConnectionStatus,
        audit_entry: AuditEntry,
        step: &mut Step,
    ) {
        debug!(transition = %audit_entry, "Live channel transition");
        self.audit.record(audit_entry);

        if status == self.connection {
            return;
        }
        info!(from = %self.connection, to = %status, "Connection status changed");
        self.connection = status;
        step.app_event(AppEvent::ConnectionStatusChanged { status });

        if status.is_connected() && !self.outbox.is_empty() {
            info!(frames = self.outbox.len(), "Flushing outbox");
            for entry in self.outbox.drain(..) {
                step.effects.push(Effect::SendLive {
                    payload: entry.payload,
                });
            }
        }
    }

    // ---- Live backlog ----

    /// Whether frames are waiting even though the channel is connected
    ///
    /// Happens when the live channel was too busy to take a frame; the
    /// runtime drains them with [`SyncEngine::next_live_frame`] as capacity
    /// frees up.
    pub fn has_live_backlog(&self) -> bool {
        self.connection.is_connected() && !self.outbox.is_empty()
    }

    /// Oldest queued frame, only while connected
    pub fn next_live_frame(&mut self) -> Option<LivePayload> {
        if !self.has_live_backlog() {
            return None;
        }
        let entry = self.outbox.remove(0);
        debug!(key = %entry.key, remaining = self.outbox.len(), "Sending queued frame");
        Some(entry.payload)
    }

    // ---- Internals ----

    /// Upsert and translate the outcome into app events
    ///
    /// Returns false when the store rejected the update.
    fn apply(&mut self, update: MessageUpdate, step: &mut Step) -> bool {
        let before = self.delivery_state_for(&update);
        match self.store.upsert(update) {
            Ok(UpsertOutcome::Inserted(key)) => {
                if let Some(message) = self.store.get(&key) {
                    step.app_event(AppEvent::MessageAdded {
                        message: message.clone(),
                    });
                }
                true
            }
            Ok(UpsertOutcome::Merged(key)) => {
                let after = self.store.get(&key).map(|m| m.delivery_state);
                if let Some(state) = after.filter(|state| Some(*state) != before) {
                    debug!(key = %key, state = %state, "Delivery state changed");
                    step.app_event(AppEvent::DeliveryChanged { key, state });
                }
                true
            }
            Ok(UpsertOutcome::Unchanged(_)) => true,
            Err(e) => {
                warn!("Dropping update: {}", e);
                false
            }
        }
    }

    fn delivery_state_for(&self, update: &MessageUpdate) -> Option<DeliveryState> {
        self.store
            .get(&update.correlation_key)
            .or_else(|| {
                update
                    .server_id
                    .as_ref()
                    .and_then(|id| self.store.key_for_server_id(id))
                    .and_then(|key| self.store.get(key))
            })
            .map(|message| message.delivery_state)
    }

    fn enqueue(&mut self, entry: OutboxEntry) {
        if self.outbox.iter().any(|queued| queued.key == entry.key) {
            return;
        }
        self.outbox.push(entry);
        self.outbox.sort_by_key(|queued| queued.client_time);
    }

    // ---- Queries ----

    /// Render-ordered timeline
    pub fn list(&self) -> Vec<Message> {
        self.store.list()
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn history_status(&self) -> &HistoryStatus {
        &self.history
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        EngineDiagnostics {
            device_id: self.device_id.clone(),
            connection: self.connection,
            history: self.history.clone(),
            outbox_len: self.outbox.len(),
            store: self.store.stats().clone(),
            audit: self.audit.entries(),
        }
    }
}
