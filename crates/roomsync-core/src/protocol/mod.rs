//! Message model, merge policy, storage, wire formats and the live channel
//! state machine

pub mod connection_state;
pub mod message;
pub mod message_store;
pub mod reconciler;
pub mod wire;

pub use connection_state::{
    AuditEntry, AuditLog, ConnectionStatus, LiveChannelEffect, LiveChannelEvent,
    LiveChannelState, StateTransition, StateTransitionError,
};
pub use message::{Delivery, DeliveryState, Message, MessageUpdate, Origin};
pub use message_store::{MessageStore, MessageStoreStats, UpsertOutcome};
pub use reconciler::{materialize, reconcile, Reconciled};
pub use wire::{HistoryRecord, LivePayload, PersistRequest, PersistedRecord};
