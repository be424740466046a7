//! RoomSync Core
//!
//! Message synchronization engine for a single shared chat room. Merges a
//! one-shot history snapshot, a live push stream, and the user's own
//! optimistic sends into one duplicate-free, correctly ordered timeline.
//!
//! This crate is synchronous and performs no I/O; `roomsync-runtime` drives
//! it from tokio tasks.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{AppEvent, Effect, Event, HistoryStatus};
pub use config::{ChannelConfig, EndpointConfig, HeartbeatConfig, ReconnectConfig, SyncConfig};
pub use engine::{EngineDiagnostics, Step, SyncEngine};
pub use errors::{Result, StoreError, SyncError, SyncResult, TransportError};
pub use identity::{DeviceIdentity, FileStorage, IdentityStorage, MemoryStorage};
pub use protocol::{
    AuditEntry, ConnectionStatus, Delivery, DeliveryState, HistoryRecord, LiveChannelEffect,
    LiveChannelEvent, LiveChannelState, LivePayload, Message, MessageStore, MessageStoreStats,
    MessageUpdate, Origin, PersistRequest, PersistedRecord, StateTransitionError, UpsertOutcome,
};
pub use types::{
    CorrelationKey, DeviceId, MockTimeSource, RoomId, ServerId, SystemTimeSource, TimeSource,
    Timestamp,
};
