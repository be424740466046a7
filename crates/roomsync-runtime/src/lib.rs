//! RoomSync Runtime
//!
//! Tokio tasks around the pure `roomsync-core` engine:
//! - `CoreLogicTask`: single owner of the engine, applies commands and events in order
//! - `LiveChannelTask`: WebSocket connection with heartbeat and backoff reconnects
//! - HTTP clients for the History Service and Persistence Endpoint
//! - `RuntimeBuilder` / `ChatHandle`: the UI-facing surface

pub mod builder;
pub mod command;
pub mod history;
mod http;
pub mod live_channel;
pub mod logic;
pub mod outbound;

pub use builder::{ChatHandle, ChatRuntime, RuntimeBuilder};
pub use command::Command;
pub use history::{HistoryService, HttpHistoryService};
pub use http::validate_endpoint;
pub use live_channel::{
    ChannelConnection, ChannelConnector, Frame, LiveChannelTask, LiveCommand, WebSocketConnector,
};
pub use logic::{CoreLogicTask, Publishers, Services};
pub use outbound::{HttpPersistenceEndpoint, PersistenceEndpoint};

// Re-export core types for convenience
pub use roomsync_core::{
    AppEvent, ConnectionStatus, CorrelationKey, DeliveryState, DeviceId, EngineDiagnostics,
    HistoryStatus, Message, Origin, RoomId, SyncConfig, SyncError, SyncResult,
};
