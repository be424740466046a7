//! CSP Channel Communication Protocol Types
//!
//! Typed messages exchanged between the core logic task and the I/O tasks
//! that talk to the History Service, the Persistence Endpoint and the Live
//! Channel Server. UI commands carry reply channels and live with the
//! runtime.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::protocol::connection_state::{AuditEntry, ConnectionStatus};
use crate::protocol::message::{DeliveryState, Message};
use crate::protocol::wire::{HistoryRecord, LivePayload, PersistRequest, PersistedRecord};
use crate::types::CorrelationKey;

// ----------------------------------------------------------------------------
// Event: I/O tasks → Core Logic
// ----------------------------------------------------------------------------

/// Events reported to the core logic task by I/O tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// History Service returned a snapshot
    HistoryLoaded { records: Vec<HistoryRecord> },
    /// History Service request failed
    HistoryFailed { reason: String },
    /// Persistence Endpoint stored a composed message
    PersistConfirmed {
        key: CorrelationKey,
        record: PersistedRecord,
    },
    /// Persistence Endpoint request failed
    PersistFailed { key: CorrelationKey, reason: String },
    /// A payload arrived on the live channel
    LivePayloadReceived { payload: LivePayload },
    /// An outbound frame could not be written; the channel is not connected
    LiveSendFailed { payload: LivePayload },
    /// The live channel state machine took a transition
    ChannelTransition {
        status: ConnectionStatus,
        audit_entry: AuditEntry,
    },
}

// ----------------------------------------------------------------------------
// Effect: Core Logic → I/O tasks (External Side Effects Only)
// ----------------------------------------------------------------------------

/// Effects the runtime executes on behalf of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Request the room's history snapshot
    FetchHistory,
    /// Submit a composed message to the Persistence Endpoint
    PersistMessage { request: PersistRequest },
    /// Write a frame to the live channel
    SendLive { payload: LivePayload },
}

// ----------------------------------------------------------------------------
// AppEvent: Core Logic → UI (State Changes Only)
// ----------------------------------------------------------------------------

/// State changes the UI may want to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppEvent {
    /// A record was added to the timeline
    MessageAdded { message: Message },
    /// A record's delivery state changed
    DeliveryChanged {
        key: CorrelationKey,
        state: DeliveryState,
    },
    /// History snapshot merged
    HistoryLoaded { count: usize },
    /// History load failed; `load` may be called again
    HistoryFailed { reason: String },
    /// Live channel status changed
    ConnectionStatusChanged { status: ConnectionStatus },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Progress of the one-shot history load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    NotLoaded,
    Loading,
    Loaded { count: usize },
    Failed { reason: String },
}

impl Default for HistoryStatus {
    fn default() -> Self {
        HistoryStatus::NotLoaded
    }
}

impl HistoryStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, HistoryStatus::Loading)
    }

    /// Whether the UI should offer to retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, HistoryStatus::Failed { .. })
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryStatus::NotLoaded => write!(f, "not loaded"),
            HistoryStatus::Loading => write!(f, "loading"),
            HistoryStatus::Loaded { count } => write!(f, "loaded ({} messages)", count),
            HistoryStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_status_display() {
        assert_eq!(format!("{}", HistoryStatus::NotLoaded), "not loaded");
        assert_eq!(
            format!("{}", HistoryStatus::Loaded { count: 3 }),
            "loaded (3 messages)"
        );
        assert!(HistoryStatus::Failed {
            reason: "timeout".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::PersistFailed {
            key: CorrelationKey::new("k"),
            reason: "503".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
