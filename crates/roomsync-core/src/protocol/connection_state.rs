//! Live Channel Connection State Machine
//!
//! Type-safe lifecycle of the room's duplex connection. Each state is
//! consumed by `transition`, which yields the next state, the effects the
//! runtime must execute, and an audit entry. Reconnection uses bounded
//! exponential backoff; once the retry budget is spent the channel settles
//! in a permanent failure state until it is explicitly reopened.

use core::fmt;
use core::time::Duration;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::ReconnectConfig;
use crate::types::Timestamp;

/// Number of transitions retained by an [`AuditLog`] by default
pub const DEFAULT_AUDIT_CAPACITY: usize = 100;

// ----------------------------------------------------------------------------
// Public Connection Status
// ----------------------------------------------------------------------------

/// Connection status surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Retry budget exhausted; no further automatic reconnection
    DisconnectedPermanent,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::DisconnectedPermanent => "disconnected (permanent)",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Linear live channel state that must be consumed to transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveChannelState {
    /// Never opened
    Idle,
    /// Handshake in progress
    Connecting(ConnectingState),
    /// Handshake completed; frames flow both ways
    Connected(ConnectedState),
    /// Waiting out a backoff delay before the next attempt
    Backoff(BackoffState),
    /// Closed on request; reconnection halted
    Closed,
    /// Retry budget exhausted
    Failed(FailedState),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectingState {
    pub started_at: Timestamp,
    /// Consecutive failures before this attempt
    pub failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedState {
    pub connected_since: Timestamp,
    /// Consecutive failures carried over from before this connection
    pub failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub failures: u32,
    pub retry_at: Timestamp,
    pub last_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedState {
    pub failures: u32,
    pub failed_at: Timestamp,
    pub reason: String,
}

// ----------------------------------------------------------------------------
// State Transition Events and Effects
// ----------------------------------------------------------------------------

/// Events that drive the live channel state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveChannelEvent {
    /// Start (or restart) the connection
    Open,
    /// Handshake completed
    HandshakeSucceeded,
    /// Handshake failed or timed out
    HandshakeFailed { reason: String },
    /// Established connection closed abnormally or went silent
    ConnectionLost { reason: String },
    /// Backoff delay expired
    BackoffElapsed,
    /// Terminate and stop reconnecting
    Close,
}

/// Work the runtime must perform after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveChannelEffect {
    /// Start a connection handshake
    Connect,
    /// Fire `BackoffElapsed` after `delay`
    ScheduleReconnect { delay: Duration, attempt: u32 },
    /// Surface the terminal failure
    ReportPermanentFailure { reason: String },
    /// Tear down the current connection and cancel timers
    Disconnect,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: LiveChannelState,
    pub effects: Vec<LiveChannelEffect>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub effects_count: usize,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} --{}--> {} ({} effects)",
            self.timestamp, self.from_state, self.event, self.to_state, self.effects_count
        )
    }
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl Default for LiveChannelState {
    fn default() -> Self {
        LiveChannelState::Idle
    }
}

impl LiveChannelState {
    /// Get current state name for logging/audit
    pub fn state_name(&self) -> &'static str {
        match self {
            LiveChannelState::Idle => "Idle",
            LiveChannelState::Connecting(_) => "Connecting",
            LiveChannelState::Connected(_) => "Connected",
            LiveChannelState::Backoff(_) => "Backoff",
            LiveChannelState::Closed => "Closed",
            LiveChannelState::Failed(_) => "Failed",
        }
    }

    /// Status as seen by the UI
    pub fn status(&self) -> ConnectionStatus {
        match self {
            LiveChannelState::Connecting(_) => ConnectionStatus::Connecting,
            LiveChannelState::Connected(_) => ConnectionStatus::Connected,
            LiveChannelState::Failed(_) => ConnectionStatus::DisconnectedPermanent,
            LiveChannelState::Idle | LiveChannelState::Backoff(_) | LiveChannelState::Closed => {
                ConnectionStatus::Disconnected
            }
        }
    }

    /// Consecutive failures counted so far
    pub fn failures(&self) -> u32 {
        match self {
            LiveChannelState::Connecting(s) => s.failures,
            LiveChannelState::Connected(s) => s.failures,
            LiveChannelState::Backoff(s) => s.failures,
            LiveChannelState::Failed(s) => s.failures,
            LiveChannelState::Idle | LiveChannelState::Closed => 0,
        }
    }

    pub fn can_send(&self) -> bool {
        matches!(self, LiveChannelState::Connected(_))
    }

    /// Process an event and transition to a new state (consumes self)
    pub fn transition(
        self,
        event: LiveChannelEvent,
        now: Timestamp,
        config: &ReconnectConfig,
    ) -> Result<StateTransition, StateTransitionError> {
        let from_state = self.state_name().to_string();
        let event_name = event.name().to_string();

        let (new_state, effects) = match (self, event) {
            // Opening from a resting state always starts a fresh budget
            (
                LiveChannelState::Idle | LiveChannelState::Closed | LiveChannelState::Failed(_),
                LiveChannelEvent::Open,
            ) => (
                LiveChannelState::Connecting(ConnectingState {
                    started_at: now,
                    failures: 0,
                }),
                vec![LiveChannelEffect::Connect],
            ),

            // From Connecting
            (LiveChannelState::Connecting(state), LiveChannelEvent::HandshakeSucceeded) => (
                LiveChannelState::Connected(ConnectedState {
                    connected_since: now,
                    failures: state.failures,
                }),
                Vec::new(),
            ),

            (LiveChannelState::Connecting(state), LiveChannelEvent::HandshakeFailed { reason }) => {
                Self::record_failure(state.failures, reason, now, config)
            }

            // From Connected
            (LiveChannelState::Connected(state), LiveChannelEvent::ConnectionLost { reason }) => {
                let stable = now.duration_since(state.connected_since) >= config.stable_after;
                let failures = if stable { 0 } else { state.failures };
                Self::record_failure(failures, reason, now, config)
            }

            // From Backoff
            (LiveChannelState::Backoff(state), LiveChannelEvent::BackoffElapsed) => (
                LiveChannelState::Connecting(ConnectingState {
                    started_at: now,
                    failures: state.failures,
                }),
                vec![LiveChannelEffect::Connect],
            ),

            // Universal transitions
            (_, LiveChannelEvent::Close) => {
                (LiveChannelState::Closed, vec![LiveChannelEffect::Disconnect])
            }

            // Invalid transitions
            (_state, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: from_state.clone(),
                    event: event_name,
                    reason: format!("Event {:?} not valid for state {}", event, from_state),
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            from_state,
            to_state: new_state.state_name().to_string(),
            event: event_name,
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            new_state,
            effects,
            audit_entry,
        })
    }

    fn record_failure(
        previous_failures: u32,
        reason: String,
        now: Timestamp,
        config: &ReconnectConfig,
    ) -> (LiveChannelState, Vec<LiveChannelEffect>) {
        let failures = previous_failures.saturating_add(1);
        if failures > config.max_retries {
            let effect = LiveChannelEffect::ReportPermanentFailure {
                reason: reason.clone(),
            };
            let state = LiveChannelState::Failed(FailedState {
                failures,
                failed_at: now,
                reason,
            });
            return (state, vec![effect]);
        }

        let delay = config.delay_for(failures);
        let state = LiveChannelState::Backoff(BackoffState {
            failures,
            retry_at: now + delay.as_millis() as u64,
            last_error: reason,
        });
        (
            state,
            vec![LiveChannelEffect::ScheduleReconnect {
                delay,
                attempt: failures,
            }],
        )
    }
}

impl LiveChannelEvent {
    fn name(&self) -> &'static str {
        match self {
            LiveChannelEvent::Open => "Open",
            LiveChannelEvent::HandshakeSucceeded => "HandshakeSucceeded",
            LiveChannelEvent::HandshakeFailed { .. } => "HandshakeFailed",
            LiveChannelEvent::ConnectionLost { .. } => "ConnectionLost",
            LiveChannelEvent::BackoffElapsed => "BackoffElapsed",
            LiveChannelEvent::Close => "Close",
        }
    }
}

// ----------------------------------------------------------------------------
// Audit Log
// ----------------------------------------------------------------------------

/// Bounded record of the most recent transitions
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, entry: AuditEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}: {reason}")]
    InvalidTransition {
        from_state: String,
        event: String,
        reason: String,
    },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
