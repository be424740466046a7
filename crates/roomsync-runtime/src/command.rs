//! Commands from the UI handle to the core logic task
//!
//! Commands that produce an answer carry a oneshot reply channel.

use roomsync_core::{CorrelationKey, EngineDiagnostics};
use tokio::sync::oneshot;

/// Commands sent from the UI to the core logic task
#[derive(Debug)]
pub enum Command {
    /// Load (or reload after a failure) the room history
    LoadHistory,
    /// Compose a message; replies with its key, or `None` for blank text
    Compose {
        text: String,
        reply: oneshot::Sender<Option<CorrelationKey>>,
    },
    /// Resend a failed message under a new key
    RetryFailed {
        key: CorrelationKey,
        reply: oneshot::Sender<Option<CorrelationKey>>,
    },
    /// Request store counters and the live channel audit trail
    Diagnostics {
        reply: oneshot::Sender<EngineDiagnostics>,
    },
    /// Restart the live channel after it gave up reconnecting
    Reconnect,
    /// Cancel in-flight work, close the live channel and stop
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadHistory => "LoadHistory",
            Command::Compose { .. } => "Compose",
            Command::RetryFailed { .. } => "RetryFailed",
            Command::Diagnostics { .. } => "Diagnostics",
            Command::Reconnect => "Reconnect",
            Command::Shutdown => "Shutdown",
        }
    }
}
