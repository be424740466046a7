//! Error types for the RoomSync engine
//!
//! This module contains all error types used throughout the synchronization
//! engine, including transport errors, store errors, and the main `SyncError`
//! type that unifies them all.

use crate::protocol::connection_state::StateTransitionError;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific transport error types (History Service, Persistence Endpoint, Live Channel)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },
    #[error("Request to {endpoint} rejected with status {status}")]
    Rejected { endpoint: String, status: u16 },
    #[error("Transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Channel closed: {reason}")]
    Closed { reason: String },
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Specific message store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Cannot insert incomplete record for key {correlation_key}: missing {missing}")]
    IncompleteRecord {
        correlation_key: String,
        missing: &'static str,
    },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error types for the RoomSync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// Channel communication error between runtime tasks
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Local durable storage error
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl SyncError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        SyncError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        SyncError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a local storage error with a reason
    pub fn storage_error<T: Into<String>>(reason: T) -> Self {
        SyncError::Storage {
            reason: reason.into(),
        }
    }

    /// Create a transport connection failed error
    pub fn connection_failed<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        SyncError::Transport(TransportError::ConnectionFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        })
    }

    /// Create a request failed error
    pub fn request_failed<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        SyncError::Transport(TransportError::RequestFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        })
    }

    /// Create a rejected request error from an HTTP status code
    pub fn rejected<E: Into<String>>(endpoint: E, status: u16) -> Self {
        SyncError::Transport(TransportError::Rejected {
            endpoint: endpoint.into(),
            status,
        })
    }

    /// Whether this error came from the network layer
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, SyncError>;
pub type SyncResult<T> = Result<T>;
