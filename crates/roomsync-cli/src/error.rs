//! Error handling for the RoomSync CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("RoomSync error: {0}")]
    Sync(#[from] roomsync_core::SyncError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message processing error: {0}")]
    MessageProcessing(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
