//! RoomSync CLI library
//!
//! Terminal client for a single chat room: configuration, device identity,
//! one-shot commands and the interactive chat loop.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod terminal;

pub use app::RoomSyncApp;
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
