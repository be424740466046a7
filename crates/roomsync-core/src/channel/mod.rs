//! Channel Module
//!
//! Message types of the CSP (Communicating Sequential Processes) task layout:
//! I/O tasks report `Event`s, the engine answers with `Effect`s, and the UI
//! observes `AppEvent`s.

pub mod communication;

pub use communication::{AppEvent, Effect, Event, HistoryStatus};

// Re-export ChannelConfig from config module
pub use crate::config::ChannelConfig;
