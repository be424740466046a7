//! Centralized Configuration Management
//!
//! This module consolidates all configuration structures used by the engine
//! and its runtime to provide a unified, consistent configuration interface.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::types::RoomId;
use crate::{Result, SyncError};

/// Placeholder substituted with the room name in endpoint templates
pub const ROOM_PLACEHOLDER: &str = "{room}";

// ----------------------------------------------------------------------------
// Endpoint Configuration
// ----------------------------------------------------------------------------

/// Addresses of the three external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// History Service URL template (`GET`)
    pub history_url: String,
    /// Persistence Endpoint URL template (`POST`)
    pub persist_url: String,
    /// Live Channel Server URL template (WebSocket)
    pub live_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            history_url: "http://localhost:8080/rooms/{room}/messages".to_string(),
            persist_url: "http://localhost:8080/rooms/{room}/messages".to_string(),
            live_url: "ws://localhost:8080/rooms/{room}/live".to_string(),
        }
    }
}

impl EndpointConfig {
    /// Resolve a URL template for a room
    pub fn resolve(template: &str, room: &RoomId) -> String {
        template.replace(ROOM_PLACEHOLDER, room.as_str())
    }

    pub fn history_url_for(&self, room: &RoomId) -> String {
        Self::resolve(&self.history_url, room)
    }

    pub fn persist_url_for(&self, room: &RoomId) -> String {
        Self::resolve(&self.persist_url, room)
    }

    pub fn live_url_for(&self, room: &RoomId) -> String {
        Self::resolve(&self.live_url, room)
    }
}

// ----------------------------------------------------------------------------
// Reconnection Configuration
// ----------------------------------------------------------------------------

/// Bounded exponential backoff for the live channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub multiplier: f32,
    /// Consecutive failures tolerated before the failure becomes permanent
    pub max_retries: u32,
    /// A connection that stays up this long resets the failure count
    pub stable_after: Duration,
    /// Timeout for a single connection handshake
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 5,
            stable_after: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retrying after `failures` consecutive failures (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f32;
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = base_delay * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f32 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// Create configuration for tests: short delays, small budget
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
            multiplier: 2.0,
            max_retries: 5,
            stable_after: Duration::from_secs(1),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Liveness checking for an open live channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval between ping frames
    pub interval: Duration,
    /// Silence after which the connection is considered lost
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(45),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the runtime's task channels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (UI → Core Logic)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (I/O tasks → Core Logic)
    pub event_buffer_size: usize,
    /// Buffer size for outbound live frames (Core Logic → Live Channel)
    pub live_buffer_size: usize,
    /// Buffer size for AppEvent broadcast (Core Logic → UI)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,   // UI commands are infrequent
            event_buffer_size: 128,    // Network events can be bursty
            live_buffer_size: 64,
            app_event_buffer_size: 64, // UI updates need responsiveness
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 100,
            live_buffer_size: 100,
            app_event_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one chat engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub endpoints: EndpointConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub channels: ChannelConfig,
    /// Timeout for History Service and Persistence Endpoint requests
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            channels: ChannelConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Create configuration for tests
    pub fn testing() -> Self {
        Self {
            endpoints: EndpointConfig::default(),
            reconnect: ReconnectConfig::testing(),
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(200),
                timeout: Duration::from_secs(2),
            },
            channels: ChannelConfig::testing(),
            request_timeout: Duration::from_secs(1),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("history_url", &self.endpoints.history_url),
            ("persist_url", &self.endpoints.persist_url),
            ("live_url", &self.endpoints.live_url),
        ] {
            if template.trim().is_empty() {
                return Err(SyncError::config_error(format!("{} must not be empty", name)));
            }
        }

        let reconnect = &self.reconnect;
        if reconnect.multiplier < 1.0 {
            return Err(SyncError::config_error(
                "reconnect.multiplier must be at least 1.0",
            ));
        }
        if reconnect.initial_delay > reconnect.max_delay {
            return Err(SyncError::config_error(
                "reconnect.initial_delay must not exceed reconnect.max_delay",
            ));
        }
        if self.heartbeat.interval.is_zero() || self.heartbeat.timeout <= self.heartbeat.interval {
            return Err(SyncError::config_error(
                "heartbeat.timeout must be longer than a non-zero heartbeat.interval",
            ));
        }

        let channels = &self.channels;
        if channels.command_buffer_size == 0
            || channels.event_buffer_size == 0
            || channels.live_buffer_size == 0
            || channels.app_event_buffer_size == 0
        {
            return Err(SyncError::config_error("channel buffer sizes must be non-zero"));
        }

        Ok(())
    }
}
