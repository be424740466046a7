//! Core types for the RoomSync engine
//!
//! This module defines the fundamental types used throughout the engine,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::{Add, Deref, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Pseudonymous identifier for one installation of the chat client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing identifier string
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for DeviceId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Correlation Key
// ----------------------------------------------------------------------------

/// Client-generated join key between an optimistic record and its echoes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    const SERVER_PREFIX: &'static str = "srv:";
    const RECEIVED_PREFIX: &'static str = "rx:";

    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// Fresh key for a locally composed message
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Key for a record that arrived without one
    ///
    /// Records carrying a server id map to a stable key so that the same
    /// persisted message received twice lands on one record.
    pub fn derived(server_id: Option<&ServerId>) -> Self {
        match server_id {
            Some(id) => Self(format!("{}{}", Self::SERVER_PREFIX, id)),
            None => Self(format!("{}{}", Self::RECEIVED_PREFIX, Uuid::new_v4())),
        }
    }

    /// Whether this key was derived locally rather than assigned by its author
    pub fn is_derived(&self) -> bool {
        self.0.starts_with(Self::SERVER_PREFIX) || self.0.starts_with(Self::RECEIVED_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Server Identifier
// ----------------------------------------------------------------------------

/// Identifier assigned by the backing store once a message is persisted
///
/// Backends send either a JSON string or a JSON number; both normalize to
/// the string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ServerId(s),
            Raw::Unsigned(n) => ServerId(n.to_string()),
            Raw::Signed(n) => ServerId(n.to_string()),
        })
    }
}

// ----------------------------------------------------------------------------
// Room Identifier
// ----------------------------------------------------------------------------

/// Name of the shared chat room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new<S: Into<String>>(room: S) -> Self {
        Self(room.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps
///
/// The engine never reads the clock directly so that ordering and backoff
/// behaviour can be driven deterministically in tests.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced time source for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
