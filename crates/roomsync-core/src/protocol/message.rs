//! Chat message records and partial updates
//!
//! A `Message` is the single rendered record for one correlation key. Every
//! producer (history, live channel, outbound pipeline) describes what it
//! knows as a `MessageUpdate`; the store folds updates into records through
//! the reconciler.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::types::{CorrelationKey, DeviceId, ServerId, Timestamp};

// ----------------------------------------------------------------------------
// Delivery State
// ----------------------------------------------------------------------------

/// Delivery state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Composed locally, not yet confirmed by the backend
    Pending,
    /// Accepted by the backend; carries an authoritative server time
    Confirmed,
    /// Persistence failed; kept for display and explicit resend
    Failed,
}

impl DeliveryState {
    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Confirmed | DeliveryState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// Re-asserting the current state is always legal.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        *self == next || !self.is_terminal()
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::Confirmed => write!(f, "confirmed"),
            DeliveryState::Failed => write!(f, "failed"),
        }
    }
}

/// Whether this device composed the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Remote => write!(f, "remote"),
        }
    }
}

// ----------------------------------------------------------------------------
// Message Record
// ----------------------------------------------------------------------------

/// One rendered chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub correlation_key: CorrelationKey,
    pub server_id: Option<ServerId>,
    pub device_id: DeviceId,
    pub text: String,
    pub client_time: Timestamp,
    pub server_time: Option<Timestamp>,
    pub delivery_state: DeliveryState,
    pub origin: Origin,
}

impl Message {
    pub fn is_confirmed(&self) -> bool {
        self.delivery_state == DeliveryState::Confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.delivery_state == DeliveryState::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.delivery_state == DeliveryState::Failed
    }
}

// ----------------------------------------------------------------------------
// Partial Updates
// ----------------------------------------------------------------------------

/// Delivery information carried by an update
///
/// Confirmation always travels with a time, so a confirmed record can never
/// be produced without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Pending,
    /// Confirmed with the backend's own time
    Confirmed { server_time: Timestamp },
    /// Seen on the live channel without a backend time
    ///
    /// `received_at` becomes the server time of a record that has none yet.
    /// It never replaces a server time the record already carries.
    Echoed { received_at: Timestamp },
    Failed,
}

impl Delivery {
    pub fn state(&self) -> DeliveryState {
        match self {
            Delivery::Pending => DeliveryState::Pending,
            Delivery::Confirmed { .. } | Delivery::Echoed { .. } => DeliveryState::Confirmed,
            Delivery::Failed => DeliveryState::Failed,
        }
    }
}

/// Partial record written into the store by one producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub correlation_key: CorrelationKey,
    pub server_id: Option<ServerId>,
    pub device_id: Option<DeviceId>,
    pub text: Option<String>,
    pub client_time: Option<Timestamp>,
    pub delivery: Option<Delivery>,
    pub origin: Option<Origin>,
}

impl MessageUpdate {
    /// Empty update for a key; fields are added with the builder methods
    pub fn for_key(correlation_key: CorrelationKey) -> Self {
        Self {
            correlation_key,
            server_id: None,
            device_id: None,
            text: None,
            client_time: None,
            delivery: None,
            origin: None,
        }
    }

    /// Optimistic record for a message just composed on this device
    pub fn local_pending(
        correlation_key: CorrelationKey,
        device_id: DeviceId,
        text: String,
        client_time: Timestamp,
    ) -> Self {
        Self {
            correlation_key,
            server_id: None,
            device_id: Some(device_id),
            text: Some(text),
            client_time: Some(client_time),
            delivery: Some(Delivery::Pending),
            origin: Some(Origin::Local),
        }
    }

    /// Complete confirmed record received from the backend
    pub fn confirmed(
        correlation_key: CorrelationKey,
        device_id: DeviceId,
        text: String,
        server_time: Timestamp,
        origin: Origin,
    ) -> Self {
        Self {
            correlation_key,
            server_id: None,
            device_id: Some(device_id),
            text: Some(text),
            client_time: Some(server_time),
            delivery: Some(Delivery::Confirmed { server_time }),
            origin: Some(origin),
        }
    }

    /// Confirmation for an existing record
    pub fn confirmation(correlation_key: CorrelationKey, server_time: Timestamp) -> Self {
        Self::for_key(correlation_key).with_delivery(Delivery::Confirmed { server_time })
    }

    /// Failure marker for an existing record
    pub fn failure(correlation_key: CorrelationKey) -> Self {
        Self::for_key(correlation_key).with_delivery(Delivery::Failed)
    }

    pub fn with_server_id(mut self, server_id: Option<ServerId>) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_client_time(mut self, client_time: Timestamp) -> Self {
        self.client_time = Some(client_time);
        self
    }

    /// Re-target this update at another key
    pub(crate) fn rekeyed(mut self, correlation_key: CorrelationKey) -> Self {
        self.correlation_key = correlation_key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_transitions() {
        use DeliveryState::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Pending));
        assert!(Confirmed.can_transition_to(Confirmed));
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Confirmed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let message = Message {
            correlation_key: CorrelationKey::new("k1"),
            server_id: Some(ServerId::new("9")),
            device_id: DeviceId::new("device-a"),
            text: "hi".to_string(),
            client_time: Timestamp::new(10),
            server_time: Some(Timestamp::new(12)),
            delivery_state: DeliveryState::Confirmed,
            origin: Origin::Local,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["correlationKey"], "k1");
        assert_eq!(json["deliveryState"], "confirmed");
        assert_eq!(json["serverTime"], 12);
    }
}
